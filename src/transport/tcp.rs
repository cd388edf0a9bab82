//! Raw-TCP `Transport` implementation: non-blocking sockets polled with
//! a deadline rather than relying on OS read timeouts, so the
//! cooperative shutdown flag can be checked between polls.
//!
//! `split` hands the receive and send tasks their own `TcpStream`
//! handle via `try_clone` (two handles over the same underlying socket,
//! independently readable/writable without a shared lock), with the
//! `connected` flag shared through an `Arc<AtomicBool>` so either half
//! observes the other's close.

use crate::errors::AcipError;
use crate::protocol::header::HEADER_SIZE;
use crate::protocol::PacketHeader;
use crate::transport::{RecvFrame, Transport, TransportKind, TransportReader, TransportWriter};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn read_exact_with_deadline(
    stream: &mut TcpStream,
    connected: &AtomicBool,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<(), AcipError> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => {
                connected.store(false, Ordering::Release);
                return Err(AcipError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "peer closed connection",
                )));
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(AcipError::Timeout("tcp recv"));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                connected.store(false, Ordering::Release);
                return Err(AcipError::Io(e));
            }
        }
    }
    Ok(())
}

pub struct TcpTransport {
    stream: TcpStream,
    tls: bool,
    connected: Arc<AtomicBool>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, tls: bool) -> Result<Self, AcipError> {
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true).ok();
        Ok(Self { stream, tls, connected: Arc::new(AtomicBool::new(true)) })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError> {
        let bytes = super::frame_bytes(header, payload);
        self.stream.write_all(&bytes).map_err(|e| {
            self.connected.store(false, Ordering::Release);
            AcipError::Io(e)
        })
    }

    fn recv(&mut self, timeout: Duration) -> Result<RecvFrame, AcipError> {
        let deadline = Instant::now() + timeout;
        let mut header_buf = [0u8; HEADER_SIZE];
        read_exact_with_deadline(&mut self.stream, &self.connected, &mut header_buf, deadline)?;
        let header = PacketHeader::decode(&header_buf)?;
        let mut payload = vec![0u8; header.payload_length as usize];
        read_exact_with_deadline(&mut self.stream, &self.connected, &mut payload, deadline)?;
        Ok(RecvFrame { header, payload })
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn kind(&self) -> TransportKind {
        if self.tls {
            TransportKind::TcpTls
        } else {
            TransportKind::Tcp
        }
    }

    fn split(self: Box<Self>) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>), AcipError> {
        let write_half = self.stream.try_clone().map_err(AcipError::Io)?;
        let reader = TcpReader { stream: self.stream, connected: self.connected.clone() };
        let writer = TcpWriter { stream: write_half, tls: self.tls, connected: self.connected };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

pub struct TcpReader {
    stream: TcpStream,
    connected: Arc<AtomicBool>,
}

impl TransportReader for TcpReader {
    fn recv(&mut self, timeout: Duration) -> Result<RecvFrame, AcipError> {
        let deadline = Instant::now() + timeout;
        let mut header_buf = [0u8; HEADER_SIZE];
        read_exact_with_deadline(&mut self.stream, &self.connected, &mut header_buf, deadline)?;
        let header = PacketHeader::decode(&header_buf)?;
        let mut payload = vec![0u8; header.payload_length as usize];
        read_exact_with_deadline(&mut self.stream, &self.connected, &mut payload, deadline)?;
        Ok(RecvFrame { header, payload })
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

pub struct TcpWriter {
    stream: TcpStream,
    tls: bool,
    connected: Arc<AtomicBool>,
}

impl TransportWriter for TcpWriter {
    fn send(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError> {
        let bytes = super::frame_bytes(header, payload);
        self.stream.write_all(&bytes).map_err(|e| {
            self.connected.store(false, Ordering::Release);
            AcipError::Io(e)
        })
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn provides_encryption(&self) -> bool {
        if self.tls {
            TransportKind::TcpTls.provides_encryption()
        } else {
            TransportKind::Tcp.provides_encryption()
        }
    }
}
