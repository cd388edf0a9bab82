//! WebSocket `Transport` implementation using `tungstenite`'s
//! synchronous, blocking-socket API (no async runtime: this keeps the
//! thread-per-client model identical for both transports). Binary
//! frames carry one packet each; `tungstenite` already reassembles
//! fragmented messages before handing them back, so `recv` never
//! returns a partial packet.
//!
//! `tungstenite` has no built-in half-split, so `split` clones the
//! underlying `TcpStream` (the WebSocket upgrade is already complete on
//! the wire by the time `split` runs) and wraps the clone in its own
//! `WebSocket` via `from_raw_socket`, giving the reader and writer
//! independent framing state over two handles to the same socket.

use crate::errors::AcipError;
use crate::protocol::PacketHeader;
use crate::transport::{RecvFrame, Transport, TransportKind, TransportReader, TransportWriter};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tungstenite::protocol::Role;
use tungstenite::{Message, WebSocket};

fn recv_frame(socket: &mut WebSocket<TcpStream>, connected: &AtomicBool, timeout: Duration) -> Result<RecvFrame, AcipError> {
    let deadline = std::time::Instant::now() + timeout;
    loop {
        match socket.read() {
            Ok(Message::Binary(bytes)) => {
                let header = PacketHeader::decode(&bytes)?;
                let payload = bytes[crate::protocol::header::HEADER_SIZE..].to_vec();
                return Ok(RecvFrame { header, payload });
            }
            Ok(Message::Close(_)) => {
                connected.store(false, Ordering::Release);
                return Err(AcipError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "websocket closed",
                )));
            }
            Ok(_) => continue, // ping/pong/text frames are not part of ACIP
            Err(tungstenite::Error::Io(ref e)) if e.kind() == std::io::ErrorKind::WouldBlock => {
                if std::time::Instant::now() >= deadline {
                    return Err(AcipError::Timeout("websocket recv"));
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => {
                connected.store(false, Ordering::Release);
                return Err(AcipError::Protocol(format!("websocket recv failed: {e}")));
            }
        }
    }
}

fn send_frame(socket: &mut WebSocket<TcpStream>, connected: &AtomicBool, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError> {
    let bytes = super::frame_bytes(header, payload);
    socket.send(Message::Binary(bytes)).map_err(|e| {
        connected.store(false, Ordering::Release);
        AcipError::Protocol(format!("websocket send failed: {e}"))
    })
}

pub struct WebSocketTransport {
    socket: WebSocket<TcpStream>,
    tls: bool,
    connected: Arc<AtomicBool>,
}

impl WebSocketTransport {
    pub fn new(socket: WebSocket<TcpStream>, tls: bool) -> Result<Self, AcipError> {
        socket
            .get_ref()
            .set_nonblocking(true)
            .map_err(AcipError::Io)?;
        Ok(Self { socket, tls, connected: Arc::new(AtomicBool::new(true)) })
    }
}

impl Transport for WebSocketTransport {
    fn send(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError> {
        send_frame(&mut self.socket, &self.connected, header, payload)
    }

    fn recv(&mut self, timeout: Duration) -> Result<RecvFrame, AcipError> {
        recv_frame(&mut self.socket, &self.connected, timeout)
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.socket.close(None);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn kind(&self) -> TransportKind {
        if self.tls {
            TransportKind::WebSocketTls
        } else {
            TransportKind::WebSocketPlain
        }
    }

    fn split(self: Box<Self>) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>), AcipError> {
        let read_stream = self.socket.get_ref().try_clone().map_err(AcipError::Io)?;
        let read_socket = WebSocket::from_raw_socket(read_stream, Role::Server, None);
        let reader = WebSocketReader { socket: read_socket, connected: self.connected.clone() };
        let writer = WebSocketWriter { socket: self.socket, tls: self.tls, connected: self.connected };
        Ok((Box::new(reader), Box::new(writer)))
    }
}

pub struct WebSocketReader {
    socket: WebSocket<TcpStream>,
    connected: Arc<AtomicBool>,
}

impl TransportReader for WebSocketReader {
    fn recv(&mut self, timeout: Duration) -> Result<RecvFrame, AcipError> {
        recv_frame(&mut self.socket, &self.connected, timeout)
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.socket.close(None);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

pub struct WebSocketWriter {
    socket: WebSocket<TcpStream>,
    tls: bool,
    connected: Arc<AtomicBool>,
}

impl TransportWriter for WebSocketWriter {
    fn send(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError> {
        send_frame(&mut self.socket, &self.connected, header, payload)
    }

    fn close(&mut self) {
        self.connected.store(false, Ordering::Release);
        let _ = self.socket.close(None);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn provides_encryption(&self) -> bool {
        if self.tls {
            TransportKind::WebSocketTls.provides_encryption()
        } else {
            TransportKind::WebSocketPlain.provides_encryption()
        }
    }
}
