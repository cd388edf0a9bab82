//! Transport abstraction (spec §4.1): a capability set implemented over
//! raw TCP and over WebSocket, optionally TLS-wrapped. One connection
//! always yields one complete framed packet per `recv`; partial reads
//! are reassembled inside the implementation, never leaked to callers.

pub mod tcp;
pub mod websocket;

use crate::errors::AcipError;
use crate::protocol::header::HEADER_SIZE;
use crate::protocol::PacketHeader;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    TcpTls,
    WebSocketPlain,
    WebSocketTls,
}

impl TransportKind {
    /// TLS (and only TLS) lets the application write application data
    /// plaintext, since the transport layer already encrypts the stream
    /// (spec §4.1 encryption policy).
    pub fn provides_encryption(self) -> bool {
        matches!(self, TransportKind::TcpTls | TransportKind::WebSocketTls)
    }
}

/// One fully-reassembled inbound packet plus its backing allocation.
pub struct RecvFrame {
    pub header: PacketHeader,
    pub payload: Vec<u8>,
}

/// Polymorphic connection handle used during accept/handshake, before a
/// client is admitted and its two long-running tasks start. The
/// handshake runs single-threaded (request, then blocking response, in
/// sequence), so a combined send+recv handle is safe here; once the
/// client is admitted, `split` hands out an independent reader and
/// writer so the receive and send tasks never contend for the same
/// lock on their own hot paths.
pub trait Transport: Send {
    /// Write header+payload as a single logical operation. Implementors
    /// must guarantee this is atomic with respect to other writers on
    /// the same connection (single-writer-per-connection discipline is
    /// enforced by only ever calling this from the send task, or from
    /// the writer half after `split`).
    fn send(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError>;

    /// Block (up to `timeout`) for one complete framed packet.
    fn recv(&mut self, timeout: Duration) -> Result<RecvFrame, AcipError>;

    fn close(&mut self);

    fn is_connected(&self) -> bool;

    fn provides_encryption(&self) -> bool {
        self.kind().provides_encryption()
    }

    fn kind(&self) -> TransportKind;

    /// Split into an independent reader and writer over the same
    /// connection, so a blocking `recv` on one never holds a lock the
    /// other needs to make progress.
    fn split(self: Box<Self>) -> Result<(Box<dyn TransportReader>, Box<dyn TransportWriter>), AcipError>;
}

/// The receive half of a split connection.
pub trait TransportReader: Send {
    fn recv(&mut self, timeout: Duration) -> Result<RecvFrame, AcipError>;
    fn close(&mut self);
    fn is_connected(&self) -> bool;
}

/// The send half of a split connection.
pub trait TransportWriter: Send {
    fn send(&mut self, header: &PacketHeader, payload: &[u8]) -> Result<(), AcipError>;
    fn close(&mut self);
    fn is_connected(&self) -> bool;
    fn provides_encryption(&self) -> bool;
}

/// Shared helper: assemble header+payload bytes for a single write call.
pub fn frame_bytes(header: &PacketHeader, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(payload);
    out
}
