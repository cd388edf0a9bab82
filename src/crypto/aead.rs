//! XSalsa20-Poly1305 per-packet encryption with monotonic per-direction
//! nonce counters (spec §4.5, §6.1 `ENCRYPTED`).
//!
//! Nonce layout: `[direction_tag:1][reserved:7][counter:16 be]` padded to
//! the cipher's 24-byte nonce. The counter is the only thing that ever
//! changes for a given direction, so strictly increasing counters are
//! exactly "nonce never reused" as required by the AEAD.

use crate::errors::CryptoError;
use crate::protocol::header::HEADER_SIZE;
use crate::protocol::PacketHeader;
use xsalsa20poly1305::aead::{Aead, KeyInit, Payload};
use xsalsa20poly1305::{Nonce, XSalsa20Poly1305};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

impl Direction {
    fn tag(self) -> u8 {
        match self {
            Direction::ClientToServer => 0,
            Direction::ServerToClient => 1,
        }
    }
}

/// The two directional keys produced by the handshake for one session.
pub struct DirectionalKeys {
    pub c2s: [u8; 32],
    pub s2c: [u8; 32],
}

/// Per-direction strictly-monotonic nonce counter; the sender owns this
/// exclusively, the receiver owns its own copy for replay rejection.
pub struct NonceCounter {
    direction: Direction,
    next_to_send: u128,
    last_accepted: Option<u128>,
}

impl NonceCounter {
    pub fn new(direction: Direction) -> Self {
        Self { direction, next_to_send: 0, last_accepted: None }
    }

    /// Returns the nonce to use for the next send, or `CounterExhausted`
    /// at `2^64 - 1` (spec §8): the wire field is 16 bytes wide, but the
    /// counter is still treated as exhausted at the documented 64-bit
    /// boundary rather than the field's full range.
    pub fn next_send_nonce(&mut self) -> Result<([u8; 24], u128), CryptoError> {
        if self.next_to_send >= u64::MAX as u128 {
            return Err(CryptoError::CounterExhausted);
        }
        let counter = self.next_to_send;
        self.next_to_send += 1;
        Ok((build_nonce(self.direction, counter), counter))
    }

    /// Accepts `counter` only if strictly greater than the last one seen
    /// on the receive side (gaps from packet loss are fine, reordering
    /// or replay is not).
    pub fn accept_received(&mut self, counter: u128) -> Result<(), CryptoError> {
        if let Some(last) = self.last_accepted {
            if counter <= last {
                return Err(CryptoError::ReplayOrReorder);
            }
        }
        self.last_accepted = Some(counter);
        Ok(())
    }
}

fn build_nonce(direction: Direction, counter: u128) -> [u8; 24] {
    let mut nonce = [0u8; 24];
    nonce[0] = direction.tag();
    nonce[8..24].copy_from_slice(&counter.to_be_bytes());
    nonce
}

pub fn counter_from_nonce(nonce: &[u8; 24]) -> u128 {
    u128::from_be_bytes(nonce[8..24].try_into().unwrap())
}

/// Associated data for the outer `ENCRYPTED` packet: the header's fixed
/// identifying fields, with `crc32` zeroed since that field is itself
/// computed over the (already-encrypted) wrapper bytes and so can't be
/// known yet when the sender first needs this AAD.
pub fn header_aad(header: &PacketHeader) -> [u8; HEADER_SIZE] {
    let mut aad_header = *header;
    aad_header.crc32 = 0;
    aad_header.encode()
}

/// Seal `plaintext` (the inner header+payload) under `key`, using `aad`
/// as the associated data (the outer packet header's fixed fields).
pub fn seal(key: &[u8; 32], nonce: &[u8; 24], plaintext: &[u8], aad: &[u8]) -> Vec<u8> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad })
        .expect("XSalsa20-Poly1305 sealing over a bounded plaintext cannot fail")
}

/// Open a previously-sealed packet; any tampering with ciphertext, tag,
/// nonce, or aad surfaces as `DecryptFailed`.
pub fn open(
    key: &[u8; 32],
    nonce: &[u8; 24],
    ciphertext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = XSalsa20Poly1305::new(key.into());
    cipher
        .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad })
        .map_err(|_| CryptoError::DecryptFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let key = [1u8; 32];
        let nonce = build_nonce(Direction::ClientToServer, 0);
        let aad = b"header";
        let ct = seal(&key, &nonce, b"hello world", aad);
        let pt = open(&key, &nonce, &ct, aad).unwrap();
        assert_eq!(pt, b"hello world");
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = [1u8; 32];
        let nonce = build_nonce(Direction::ClientToServer, 0);
        let aad = b"header";
        let mut ct = seal(&key, &nonce, b"hello world", aad);
        ct[0] ^= 0xff;
        assert!(open(&key, &nonce, &ct, aad).is_err());
    }

    #[test]
    fn nonce_counter_rejects_replay() {
        let mut counter = NonceCounter::new(Direction::ServerToClient);
        counter.accept_received(5).unwrap();
        assert!(counter.accept_received(5).is_err());
        assert!(counter.accept_received(3).is_err());
        assert!(counter.accept_received(6).is_ok());
    }

    #[test]
    fn nonce_counter_exhaustion() {
        let mut counter = NonceCounter {
            direction: Direction::ClientToServer,
            next_to_send: u64::MAX as u128,
            last_accepted: None,
        };
        assert!(matches!(
            counter.next_send_nonce(),
            Err(CryptoError::CounterExhausted)
        ));
    }
}
