//! Identity handshake, AEAD framing, and key-derivation (spec §4.5, §6.3).

pub mod aead;
pub mod auth;
pub mod handshake;
pub mod kdf;
pub mod keys;

pub use aead::{DirectionalKeys, Direction};
pub use handshake::{ClientHandshake, ServerHandshake, SessionKeys};
