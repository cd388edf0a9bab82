//! Error taxonomy (spec §7). Every fallible operation in the pipeline
//! returns `Result<T, AcipError>`; only `main` and config loading reach
//! for `anyhow` across the taxonomy boundary.

use thiserror::Error;

/// Process exit codes per spec §6.2.
pub const EXIT_OK: i32 = 0;
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_BIND: i32 = 3;
pub const EXIT_CRYPTO_INIT: i32 = 4;

#[derive(Error, Debug)]
pub enum AcipError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),

    #[error("auth error: {0}")]
    Auth(AuthError),

    #[error("resource error: {0}")]
    Resource(ResourceError),

    #[error("invalid operation for current connection state: {0}")]
    State(&'static str),

    #[error("fatal startup error: {0}")]
    Fatal(String),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    #[error("bad signature")]
    BadSignature,
    #[error("nonce replay or reorder")]
    ReplayOrReorder,
    #[error("server identity did not match pinned key")]
    ServerIdentityMismatch,
    #[error("AEAD decrypt failed")]
    DecryptFailed,
    #[error("nonce counter exhausted")]
    CounterExhausted,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("client public key not in whitelist")]
    NotWhitelisted,
    #[error("password-derived identity mismatch")]
    PasswordMismatch,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceError {
    #[error("would block (queue full or pool exhausted)")]
    WouldBlock,
    #[error("allocation failed")]
    AllocFailed,
}

impl From<CryptoError> for AcipError {
    fn from(e: CryptoError) -> Self {
        AcipError::Crypto(e)
    }
}

impl From<AuthError> for AcipError {
    fn from(e: AuthError) -> Self {
        AcipError::Auth(e)
    }
}

impl From<ResourceError> for AcipError {
    fn from(e: ResourceError) -> Self {
        AcipError::Resource(e)
    }
}

/// Numeric error codes carried in `ERROR` packets (§7 user-visible failures).
pub mod wire_code {
    pub const PROTOCOL: u32 = 1;
    pub const AUTH_FAILED: u32 = 2;
    pub const SERVER_FULL: u32 = 3;
    pub const CRYPTO: u32 = 4;
    pub const INTERNAL: u32 = 5;
}
