//! Per-client state and the three cooperating tasks each connection
//! runs (spec §3.5, §3.6, §4.4).

pub mod info;
pub mod manager;
pub mod tasks;

pub use info::{ClientInfo, CryptoSession, SharedClient};
pub use manager::ClientManager;
