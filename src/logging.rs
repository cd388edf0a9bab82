//! Logging ambient stack (SPEC_FULL.md §A.1): `tracing` +
//! `tracing-subscriber`, driven by `RUST_LOG`/`ASCII_CHAT_LOG`. Every
//! subsystem logs through a named target (`"server"`, `"broadcast"`,
//! ...) instead of a bracketed string prefix, so levels and targets can
//! be filtered independently.

use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "ASCII_CHAT_LOG";

/// Install the global `tracing` subscriber. Call once, at process start.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
