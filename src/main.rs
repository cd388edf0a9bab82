//! CLI entry point (spec §6.2): load config, stand up the server, map
//! fatal errors to the documented exit codes.

use ascii_chat_server::config::{CliArgs, Config};
use ascii_chat_server::errors::{EXIT_BIND, EXIT_CONFIG, EXIT_CRYPTO_INIT, EXIT_OK};
use ascii_chat_server::server::Server;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    ascii_chat_server::logging::init();
    let cli = CliArgs::parse();

    let config = match Config::load(cli.config.as_deref(), &cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(EXIT_CONFIG as u8);
        }
    };

    let server = match Server::new(config) {
        Ok(server) => server,
        Err(e) => {
            eprintln!("crypto initialization error: {e}");
            return ExitCode::from(EXIT_CRYPTO_INIT as u8);
        }
    };

    if let Err(e) = server.run() {
        eprintln!("server error: {e}");
        return ExitCode::from(EXIT_BIND as u8);
    }

    ExitCode::from(EXIT_OK as u8)
}
