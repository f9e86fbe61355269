//! Moresh CLI — run a signaling relay or chat with a peer.

mod cli;
mod cmd;
mod ui;

use crate::cli::{Cli, Commands};
use clap::Parser;
use moresh_types::config::{load_config, moresh_home};
use tracing_subscriber::EnvFilter;

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_level))
        .with_writer(std::io::stderr)
        .init();
}

/// Send tracing to a log file so it does not interleave with the chat.
fn init_tracing_file(default_level: &str) {
    let log_dir = moresh_home();
    let _ = std::fs::create_dir_all(&log_dir);
    let log_path = log_dir.join("chat.log");

    match std::fs::File::create(&log_path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter(default_level))
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::ERROR)
                .with_writer(std::io::sink)
                .init();
        }
    }
}

fn main() {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref());

    match cli.command {
        Commands::Chat { .. } => init_tracing_file(&config.log_level),
        _ => init_tracing_stderr(&config.log_level),
    }

    let result = match cli.command {
        Commands::Keygen => {
            cmd::keygen();
            Ok(())
        }
        Commands::Relay { listen } => cmd::block_on(cmd::relay::run(config, listen)),
        Commands::Chat { key, peer, relay } => {
            cmd::block_on(cmd::chat::run(config, key, peer, relay))
        }
    };

    if let Err(e) = result {
        ui::error(&format!("{e:#}"));
        std::process::exit(1);
    }
}
