//! Clap CLI definitions for Moresh.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  moresh relay                          Run the signaling relay on 127.0.0.1:8080
  moresh keygen                         Print a fresh random connection key
  moresh chat --key alice123            Wait for a peer to connect to alice123
  moresh chat --key bob45678 --peer alice123
                                        Connect to alice123 and start chatting

\x1b[1;36mIn chat:\x1b[0m
  /typing   tell the peer you are typing
  /quit     disconnect and exit";

/// Moresh — direct peer-to-peer chat with a tiny signaling relay.
#[derive(Parser)]
#[command(name = "moresh", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the signaling relay until Ctrl+C.
    Relay {
        /// Address to listen on (overrides config).
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Chat with a peer.
    Chat {
        /// Your connection key (at least 8 characters).
        #[arg(long)]
        key: String,
        /// Key of the peer to connect to. Without it, wait for the peer.
        #[arg(long)]
        peer: Option<String>,
        /// Relay WebSocket URL (overrides config).
        #[arg(long)]
        relay: Option<String>,
    },
    /// Generate a random connection key.
    Keygen,
}
