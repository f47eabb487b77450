//! Command-line argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "ble-link", about = "Peer-to-peer BLE reliable-messaging transport", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to a config.toml; defaults to the platform config directory
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Display name to advertise; overrides the configured one
    #[arg(short, long, global = true)]
    pub name: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Advertise as a peripheral and accept inbound connections until Ctrl-C
    Advertise,
    /// Scan for peers until Ctrl-C or the given timeout elapses
    Scan {
        /// Stop scanning after this many seconds; runs until Ctrl-C if unset
        #[arg(long)]
        seconds: Option<u64>,
    },
    /// Connect to a named peer and send one message
    Send {
        /// Unique name (as discovered via scan) of the peer to send to
        to: String,
        /// Text message to send
        message: String,
    },
    /// Advertise, scan, and accept/send interactively from stdin
    Interactive,
    /// Print the local display name and configuration path
    Status,
}
