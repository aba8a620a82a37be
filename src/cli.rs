use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// fleetd CLI application
#[derive(Parser)]
#[command(name = "fleetd")]
#[command(about = "A supervisor daemon for user-owned game servers")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the daemon until SIGINT or SIGTERM
    Run {
        /// Path to the daemon config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
    /// Validate the config and print the effective settings
    Check {
        /// Path to the daemon config file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}
