//! treesync CLI
//!
//! Command-line tools for exercising the treesync client.
//!
//! # Commands
//!
//! - `replay` - Drive the sync engine through a scripted session
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// treesync command-line tools.
#[derive(Parser)]
#[command(name = "treesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay a JSON script of client and server steps
    Replay {
        /// Path to the script file
        script: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so replay output stays machine-readable.
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Replay { script, format } => {
            commands::replay::run(&script, &format)?;
        }
        Commands::Version => {
            println!("treesync CLI v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "treesync protocol v{}",
                treesync_protocol::PROTOCOL_VERSION
            );
        }
    }

    Ok(())
}
