//! Command line interface built on clap.
//!
//! [`Cli`] carries the subcommands ([`Command`]) and the global flags
//! `--config` and `--verbose`.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::DEFAULT_CONFIG_PATH;

/// Task lifecycle engine with webhook notifications.
#[derive(Debug, Parser)]
#[command(name = "taskhook", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Path of the TOML configuration file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Enable debug logging (RUST_LOG still takes precedence).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the engine HTTP server.
    Serve {
        /// Address to listen on; overrides `[server] bind` and TASKHOOK_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,

        /// Re-extraction budget of validated tasks.
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Run a standalone webhook receiver for testing subscribers.
    Receive {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
    },
}
