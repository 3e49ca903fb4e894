//! CLI definition using clap derive.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use presence_core::PresenceConfig;

#[derive(Parser)]
#[command(name = "presenced", about = "presence heartbeat driver")]
pub struct Cli {
    /// Identity slot file (default: $XDG_STATE_HOME/presence/user_id)
    #[arg(long, short = 'i', global = true, env = "PRESENCE_IDENTITY_FILE")]
    pub identity_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Drive presence against the in-process backend; lifecycle signals on stdin
    Run(RunOpts),
    /// Print the identifier currently stored in the identity slot
    Resolve,
}

#[derive(clap::Args)]
pub struct RunOpts {
    /// Heartbeat period in seconds
    #[arg(long, default_value = "15")]
    pub heartbeat_secs: u64,

    /// Identity retry interval in milliseconds
    #[arg(long, default_value = "1000")]
    pub retry_ms: u64,

    /// Start with the simulated transport unreachable
    #[arg(long)]
    pub start_disconnected: bool,
}

impl Default for RunOpts {
    fn default() -> Self {
        Self {
            heartbeat_secs: 15,
            retry_ms: 1000,
            start_disconnected: false,
        }
    }
}

impl RunOpts {
    pub fn to_config(&self) -> PresenceConfig {
        PresenceConfig {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            retry_interval: Duration::from_millis(self.retry_ms),
            ..PresenceConfig::default()
        }
    }
}

/// Default identity slot path, per-user.
pub fn default_identity_path() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(dir).join("presence/user_id");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".local/state/presence/user_id")
}
