use std::path::PathBuf;

use clap::{Parser, Subcommand};

use svcwrap::config::DEFAULT_CONFIG_FILE;

/// Admin rights are required to install/start/stop/delete the service.
#[derive(Parser, Debug)]
#[command(version, about = "Run any executable as a supervised Windows service")]
pub struct Args {
    /// Configuration file
    #[arg(long, short = 'c', global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Sub‑commands (none = run under the service host)
    #[command(subcommand)]
    pub sub: Option<Cmd>,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Install the service
    Install,
    /// Start the service
    Start,
    /// Stop the service (waits until it is stopped)
    Stop,
    /// Delete the service, stopping it first if running
    Delete,
    /// Print the service state (Exit 0 = running, 1 = otherwise)
    Status,
    /// Supervise the child in the foreground, without the service manager
    Run,
}
