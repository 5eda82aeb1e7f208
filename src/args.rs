// Commandline argument parser using clap for telerelay

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser, Clone)]
#[clap(version, about)]
pub struct RelayArgs {
    #[command(subcommand, long_about)]
    /// Which role to run
    pub command: CommandTask,

    /// Session config in RON. Defaults apply when omitted
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Loop tick in milliseconds, overriding the config (1 to 10)
    #[arg(short = 't', long = "tick", global = true)]
    pub tick_ms: Option<u64>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum CommandTask {
    /// Drive the simulation from this terminal
    #[command(about)]
    Local(LocalCommand),

    /// Run the simulation and serve one remote driver
    #[command(about)]
    Host(HostCommand),

    /// Drive a remote host from this terminal
    #[command(about)]
    Drive(DriveCommand),

    /// Play a trajectory log back into the simulation
    #[command(about)]
    Replay(ReplayCommand),

    /// Print the header and records of a trajectory log
    #[command(about)]
    Dump(DumpCommand),
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct LocalCommand {
    /// Record the session under this name in the trajectory directory
    #[arg(short = 'r', long = "record")]
    pub record: Option<String>,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct HostCommand {
    /// Port to listen on, overriding the config
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Record the session under this name in the trajectory directory
    #[arg(short = 'r', long = "record")]
    pub record: Option<String>,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct DriveCommand {
    /// Host address as `host:port`. Defaults to the config's host and port
    pub addr: Option<String>,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct ReplayCommand {
    /// Trajectory log to play
    pub file: PathBuf,

    /// Pause between records, in milliseconds
    #[arg(short = 'd', long = "delay", default_value_t = 10)]
    pub delay_ms: u64,
}

#[derive(Debug, Args, Clone)]
#[command(version, about)]
pub struct DumpCommand {
    /// Trajectory log to print
    pub file: PathBuf,

    /// Print at most this many records
    #[arg(short = 'n', long = "limit")]
    pub limit: Option<usize>,
}
