use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "warden")]
#[command(version, about = "Confinement zone host: timed restrictions with automatic release")]
pub struct Cli {
    /// Config file (defaults to ./warden.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the data directory
    #[arg(short, long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Load data, run the expiration sweep and apply releases until signalled
    Run,
    /// Print every zone as JSON
    Zones,
    /// Print every active restriction with its remaining time as JSON
    List,
    /// Print the effective settings as JSON
    Config,
}
