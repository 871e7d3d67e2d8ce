//! Command-line arguments of the `sessionwatch` binary.

use clap::Parser;
use sessionwatch::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "sessionwatch",
    version,
    about = "Watches HTTP traffic and collects web-session identities"
)]
pub struct Cli {
    /// Path to the configuration TOML file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Network interface to capture on, overriding `capture_interface`
    #[arg(short, long)]
    pub interface: Option<String>,

    /// BPF filter, overriding `capture_filter`
    #[arg(short, long)]
    pub filter: Option<String>,
}
