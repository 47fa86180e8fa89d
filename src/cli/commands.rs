use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tideline")]
#[command(about = "Resilient request/response messaging over duplex transports")]
pub struct Cli {
    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run requests through a loopback echo transport
    ///
    /// Exercises pacing, correlation and retries without a network.
    /// With --drop-replies every request runs out of retries and fails
    /// with the retries-exhausted sentinel.
    ///
    /// Examples:
    ///   tideline demo
    ///   tideline demo --count 20
    ///   tideline demo --drop-replies --timeout 0.5
    Demo {
        /// Number of requests to send
        #[arg(short, long, default_value_t = 5)]
        count: u32,
        /// Reply timeout in seconds (overrides the config file)
        #[arg(short, long)]
        timeout: Option<f64>,
        /// Never answer, forcing retries and the exhaustion failure
        #[arg(long)]
        drop_replies: bool,
        /// Simulated reply latency in milliseconds
        #[arg(long, default_value_t = 50)]
        latency_ms: u64,
    },

    /// Configuration file management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the configuration file path
    Path,
    /// Print the effective configuration
    Show,
    /// Write the default configuration (overwrites existing)
    Init,
}
