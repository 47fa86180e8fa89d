use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tideline::cli::{run_demo, Cli, Commands, ConfigCommand, DemoOptions};
use tideline::ManagerConfig;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => ManagerConfig::default_config_file()
            .context("Failed to determine configuration path"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let path = config_path(&cli)?;

    match cli.command {
        Commands::Demo {
            count,
            timeout,
            drop_replies,
            latency_ms,
        } => {
            let mut config = ManagerConfig::load_or_default(&path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            if let Some(secs) = timeout {
                config.timeout = Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("Invalid timeout: {}", secs))?;
            }
            config.validate().context("Invalid configuration")?;

            info!(
                "Running {} requests (timeout {:.2}s, replies {})",
                count,
                config.timeout.as_secs_f64(),
                if drop_replies { "dropped" } else { "echoed" }
            );
            let report = run_demo(DemoOptions {
                count,
                drop_replies,
                latency: Duration::from_millis(latency_ms),
                config,
            })
            .await?;
            println!("{}", report);
            if report.failed > 0 {
                warn!("{} requests failed", report.failed);
            }
        }
        Commands::Config { command } => match command {
            ConfigCommand::Path => {
                println!("{}", path.display());
                if !path.exists() {
                    info!("Configuration file does not exist yet");
                    info!("Run 'tideline config init' to create it");
                }
            }
            ConfigCommand::Show => match ManagerConfig::load_or_default(&path) {
                Ok(config) => print!("{}", config.to_toml()?),
                Err(e) => error!("Failed to load {}: {}", path.display(), e),
            },
            ConfigCommand::Init => {
                if path.exists() {
                    warn!("Overwriting existing configuration at {}", path.display());
                }
                ManagerConfig::default()
                    .save(&path)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Configuration written to {}", path.display());
            }
        },
    }

    Ok(())
}
