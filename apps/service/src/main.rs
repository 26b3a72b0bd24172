use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use logger::TracingOptions;
use uptime_service::alerts::{AlertSender, LogOnlySender, TwilioSender};
use uptime_service::monitoring::HttpProber;
use uptime_service::storage::{FileLogStore, FileRecordStore, LogStore};
use uptime_service::{Config, Engine, EngineConfig};

#[derive(Debug, Parser)]
#[command(version, about = "Periodically probes HTTP/HTTPS checks and alerts on state changes")]
struct Cli {
    /// Config file, defaults to $XDG_CONFIG_HOME/uptime/config.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the check and rotation loops until interrupted
    Run,
    /// Evaluate every check once
    Sweep,
    /// Rotate every active log once
    Rotate,
    /// List log segments
    Logs {
        /// Include compressed archives
        #[arg(long)]
        compressed: bool,
    },
    /// Print an active log segment or a decompressed archive
    Log { name: String },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_config(cli.config.as_ref()).context("Failed to load configuration")?;
    logger::init_tracing(&TracingOptions {
        level: config.logging.level_filter()?,
        format: config.logging.format,
    });

    match cli.command.unwrap_or(Command::Run) {
        Command::Config => {
            print!("{config}");
            Ok(())
        }
        Command::Logs { compressed } => {
            let logs = open_logs(&config).await?;
            let mut names = logs.list(compressed).await?;
            names.sort();
            for name in names {
                println!("{name}");
            }
            Ok(())
        }
        Command::Log { name } => {
            let logs = open_logs(&config).await?;
            let text = match logs.read(&name).await {
                Ok(text) => text,
                Err(_) => logs.decompress(&name).await.with_context(|| format!("No log named {name}"))?,
            };
            print!("{text}");
            Ok(())
        }
        Command::Sweep => {
            let engine = build_engine(&config).await?;
            let report = engine.run_check_sweep().await;
            for evaluated in &report.evaluated {
                println!("{} {} ({})", evaluated.check_id, evaluated.state, evaluated.outcome);
            }
            for failure in &report.failures {
                println!("error: {failure}");
            }
            Ok(())
        }
        Command::Rotate => {
            let engine = build_engine(&config).await?;
            let report = engine.run_rotation_sweep().await;
            for rotated in &report.rotated {
                println!("{} -> {} ({} bytes)", rotated.log_id, rotated.archive_id, rotated.bytes);
            }
            for failure in &report.failures {
                println!("error: {failure}");
            }
            Ok(())
        }
        Command::Run => {
            let engine = Arc::new(build_engine(&config).await?);
            let handle = engine.start();
            tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;
            info!("Shutting down");
            handle.shutdown();
            Ok(())
        }
    }
}

async fn open_logs(config: &Config) -> Result<FileLogStore> {
    FileLogStore::new(&config.storage.log_dir)
        .await
        .with_context(|| format!("Failed to open log directory {:?}", config.storage.log_dir))
}

async fn build_engine(config: &Config) -> Result<Engine> {
    let records = FileRecordStore::new(&config.storage.data_dir)
        .await
        .with_context(|| format!("Failed to open data directory {:?}", config.storage.data_dir))?;
    let logs = open_logs(config).await?;
    let prober = HttpProber::new().context("Failed to build HTTP client")?;

    let alerts: Arc<dyn AlertSender> = match &config.twilio {
        Some(twilio) => Arc::new(TwilioSender::new(twilio.clone()).context("Failed to build SMS client")?),
        None => {
            warn!("No [twilio] section configured, alerts will only be logged");
            Arc::new(LogOnlySender)
        }
    };

    Ok(Engine::new(
        Arc::new(records),
        Arc::new(logs),
        Arc::new(prober),
        alerts,
        EngineConfig {
            check_interval: Duration::from_secs(config.schedule.check_interval_seconds),
            rotation_interval: Duration::from_secs(config.schedule.rotation_interval_seconds),
            rotate_on_start: config.schedule.rotate_on_start,
        },
    ))
}
