//! dbwatch: run MySQL monitoring metrics by hand.
//!
//! # Usage
//!
//! ```text
//! dbwatch --config dbwatch.toml get mysql.version primary
//! dbwatch --config dbwatch.toml watch mysql.ping primary --every 5
//! dbwatch --config dbwatch.toml check
//! dbwatch metrics
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use dbwatch_conn::PluginOptions;
use dbwatch_conn::config::DEFAULT_GLOBAL_TIMEOUT_SECS;
use dbwatch_metrics::{CATALOG, Plugin};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "dbwatch", about = "MySQL monitoring metrics")]
struct Cli {
    /// Plugin configuration file. Built-in defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Agent-wide timeout in seconds, used when the config sets none.
    #[arg(long, global = true, default_value_t = DEFAULT_GLOBAL_TIMEOUT_SECS)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Collect one metric and print its value.
    Get {
        metric: String,
        /// Metric parameters: target, user, password, then metric-specific ones.
        params: Vec<String>,
    },

    /// Collect a metric repeatedly until Ctrl-C.
    Watch {
        metric: String,
        params: Vec<String>,

        /// Seconds between collections.
        #[arg(long, default_value = "10")]
        every: u64,
    },

    /// Validate the configuration and exit.
    Check,

    /// List supported metrics.
    Metrics,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dbwatch=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Metrics => {
            for metric in CATALOG {
                println!("{:<30} {}", metric.key, metric.description);
            }
            Ok(())
        }
        Command::Check => {
            let options = load_options(cli.config.as_deref(), cli.timeout)?;
            options.validate().context("invalid configuration")?;
            info!(sessions = options.sessions.len(), "configuration is valid");
            Ok(())
        }
        Command::Get { metric, params } => {
            let options = load_options(cli.config.as_deref(), cli.timeout)?;
            let plugin = Plugin::start(options)?;
            let result = plugin.export(&metric, &params).await;
            plugin.stop().await;
            println!("{}", result?);
            Ok(())
        }
        Command::Watch {
            metric,
            params,
            every,
        } => {
            let options = load_options(cli.config.as_deref(), cli.timeout)?;
            run_watch(options, &metric, &params, Duration::from_secs(every.max(1))).await
        }
    }
}

fn load_options(path: Option<&Path>, global_timeout: u64) -> anyhow::Result<PluginOptions> {
    let options = match path {
        Some(path) => PluginOptions::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => PluginOptions::default(),
    };
    Ok(options.configure(global_timeout))
}

async fn run_watch(
    options: PluginOptions,
    metric: &str,
    params: &[String],
    every: Duration,
) -> anyhow::Result<()> {
    let plugin = Plugin::start(options)?;
    info!(metric, every = ?every, "watching metric");

    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match plugin.export(metric, params).await {
                    Ok(value) => println!("{value}"),
                    Err(e) => warn!(error = %e, metric, "collection failed"),
                }
            }
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for Ctrl-C");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    plugin.manager().log_stats().await;
    plugin.stop().await;
    Ok(())
}
