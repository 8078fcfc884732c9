//! scalewardd: the Scaleward daemon.
//!
//! Loads the configuration, starts the rule output sink and serves the
//! control surface. Policies are started and stopped over HTTP.
//!
//! # Usage
//!
//! ```text
//! scalewardd --config /etc/scaleward/scaleward.toml --dryrun k8s,optimizer
//! ```

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use scaleward_api::{ApiState, build_router};
use scaleward_policy::{DryRun, KeeperConfig};
use scaleward_rules::OutputSink;
use scaleward_session::{Backends, SessionSettings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scalewardd", about = "Scaleward autoscaling daemon")]
struct Cli {
    /// Configuration file (TOML). Defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(long)]
    listen: Option<String>,

    /// Components to run in dry-run mode: comma-separated list of
    /// occopus, terraform, k8s, prometheus, optimizer, or "all".
    #[arg(long)]
    dryrun: Option<String>,

    /// Log as JSON lines.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = match &cli.config {
        Some(path) => KeeperConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => KeeperConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(list) = &cli.dryrun {
        config.dryrun = DryRun::parse_list(list).context("parsing --dryrun")?;
    }
    info!(
        listen = %config.listen,
        dryrun = ?config.dryrun,
        cycle_secs = config.cycle_interval_secs,
        "scaleward daemon starting"
    );

    let sink = OutputSink::start();
    let state = ApiState::new(
        Backends::live(&config),
        SessionSettings::from(&config),
        sink.writer(),
    );
    let router = build_router(state.clone());

    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(addr = %config.listen, "API server starting");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await?;

    state.shutdown().await;
    drop(state);
    sink.stop().await;
    info!("scaleward daemon stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scaleward=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
