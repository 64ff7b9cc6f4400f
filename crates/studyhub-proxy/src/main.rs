//! StudyHub offline proxy.
//!
//! Runs the offline worker in front of the app origin so its caching
//! behaviour can be exercised with a plain browser or `curl`.

mod adapter;
mod server;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use studyhub_common::{init_logging, LogConfig, LogFormat, StudyHubError};
use studyhub_net::{Fetcher, HttpFetcher, LoaderConfig};
use studyhub_sw::{ServiceWorkerContainer, ServiceWorkerEvent, WorkerConfig};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::server::{router, AppState};

#[derive(Parser, Debug)]
#[command(name = "studyhub-proxy")]
#[command(about = "Offline caching proxy for the StudyHub app")]
#[command(version)]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: LogFormat,

    /// Debug-level logs with source locations
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log filter directives, overriding RUST_LOG (e.g. "studyhub_sw=trace")
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install the worker and serve the app through it
    Serve {
        /// Worker config file (JSON); built-in defaults when omitted
        #[arg(long)]
        config: Option<PathBuf>,

        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:8080")]
        listen: SocketAddr,
    },
    /// Validate a config file and print the effective config
    CheckConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logging = log_config(&cli);

    match cli.command {
        Command::Serve { config, listen } => {
            init_logging(logging);
            serve(config.as_deref(), listen).await
        }
        Command::CheckConfig { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn log_config(cli: &Cli) -> LogConfig {
    let base = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    let config = base.with_format(cli.log_format);
    match cli.log_filter {
        Some(ref filter) => config.with_filter(filter.clone()),
        None => config,
    }
}

fn load_config(path: Option<&Path>) -> Result<WorkerConfig, StudyHubError> {
    let config = match path {
        Some(path) => WorkerConfig::from_json_file(path).map_err(|e| {
            StudyHubError::config_with_source(format!("loading {}", path.display()), e)
        })?,
        None => WorkerConfig::default(),
    };
    config
        .validate()
        .map_err(|e| StudyHubError::config_with_source("invalid worker config", e))?;
    Ok(config)
}

async fn serve(config_path: Option<&Path>, listen: SocketAddr) -> Result<()> {
    let config = load_config(config_path)?;
    let origin = config.origin_url()?;

    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(LoaderConfig::default())?);
    let container = Arc::new(ServiceWorkerContainer::new());

    let (worker, events) = container.new_worker(config, Arc::clone(&fetcher))?;
    tokio::spawn(relay_events(events));

    let worker = container
        .register(worker)
        .await
        .context("worker install failed")?;
    info!(
        worker = worker.id().raw(),
        state = ?worker.state(),
        origin = %origin,
        "Worker registered"
    );

    let app = router(AppState {
        container: Arc::clone(&container),
        fetcher,
        origin,
    });

    info!(%listen, "Starting StudyHub proxy");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("failed to bind {listen}"))?;
    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            result.context("server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    if let Some(active) = container.controller().await {
        active.background().drain().await;
    }
    Ok(())
}

/// Log worker events. The proxy has no windows or notification tray, so
/// these are where such effects become visible.
async fn relay_events(mut events: mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
    while let Some(event) = events.recv().await {
        match serde_json::to_string(&event) {
            Ok(json) => info!(event = %json, "Worker event"),
            Err(e) => warn!(error = %e, "Unserializable worker event"),
        }
    }
}
