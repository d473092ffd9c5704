//! Event Grid Simulator
//!
//! Binds one HTTP listener per configured topic and serves the ingestion
//! endpoint on each of them. Events are fanned out to the topic's
//! subscribers, or saved to the fallback folder when it has none.
//!
//! TLS is not terminated here; put a TLS proxy in front when publishers
//! require HTTPS.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use eg_api::{create_router, ListenerPort};
use eg_config::SimulatorConfig;
use eg_router::{
    Dispatcher, HttpSubscriberClient, HttpSubscriberClientConfig, TempFolderStore, TopicRegistry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Event Grid Simulator
#[derive(Parser, Debug)]
#[command(name = "eg-simulator")]
#[command(about = "Local event-routing endpoint with per-topic listeners and webhook fan-out")]
struct Args {
    /// Topic configuration file (.toml or .json)
    #[arg(long, env = "EG_CONFIG", default_value = "eventgrid.toml")]
    config: PathBuf,

    /// Address every topic listener binds to
    #[arg(long, env = "EG_BIND_ADDRESS", default_value = "127.0.0.1")]
    bind_address: IpAddr,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "EG_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Log output format
    #[arg(long, env = "EG_LOG_FORMAT", value_enum, default_value = "text")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    init_tracing(args.log_format);

    info!("Starting Event Grid Simulator");

    // 1. Configuration
    let config = SimulatorConfig::load(&args.config)
        .with_context(|| format!("failed to load configuration from {}", args.config.display()))?;

    // 2. Metrics
    if let Some(port) = args.metrics_port {
        let addr = SocketAddr::new(args.bind_address, port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        info!(%addr, "Prometheus metrics exporter listening");
    }

    // 3. Registry, delivery client, fallback store
    let registry = Arc::new(TopicRegistry::from_config(&config)?);
    let client = Arc::new(HttpSubscriberClient::new(HttpSubscriberClientConfig::default())?);
    let store = Arc::new(TempFolderStore::new(config.fallback_root()));
    let fallback_root = store.root().to_path_buf();
    let dispatcher = Arc::new(Dispatcher::new(client, store));

    let app = create_router(registry.clone(), dispatcher).layer(TraceLayer::new_for_http());

    // 4. One listener per topic
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut servers = Vec::with_capacity(registry.len());

    for topic in registry.topics() {
        let addr = SocketAddr::new(args.bind_address, topic.port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind topic '{}' to {}", topic.name, addr))?;

        info!(
            topic = %topic.name,
            url = %format!("http://{}/api/events", addr),
            subscribers = topic.subscribers.len(),
            "Topic listener started"
        );

        let service = app.clone().into_make_service_with_connect_info::<ListenerPort>();
        let mut shutdown = shutdown_rx.clone();
        let topic_name = topic.name.clone();

        servers.push(tokio::spawn(async move {
            let result = axum::serve(listener, service)
                .with_graceful_shutdown(async move {
                    let _ = shutdown.wait_for(|stop| *stop).await;
                })
                .await;
            if let Err(e) = result {
                error!(topic = %topic_name, error = %e, "Topic listener failed");
            }
        }));
    }

    log_startup_summary(&registry, &fallback_root);

    info!("Event Grid Simulator started. Press Ctrl+C to shutdown.");

    shutdown_signal().await;
    info!("Shutdown signal received...");

    let _ = shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(30), join_all(servers)).await.is_err() {
        warn!("Listeners did not stop within 30s");
    }

    info!("Event Grid Simulator shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}

fn log_startup_summary(registry: &TopicRegistry, fallback_root: &std::path::Path) {
    info!("=== Event Grid Simulator Startup Summary ===");

    for topic in registry.topics() {
        if topic.has_subscribers() {
            let names: Vec<&str> = topic.subscribers.iter().map(|s| s.name.as_str()).collect();
            info!("  {} (port {}): fan-out to {}", topic.name, topic.port, names.join(", "));
        } else if topic.save_events_to_temp_folder {
            info!("  {} (port {}): no subscribers, saving events", topic.name, topic.port);
        } else {
            info!("  {} (port {}): no subscribers, discarding events", topic.name, topic.port);
        }
    }

    info!("  Fallback folder: {}", fallback_root.display());
    info!("============================================");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["eg-simulator"]);
        assert_eq!(args.config, PathBuf::from("eventgrid.toml"));
        assert_eq!(args.bind_address, IpAddr::from([127, 0, 0, 1]));
        assert_eq!(args.log_format, LogFormat::Text);
        assert!(args.metrics_port.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "eg-simulator",
            "--config",
            "appsettings.json",
            "--bind-address",
            "0.0.0.0",
            "--metrics-port",
            "9090",
            "--log-format",
            "json",
        ]);
        assert_eq!(args.config, PathBuf::from("appsettings.json"));
        assert_eq!(args.metrics_port, Some(9090));
        assert_eq!(args.log_format, LogFormat::Json);
    }
}
