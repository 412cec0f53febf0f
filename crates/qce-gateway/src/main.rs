use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::info;

use qce_bridge::HttpBridge;
use qce_core::config::QceConfig;
use qce_engine::{spawn_fired_consumer, EngineConfig, ExportEngine};
use qce_resources::ResourceStore;
use qce_scheduler::SchedulerEngine;
use qce_store::TaskStore;

mod app;
mod http;
mod ws;

#[derive(Parser, Debug)]
#[command(name = "qce-gateway", about = "QQ chat exporter service", version)]
struct Args {
    /// Path to config.toml (default: ~/.qq-chat-exporter/config.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "qce_gateway=info,qce_engine=info,tower_http=warn".into()),
        )
        .init();

    let args = Args::parse();
    let config = QceConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("config load failed ({e}), using defaults");
        QceConfig::default()
    });

    // Storage layout under ~/.qq-chat-exporter/.
    std::fs::create_dir_all(config.exports_dir())?;
    std::fs::create_dir_all(config.scheduled_exports_dir())?;

    let store = Arc::new(TaskStore::open(config.db_path())?);
    let resource_store = Arc::new(ResourceStore::new(config.resources_dir())?);
    let bridge = Arc::new(HttpBridge::new(
        config.bridge.base_url.clone(),
        config.bridge.token.clone(),
    ));

    let engine = ExportEngine::new(
        Arc::clone(&bridge) as Arc<dyn qce_bridge::Bridge>,
        Arc::clone(&store),
        Arc::clone(&resource_store),
        EngineConfig {
            exports_dir: config.exports_dir(),
            max_concurrent_downloads: config.resources.max_concurrent_downloads,
            download_timeout_ms: config.resources.download_timeout_ms,
            download_stall_secs: qce_core::config::DOWNLOAD_STALL_SECS,
        },
    );

    // Crash recovery before anything can subscribe.
    let orphaned = engine.load_existing_tasks()?;
    if orphaned > 0 {
        info!(orphaned, "orphaned tasks from a previous run marked failed");
    }

    // Scheduler → engine pipeline.
    let (fired_tx, fired_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = SchedulerEngine::new(Arc::clone(&store), fired_tx);
    tokio::spawn(scheduler.run(shutdown_rx));
    spawn_fired_consumer(Arc::clone(&engine), fired_rx);

    // Periodic resource health scan.
    qce_resources::spawn_health_scan(
        Arc::clone(&resource_store),
        Arc::clone(&store),
        std::time::Duration::from_secs(config.resources.health_check_interval_secs),
        CancellationToken::new(),
    );

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(
        config,
        bridge as Arc<dyn qce_bridge::Bridge>,
        store,
        engine,
    ));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("qce gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}
