// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use relay_adapters::AdapterManager;
use relay_bus::SubscriptionBus;
use relay_daemon::{AppState, build_app, build_disabled_app};
use relay_engine::RelayEngine;
use relay_store::Store;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "relay-daemon", version, about = "Relay message bus daemon")]
struct Args {
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address override.
    #[arg(long)]
    bind: Option<String>,

    /// SQLite database path override.
    #[arg(long)]
    storage: Option<String>,

    /// Enable request/response debug logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::new("relay=debug,relay_daemon=debug")
    } else {
        EnvFilter::new("relay=info,relay_daemon=info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = relay_config::load_config(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    if let Some(storage) = args.storage {
        config.storage_path = storage;
    }
    for warning in relay_config::warnings(&config) {
        warn!(%warning, "config warning");
    }

    if !config.enabled {
        let app = build_disabled_app();
        let listener = tokio::net::TcpListener::bind(&config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;
        info!(bind = %config.bind, "relay disabled, serving 503s");
        return axum::serve(listener, app).await.context("serve");
    }

    if let Some(parent) = std::path::Path::new(&config.storage_path).parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create storage dir {}", parent.display()))?;
    }
    let store = Store::open(std::path::Path::new(&config.storage_path))
        .with_context(|| format!("open store {}", config.storage_path))?;

    let bus = SubscriptionBus::new(Duration::from_millis(config.handler_budget_ms));
    let engine = RelayEngine::new(&store, bus);
    let manager = AdapterManager::new(engine.clone(), &store);
    let loaded = manager.load_persisted().await?;
    info!(adapters = loaded, "adapters loaded");

    let pruner = engine.spawn_trace_pruner(config.trace_retention_days);

    let state = Arc::new(AppState {
        config: config.clone(),
        store,
        engine,
        manager: manager.clone(),
        started_at: Instant::now(),
    });
    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(
        bind = %config.bind,
        storage = %config.storage_path,
        "relay-daemon listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await
        .context("serve")?;

    // Release in reverse order: edge has stopped accepting, now adapters,
    // then the background pruner; stores close with the process.
    manager.stop_all().await;
    pruner.abort();
    info!("relay-daemon stopped");
    Ok(())
}
