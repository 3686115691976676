use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::commands::CommandHandlers;
use crate::config::{AppConfig, ProbeMode};
use crate::persist::SnapshotStore;
use crate::prober::{LivenessCheck, Prober, SimulatedLivenessCheck, TcpLivenessCheck};
use crate::query::QueryFacade;
use crate::registry::Registry;
use crate::types::NetworkType;
use crate::web::AppState;

mod commands;
mod config;
mod error;
mod persist;
mod prober;
mod query;
mod registry;
mod telemetry;
mod types;
mod web;

const DEFAULT_CONFIG_PATH: &str = "config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init_telemetry();

    // CLI argument wins over the environment
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CCTV_CONFIG").ok())
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config = AppConfig::load(&config_path)?;
    info!("⚙️ Configuration loaded: {:?}", config);

    let registry = Arc::new(Registry::new());

    let snapshots = config.snapshot_path.clone().map(SnapshotStore::new);
    if let Some(store) = &snapshots {
        let records = store
            .load_or_quarantine()
            .await
            .with_context(|| format!("failed to read snapshot {}", store.path().display()))?;
        let restored = registry.restore(records).await;
        info!(
            "📂 Restored {} cameras from {} ({} in registry)",
            restored,
            store.path().display(),
            registry.len().await
        );
    }

    let prober_handle = if config.auto_refresh {
        let check: Arc<dyn LivenessCheck> = match config.probe_mode {
            ProbeMode::Tcp => Arc::new(TcpLivenessCheck),
            ProbeMode::Simulated => Arc::new(SimulatedLivenessCheck::new(config.simulated_online_probability)),
        };
        let prober = Arc::new(Prober::new(registry.clone(), check, config.prober_settings()));
        Some(prober.start())
    } else {
        info!("⏸️ Auto refresh disabled, liveness prober not started");
        None
    };

    let state = Arc::new(AppState {
        commands: CommandHandlers::new(registry.clone(), config.default_resolution, snapshots),
        queries: QueryFacade::new(registry.clone()),
        config: config.clone(),
    });

    let shutdown = CancellationToken::new();
    let web_state = state.clone();
    let web_shutdown = shutdown.clone();
    let web_port = config.http_port;
    let web_handle = tokio::spawn(async move {
        let result = web::start_web_server(web_port, web_state, web_shutdown.clone()).await;
        if let Err(e) = &result {
            error!("Web server failed: {}", e);
            web_shutdown.cancel();
        }
        result
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("🛑 Shutdown requested");
        }
        _ = shutdown.cancelled() => {}
    }

    shutdown.cancel();
    if let Some(handle) = prober_handle {
        handle.stop().await;
    }
    let web_result = match web_handle.await {
        Ok(result) => result.map_err(|e| anyhow::anyhow!(e)),
        Err(e) => Err(anyhow::anyhow!("web server task failed: {}", e)),
    };

    // Liveness changes are only persisted alongside commands; catch up now.
    state.commands.persist().await;

    info!(
        "📷 Final fleet state: {} online, {} internal, {} external",
        state.queries.count_online().await,
        state.queries.count_by_network_type(NetworkType::Internal).await,
        state.queries.count_by_network_type(NetworkType::External).await
    );

    web_result?;
    info!("🛑 Server shutdown complete");
    Ok(())
}
