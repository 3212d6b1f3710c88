//! # gridhubd
//!
//! Gridhub daemon binary — registers module factories, loads the config,
//! activates the configured instances, and runs the engine behind the
//! HTTP/WebSocket server.

#![deny(unsafe_code)]

mod clock;
mod settings;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridhub_core::ids::ModuleId;
use gridhub_engine::Engine;
use gridhub_modules::ModuleRegistry;
use gridhub_server::GridhubServer;

/// Gridhub dashboard engine daemon.
#[derive(Parser, Debug)]
#[command(name = "gridhubd", about = "Gridhub dashboard engine daemon")]
struct Cli {
    /// Host to bind (overrides config).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides config; 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Path to the config file (default `~/.gridhub/config.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Artifact cache root (overrides config).
    #[arg(long)]
    cache_root: Option<PathBuf>,
}

/// Register every built-in module factory.
///
/// Explicit composition: a new adapter is one `register_factory` line here.
fn register_factories(registry: &mut ModuleRegistry) {
    registry.register_factory(Arc::new(clock::ClockFactory));
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Cli::parse();
    let config_path = args.config.unwrap_or_else(settings::default_config_path);
    let mut config = settings::load_from_path(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.cache_root {
        config.engine.artifact_root = root;
    }

    let mut registry = ModuleRegistry::new();
    register_factories(&mut registry);

    let engine = Arc::new(Engine::new(registry, &config.engine));

    // A broken module entry skips that instance, never the daemon.
    for module in &config.modules {
        if let Err(e) = engine.activate_module(
            &module.kind,
            ModuleId::from(module.id.clone()),
            module.settings.clone(),
        ) {
            warn!(module_id = %module.id, kind = %module.kind, error = %e, "module activation failed, skipping");
        }
    }
    info!(
        instances = engine.registry().len(),
        configured = config.modules.len(),
        "modules activated"
    );

    let server = GridhubServer::new(config.server.clone(), engine.clone());
    let engine_handle = engine.start(server.shutdown().token());
    server.shutdown().register("engine", engine_handle);

    // Ctrl-C cancels the shared token; the server's accept loop and the
    // engine's scheduler both observe it.
    let signal_shutdown = server.shutdown().clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal_shutdown.shutdown();
        }
    });

    server.serve().await.context("server failed")?;

    server.shutdown().drain(None).await;
    signal_task.abort();
    info!("shutdown complete");
    Ok(())
}
