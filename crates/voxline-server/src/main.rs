//! `voxline` binary entry point.
//!
//! Configuration layering: built-in defaults ← optional TOML file
//! (`--config`) ← environment (`VOXLINE_*`) ← command-line flags. After
//! that it is all [`voxline_server::bootstrap`].

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use voxline_core::settings::Settings;
use voxline_server::bootstrap::bootstrap;
use voxline_server::{CallServer, admin};

#[derive(Debug, Parser)]
#[command(name = "voxline", about = "Real-time voice agent for inbound calls")]
struct Cli {
    /// Path to a TOML settings file.
    #[arg(long, env = "VOXLINE_CONFIG")]
    config: Option<PathBuf>,

    /// TCP port for PBX audio ingress.
    #[arg(long, env = "VOXLINE_AUDIOSOCKET_PORT")]
    port: Option<u16>,

    /// Port for the admin surface (health + metrics).
    #[arg(long, env = "VOXLINE_ADMIN_PORT")]
    admin_port: Option<u16>,

    /// Session store URL.
    #[arg(long, env = "VOXLINE_REDIS_URL")]
    redis_url: Option<String>,

    /// Backing store base URL.
    #[arg(long, env = "VOXLINE_STORE_BASE_URL")]
    store_base_url: Option<String>,

    /// Backing store API key.
    #[arg(long, env = "VOXLINE_STORE_API_KEY", hide_env_values = true)]
    store_api_key: Option<String>,
}

impl Cli {
    /// Resolve layered settings.
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading {}", path.display()))?;
                toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
            }
            None => Settings::default(),
        };

        if let Some(port) = self.port {
            settings.audiosocket.port = port;
        }
        if let Some(port) = self.admin_port {
            settings.admin.port = port;
        }
        if let Some(url) = &self.redis_url {
            settings.session.redis_url.clone_from(url);
        }
        if let Some(url) = &self.store_base_url {
            settings.store.base_url.clone_from(url);
        }
        if let Some(key) = &self.store_api_key {
            settings.store.api_key.clone_from(key);
        }

        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = cli.settings()?;

    let ingress_addr = format!("0.0.0.0:{}", settings.audiosocket.port);
    let admin_addr = format!("0.0.0.0:{}", settings.admin.port);

    let ctx = bootstrap(settings).await?;

    let ingress = TcpListener::bind(&ingress_addr)
        .await
        .with_context(|| format!("binding {ingress_addr}"))?;
    let admin_listener = TcpListener::bind(&admin_addr)
        .await
        .with_context(|| format!("binding {admin_addr}"))?;

    // One shutdown token; SIGINT/SIGTERM fire it.
    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let admin_task = tokio::spawn(admin::serve(
        admin_listener,
        ctx.admin,
        shutdown.clone(),
    ));

    let server = CallServer::new(
        ctx.deps,
        ctx.pipeline_config,
        ctx.server_config,
        ctx.registry,
    );
    server.serve(ingress, shutdown.clone()).await;

    // The call server has drained; let the admin surface go too.
    shutdown.cancel();
    if let Ok(Err(e)) = admin_task.await {
        tracing::warn!(error = %e, "Admin server error during shutdown");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

/// Fire `shutdown` on SIGINT or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("Ctrl-C received");
    }

    shutdown.cancel();
}
