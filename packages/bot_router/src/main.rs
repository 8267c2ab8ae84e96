use anyhow::{Context, Result};
use bridge_supervisor::BridgeSupervisor;
use clap::Parser;
use std::future::IntoFuture;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

use bot_router::AppState;
use bot_router::auth::AuthGate;
use bot_router::config::{
    AuthConfig, FileConfig, LaunchConfig, ReadinessConfig, ServerConfig, load_config,
};
use bot_router::directory::{RedisDirectory, SessionDirectory};
use bot_router::launcher::BridgeLauncher;
use bot_router::readiness::ReadinessProbe;
use bot_router::registry::InstanceRegistry;

#[derive(Parser)]
#[command(name = "bot-router")]
#[command(about = "On-demand reverse proxy for named terminal sessions")]
struct Cli {
    /// Config file (TOML). Missing file means defaults.
    #[arg(long, default_value = "bot-router.toml")]
    config: PathBuf,

    /// Listen port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "bot_router=debug,bridge_supervisor=debug,tower_http=debug,info"
    } else {
        "bot_router=info,bridge_supervisor=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let mut file_config: FileConfig = load_config(&cli.config)
        .extract()
        .with_context(|| format!("Invalid configuration ({})", cli.config.display()))?;
    if let Some(port) = cli.port {
        file_config.server.port = port;
    }
    if let Some(host) = cli.host {
        file_config.server.host = host;
    }

    let server_config = ServerConfig::from_file(&file_config.server)?;
    let auth_config = AuthConfig::from_file(&file_config.auth);
    let launch_config = LaunchConfig::from_file(&file_config.bridge);
    let readiness_config = ReadinessConfig::from_file(&file_config.bridge);

    if auth_config.generated {
        warn!("No token configured; generated one for this run");
        info!("Access token: {}", auth_config.token);
    }

    let store = RedisDirectory::open(&file_config.directory.redis_url, &file_config.directory.key)
        .context("Invalid Redis URL")?;
    info!(
        "Session directory: hash {} at {}",
        file_config.directory.key, file_config.directory.redis_url
    );

    let registry = InstanceRegistry::new(
        BridgeSupervisor::new(launch_config.base_port),
        BridgeLauncher::from_config(&launch_config),
    );
    info!(
        "Bridges: {} from port {} (tmux socket {})",
        launch_config.program, launch_config.base_port, launch_config.tmux_socket
    );

    let state = AppState::new(
        registry,
        SessionDirectory::new(Arc::new(store)),
        AuthGate::new(auth_config.token),
        ReadinessProbe::from_config(&readiness_config),
    );
    let registry = state.registry.clone();
    let app = bot_router::router(state);

    let listener = tokio::net::TcpListener::bind(server_config.addr)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.addr))?;
    info!("Bot router listening on http://{}", server_config.addr);

    // In-flight connections are not drained
    tokio::select! {
        result = axum::serve(listener, app).into_future() => result.context("Server error")?,
        _ = shutdown_signal() => info!("Received shutdown signal, cleaning up..."),
    }

    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
