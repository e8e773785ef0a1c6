//! Berth orchestrator
//!
//! Serves the container lifecycle API on top of the local Docker engine.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::HeaderName;
use clap::{Parser, Subcommand};
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use berth_orchestrator::api::{create_jwt, create_router, hash_api_key};
use berth_orchestrator::audit::{AuditLogger, SiemFormat};
use berth_orchestrator::config::AppConfig;
use berth_orchestrator::container::{ContainerManager, DockerRuntime};
use berth_orchestrator::logging::init_logging;
use berth_orchestrator::AppState;

/// Berth orchestrator - preview container lifecycle service
#[derive(Parser)]
#[command(name = "berth-orchestrator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,

    /// Print the argon2 hash of an API key, for `security.api_keys`
    HashKey {
        key: String,
    },

    /// Print a JWT for a caller, signed with the configured secret
    IssueToken {
        caller: String,

        /// Lifetime in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::HashKey { key } => {
            println!("{}", hash_api_key(&key)?);
            Ok(())
        }
        Command::IssueToken { caller, ttl } => {
            let config = AppConfig::load()?;
            println!("{}", create_jwt(&caller, &config.security.jwt_secret, ttl)?);
            Ok(())
        }
    }
}

async fn serve() -> Result<()> {
    let config = AppConfig::load()?;

    init_logging(&config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Berth orchestrator"
    );

    if config.metrics.enabled {
        berth_orchestrator::metrics::init_metrics()?;
        info!("Prometheus metrics initialized");
    }

    let audit_format: SiemFormat = config.audit_format.parse()?;
    let audit_logger = Arc::new(AuditLogger::new(audit_format));
    info!(format = %config.audit_format, "Audit logger initialized");

    let runtime = DockerRuntime::connect(config.runtime.clone())
        .await
        .context("Failed to connect to Docker")?;
    let container_manager = ContainerManager::new(&config, Arc::new(runtime));

    let state = Arc::new(AppState::new(
        config.clone(),
        container_manager,
        audit_logger,
    ));

    let x_request_id = HeaderName::from_static("x-request-id");
    let app = create_router(state.clone())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let addr: SocketAddr = config
        .listen_addr()
        .parse()
        .with_context(|| format!("Invalid listen address {}", config.listen_addr()))?;
    info!(%addr, "Listening on");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");

    if config.stop_containers_on_shutdown {
        warn!("Destroying all managed containers...");
        let destroyed = state.container_manager.destroy_all().await;
        info!(destroyed, "Managed containers destroyed");
    }

    info!("Berth orchestrator stopped");
    Ok(())
}

/// Handle shutdown signals gracefully
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
