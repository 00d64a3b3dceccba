use std::net::SocketAddr;
use std::sync::Arc;

use photoforge_core::throttle::SubmissionThrottle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use photoforge_api::config::ServerConfig;
use photoforge_api::state::AppState;
use photoforge_api::{app, backend};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "photoforge_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid configuration");
    tracing::info!(
        host = %config.host,
        port = %config.port,
        backend = config.backend.name(),
        "Loaded server configuration",
    );

    // --- Generation pipeline ---
    let orchestrator =
        backend::build_orchestrator(&config).expect("Failed to initialise generation backend");
    if orchestrator.templates().is_empty() {
        tracing::warn!(dir = %config.template_dir.display(), "No templates loaded");
    }
    if orchestrator.resolver().is_some() && config.registration_secret.is_none() {
        tracing::warn!("REGISTRATION_SECRET unset, endpoint webhook disabled");
    }

    // --- App state ---
    let state = AppState {
        throttle: Arc::new(SubmissionThrottle::new(config.submission_min_interval)),
        orchestrator: Arc::new(orchestrator),
        config: Arc::new(config.clone()),
    };

    // --- Router ---
    let app = app::build_router(state).expect("Invalid CORS configuration");

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
