use cla_service::{
    AppState, build_router,
    config::ClaConfig,
    services::{ClaDb, EmailProvider, LogEmailService, SmtpEmailService, SystemClock},
};
use service_core::observability::{init_metrics, init_tracing};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), service_core::error::AppError> {
    // Load configuration - fail fast if invalid
    let config = ClaConfig::from_env()?;

    init_tracing(&config.service_name, &config.log_level);
    init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting CLA signing service"
    );

    tracing::info!("Initializing database connection");
    let db = ClaDb::connect(
        &config.mongodb.uri,
        &config.mongodb.database,
        config.mongodb.timeout_seconds,
    )
    .await?;
    db.initialize_indexes().await?;
    tracing::info!("Database initialized successfully");

    let email: Arc<dyn EmailProvider> = if config.smtp.enabled {
        Arc::new(SmtpEmailService::new(&config.smtp)?)
    } else {
        tracing::warn!("SMTP disabled, notifications are logged and dropped");
        Arc::new(LogEmailService)
    };

    let db = Arc::new(db);
    let state = AppState::new(
        config.clone(),
        db.clone(),
        db,
        email,
        Arc::new(SystemClock),
    );
    tracing::info!(
        login_attempts = config.rate_limit.login_attempts,
        login_window_seconds = config.rate_limit.login_window_seconds,
        "Services initialized"
    );

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
