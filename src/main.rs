use pumpout_gateway::api::{self, AppState};
use pumpout_gateway::config::AppConfig;
use pumpout_gateway::database::credential_repository::{CredentialRepository, CredentialStore};
use pumpout_gateway::database::init_pool_from_config;
use pumpout_gateway::database::memory::{InMemoryCredentialStore, InMemoryTransactionLedger};
use pumpout_gateway::database::transaction_repository::{
    TransactionLedger, TransactionRepository,
};
use pumpout_gateway::health::HealthChecker;
use pumpout_gateway::logging::{init_tracing, mask_secret};
use pumpout_gateway::services::PaymentGateway;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    init_tracing(&config.logging).map_err(|e| anyhow::anyhow!(e))?;
    config.validate()?;

    info!(
        app_id = %mask_secret(&config.gateway.app_id),
        environment = config.gateway.environment.as_str(),
        region = config.gateway.region.as_str(),
        merchant_id = ?config.gateway.merchant_id,
        "Starting payment gateway service"
    );

    let (credentials, ledger, db_pool): (
        Arc<dyn CredentialStore>,
        Arc<dyn TransactionLedger>,
        Option<sqlx::PgPool>,
    ) = match &config.database {
        Some(database) => {
            let pool = init_pool_from_config(database).await?;
            (
                Arc::new(CredentialRepository::new(pool.clone())),
                Arc::new(TransactionRepository::new(pool.clone())),
                Some(pool),
            )
        }
        None => {
            warn!("DATABASE_URL not set, using in-memory stores; nothing survives a restart");
            (
                Arc::new(InMemoryCredentialStore::new()),
                Arc::new(InMemoryTransactionLedger::new()),
                None,
            )
        }
    };

    let gateway = Arc::new(PaymentGateway::new(config.gateway, credentials, ledger)?);

    let mut health = HealthChecker::new(gateway.clone());
    if let Some(pool) = db_pool {
        health = health.with_database(pool);
    }
    let state = AppState::new(gateway).with_health(health);
    let app = api::router(state);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
