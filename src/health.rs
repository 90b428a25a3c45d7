//! Health check module
//! Reports the status of the ledger database and the gateway authorization.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::services::payment_gateway::PaymentGateway;

/// Health status response
#[derive(Debug, Serialize, Clone)]
pub struct HealthStatus {
    pub status: HealthState,
    pub checks: HashMap<String, ComponentHealth>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Clone)]
pub struct ComponentHealth {
    pub status: ComponentState,
    pub response_time_ms: Option<u128>,
    pub details: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub enum ComponentState {
    Up,
    Down,
    Warning,
}

impl HealthStatus {
    pub fn new() -> Self {
        Self {
            status: HealthState::Healthy,
            checks: HashMap::new(),
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self.status, HealthState::Healthy)
    }
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self::new()
    }
}

impl ComponentHealth {
    pub fn up(response_time_ms: Option<u128>) -> Self {
        Self {
            status: ComponentState::Up,
            response_time_ms,
            details: None,
        }
    }

    pub fn down(details: Option<String>) -> Self {
        Self {
            status: ComponentState::Down,
            response_time_ms: None,
            details,
        }
    }

    pub fn warning(response_time_ms: Option<u128>, details: Option<String>) -> Self {
        Self {
            status: ComponentState::Warning,
            response_time_ms,
            details,
        }
    }
}

#[derive(Clone)]
pub struct HealthChecker {
    #[cfg(feature = "database")]
    db_pool: Option<sqlx::PgPool>,
    gateway: Arc<PaymentGateway>,
}

impl HealthChecker {
    pub fn new(gateway: Arc<PaymentGateway>) -> Self {
        Self {
            #[cfg(feature = "database")]
            db_pool: None,
            gateway,
        }
    }

    #[cfg(feature = "database")]
    pub fn with_database(mut self, pool: sqlx::PgPool) -> Self {
        self.db_pool = Some(pool);
        self
    }

    /// A missing merchant authorization degrades the service; a failing
    /// database makes it unhealthy.
    pub async fn check_health(&self) -> HealthStatus {
        let mut health_status = HealthStatus::new();
        let mut unhealthy = false;
        let mut degraded = false;

        #[cfg(feature = "database")]
        if let Some(pool) = &self.db_pool {
            let start = Instant::now();
            match timeout(Duration::from_secs(5), crate::database::health_check(pool)).await {
                Ok(Ok(())) => {
                    let response_time = start.elapsed().as_millis();
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::up(Some(response_time)),
                    );
                    info!("Database health check: OK ({}ms)", response_time);
                }
                Ok(Err(e)) => {
                    unhealthy = true;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some(e.to_string())),
                    );
                    error!("Database health check failed: {}", e);
                }
                Err(_) => {
                    unhealthy = true;
                    health_status.checks.insert(
                        "database".to_string(),
                        ComponentHealth::down(Some("Timeout".to_string())),
                    );
                    error!("Database health check timed out");
                }
            }
        }

        let start = Instant::now();
        match timeout(Duration::from_secs(5), self.gateway.is_authorized()).await {
            Ok(Ok(true)) => {
                health_status.checks.insert(
                    "gateway_authorization".to_string(),
                    ComponentHealth::up(Some(start.elapsed().as_millis())),
                );
            }
            Ok(Ok(false)) => {
                degraded = true;
                health_status.checks.insert(
                    "gateway_authorization".to_string(),
                    ComponentHealth::warning(
                        None,
                        Some("merchant has not authorized the application".to_string()),
                    ),
                );
                warn!("Gateway authorization missing");
            }
            Ok(Err(e)) => {
                degraded = true;
                health_status.checks.insert(
                    "gateway_authorization".to_string(),
                    ComponentHealth::warning(None, Some(e.to_string())),
                );
                warn!(error = %e, "Gateway authorization check failed");
            }
            Err(_) => {
                degraded = true;
                health_status.checks.insert(
                    "gateway_authorization".to_string(),
                    ComponentHealth::warning(None, Some("Timeout".to_string())),
                );
            }
        }

        health_status.status = if unhealthy {
            HealthState::Unhealthy
        } else if degraded {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        health_status
    }
}
