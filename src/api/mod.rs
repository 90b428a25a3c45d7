//! HTTP surface of the payment core.

pub mod oauth;
pub mod payments;
pub mod webhooks;

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};

use crate::error::AppError;
use crate::health::{HealthChecker, HealthState};
use crate::middleware::error::get_request_id_from_headers;
use crate::middleware::logging::{request_logging_middleware, UuidRequestId};
use crate::services::payment_gateway::PaymentGateway;

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<PaymentGateway>,
    pub health: HealthChecker,
}

impl AppState {
    pub fn new(gateway: Arc<PaymentGateway>) -> Self {
        let health = HealthChecker::new(gateway.clone());
        Self { gateway, health }
    }

    pub fn with_health(mut self, health: HealthChecker) -> Self {
        self.health = health;
        self
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/oauth/authorize", get(oauth::authorize))
        .route("/oauth/callback", get(oauth::callback))
        .route("/oauth/merchants/{merchant_id}", delete(oauth::disconnect))
        .route("/webhooks/gateway", post(webhooks::handle_webhook))
        .route("/payments/capture", post(payments::capture))
        .route("/payments/{payment_id}/refund", post(payments::refund))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(axum::middleware::from_fn(request_logging_middleware)),
        )
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.health.check_health().await;
    let code = match status.status {
        HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthState::Healthy | HealthState::Degraded => StatusCode::OK,
    };
    (code, Json(status))
}

/// Attaches the inbound request id so it lands in the error body.
pub(crate) fn with_request_id(err: impl Into<AppError>, headers: &HeaderMap) -> AppError {
    let err = err.into();
    match get_request_id_from_headers(headers) {
        Some(request_id) => err.with_request_id(request_id),
        None => err,
    }
}
