use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use tracing::{error, info, warn};

use super::{with_request_id, AppState};
use crate::services::webhook_processor::{DispatchOutcome, WebhookProcessorError, SIGNATURE_HEADER};

fn ack(outcome: &str) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "status": "ok", "outcome": outcome })),
    )
        .into_response()
}

/// POST /webhooks/gateway
///
/// The body is taken as raw bytes; the signature covers them exactly.
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if signature.is_none() {
        warn!("Missing webhook signature");
    }

    match state
        .gateway
        .verify_and_dispatch_webhook(&body, signature)
        .await
    {
        Ok(DispatchOutcome::Applied) => {
            info!("Webhook processed successfully");
            ack("applied")
        }
        Ok(DispatchOutcome::Unchanged) => ack("unchanged"),
        Ok(DispatchOutcome::Ignored) => ack("ignored"),
        Err(WebhookProcessorError::TransactionNotFound(payment_id)) => {
            warn!(payment_id = %payment_id, "Webhook for unknown payment acknowledged");
            ack("unmatched")
        }
        Err(e @ WebhookProcessorError::DatabaseError(_)) => {
            error!(error = %e, "Webhook processing failed");
            with_request_id(e, &headers).into_response()
        }
        Err(e) => with_request_id(e, &headers).into_response(),
    }
}
