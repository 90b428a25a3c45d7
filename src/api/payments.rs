//! Capture and refund endpoints called by the booking layer.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use serde::{Deserialize, Serialize};

use super::{with_request_id, AppState};
use crate::error::AppError;
use crate::payments::types::{PaymentRequest, PaymentResult, RefundResult};

#[derive(Debug, Serialize, Deserialize)]
pub struct CaptureBody {
    #[serde(flatten)]
    pub request: PaymentRequest,
    pub user_id: i64,
    #[serde(default)]
    pub local_request_id: Option<i64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RefundBody {
    /// Full refund when omitted.
    #[serde(default)]
    pub amount: Option<i64>,
}

/// POST /payments/capture
pub async fn capture(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<CaptureBody>,
) -> Result<Json<PaymentResult>, AppError> {
    let result = state
        .gateway
        .capture(&body.request, body.user_id, body.local_request_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    Ok(Json(result))
}

/// POST /payments/{payment_id}/refund
pub async fn refund(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
    body: Option<Json<RefundBody>>,
) -> Result<Json<RefundResult>, AppError> {
    let amount = body.and_then(|Json(b)| b.amount);
    let result = state
        .gateway
        .refund(&payment_id, amount)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    Ok(Json(result))
}
