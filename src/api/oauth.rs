use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{with_request_id, AppState};
use crate::error::{AppError, AppErrorKind, DomainError};
use crate::payments::types::AuthorizationGrant;

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub merchant_id: String,
    pub redirect_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthorizeResponse {
    pub authorization_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub code: String,
    pub state: String,
}

/// GET /oauth/authorize
pub async fn authorize(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuthorizeQuery>,
) -> Result<Json<AuthorizeResponse>, AppError> {
    let authorization_url = state
        .gateway
        .get_authorization_url(&query.merchant_id, &query.redirect_uri)
        .map_err(|e| with_request_id(e, &headers))?;

    Ok(Json(AuthorizeResponse { authorization_url }))
}

/// GET /oauth/callback
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<AuthorizationGrant>, AppError> {
    let grant = state
        .gateway
        .handle_oauth_callback(&query.code, &query.state)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    info!(merchant_id = %grant.merchant_id, "Merchant authorization completed");
    Ok(Json(grant))
}

/// DELETE /oauth/merchants/{merchant_id}
pub async fn disconnect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(merchant_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let deactivated = state
        .gateway
        .disconnect_merchant(&merchant_id)
        .await
        .map_err(|e| with_request_id(e, &headers))?;

    if !deactivated {
        return Err(with_request_id(
            AppError::new(AppErrorKind::Domain(DomainError::UnknownMerchant { merchant_id })),
            &headers,
        ));
    }
    Ok(StatusCode::NO_CONTENT)
}
