//! Unified error handling for the payment gateway service
//!
//! Layer errors (`PaymentError`, `DatabaseError`, `WebhookProcessorError`)
//! convert into [`AppError`], which carries the HTTP status, a stable error
//! code and a message that is safe to show to API clients.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::database::error::{DatabaseError, DatabaseErrorKind};
use crate::payments::error::PaymentError;
use crate::services::webhook_processor::WebhookProcessorError;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    // Domain errors (4xx)
    #[serde(rename = "TRANSACTION_NOT_FOUND")]
    TransactionNotFound,
    #[serde(rename = "INVALID_STATUS_TRANSITION")]
    InvalidStatusTransition,
    #[serde(rename = "REFUND_REJECTED")]
    RefundRejected,
    #[serde(rename = "AUTHORIZATION_REQUIRED")]
    AuthorizationRequired,
    #[serde(rename = "INVALID_AUTHORIZATION_STATE")]
    InvalidAuthorizationState,
    #[serde(rename = "INVALID_WEBHOOK_SIGNATURE")]
    InvalidWebhookSignature,
    #[serde(rename = "UNKNOWN_MERCHANT")]
    UnknownMerchant,

    // Infrastructure errors (5xx)
    #[serde(rename = "DATABASE_ERROR")]
    DatabaseError,
    #[serde(rename = "CONFIGURATION_ERROR")]
    ConfigurationError,

    // External errors (502, 503)
    #[serde(rename = "PAYMENT_PROVIDER_ERROR")]
    PaymentProviderError,
    #[serde(rename = "PAYMENT_PROVIDER_UNAVAILABLE")]
    PaymentProviderUnavailable,
    #[serde(rename = "GATEWAY_AUTHORIZATION_FAILED")]
    GatewayAuthorizationFailed,
    #[serde(rename = "CAPTURE_FAILED")]
    CaptureFailed,

    // Generic
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
    #[serde(rename = "VALIDATION_ERROR")]
    ValidationError,
}

#[derive(Debug, Clone)]
pub enum DomainError {
    TransactionNotFound { reference: String },
    InvalidStatusTransition { from: String, to: String },
    RefundRejected { payment_id: String, reason: String },
    /// The merchant has not completed (or has lost) the OAuth authorization.
    AuthorizationRequired { merchant_id: String },
    InvalidAuthorizationState { reason: String },
    InvalidWebhookSignature,
    UnknownMerchant { merchant_id: String },
}

#[derive(Debug, Clone)]
pub enum InfrastructureError {
    Database { message: String, is_retryable: bool },
    Configuration { message: String },
}

#[derive(Debug, Clone)]
pub enum ExternalError {
    /// The gateway answered with an error.
    PaymentGateway {
        message: String,
        status: u16,
        is_retryable: bool,
    },
    /// The gateway could not be reached.
    Unavailable { message: String },
    /// Token exchange or refresh was rejected by the gateway.
    CredentialsRejected { merchant_id: String },
    CaptureFailed { attempts: usize },
}

#[derive(Debug, Clone)]
pub enum ValidationError {
    InvalidField { field: String, reason: String },
    InvalidPayload { reason: String },
}

/// Unified application error type
#[derive(Debug, Clone)]
pub struct AppError {
    pub kind: AppErrorKind,
    pub request_id: Option<String>,
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub enum AppErrorKind {
    Domain(DomainError),
    Infrastructure(InfrastructureError),
    External(ExternalError),
    Validation(ValidationError),
}

impl AppError {
    pub fn new(kind: AppErrorKind) -> Self {
        Self {
            kind,
            request_id: None,
            context: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn status_code(&self) -> u16 {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => 404,
                DomainError::InvalidStatusTransition { .. } => 409,
                DomainError::RefundRejected { .. } => 422,
                DomainError::AuthorizationRequired { .. } => 503,
                DomainError::InvalidAuthorizationState { .. } => 400,
                DomainError::InvalidWebhookSignature => 401,
                DomainError::UnknownMerchant { .. } => 404,
            },
            AppErrorKind::Infrastructure(_) => 500,
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { status, .. } => *status,
                ExternalError::Unavailable { .. } => 503,
                ExternalError::CredentialsRejected { .. } => 502,
                ExternalError::CaptureFailed { .. } => 502,
            },
            AppErrorKind::Validation(_) => 400,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { .. } => ErrorCode::TransactionNotFound,
                DomainError::InvalidStatusTransition { .. } => ErrorCode::InvalidStatusTransition,
                DomainError::RefundRejected { .. } => ErrorCode::RefundRejected,
                DomainError::AuthorizationRequired { .. } => ErrorCode::AuthorizationRequired,
                DomainError::InvalidAuthorizationState { .. } => {
                    ErrorCode::InvalidAuthorizationState
                }
                DomainError::InvalidWebhookSignature => ErrorCode::InvalidWebhookSignature,
                DomainError::UnknownMerchant { .. } => ErrorCode::UnknownMerchant,
            },
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { .. } => ErrorCode::DatabaseError,
                InfrastructureError::Configuration { .. } => ErrorCode::ConfigurationError,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { .. } => ErrorCode::PaymentProviderError,
                ExternalError::Unavailable { .. } => ErrorCode::PaymentProviderUnavailable,
                ExternalError::CredentialsRejected { .. } => ErrorCode::GatewayAuthorizationFailed,
                ExternalError::CaptureFailed { .. } => ErrorCode::CaptureFailed,
            },
            AppErrorKind::Validation(_) => ErrorCode::ValidationError,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.kind {
            AppErrorKind::Domain(err) => match err {
                DomainError::TransactionNotFound { reference } => {
                    format!("Transaction '{}' not found", reference)
                }
                DomainError::InvalidStatusTransition { from, to } => {
                    format!("Payment cannot move from {} to {}", from, to)
                }
                DomainError::RefundRejected { payment_id, .. } => {
                    format!("Refund for payment '{}' was rejected by the payment provider", payment_id)
                }
                DomainError::AuthorizationRequired { .. } => {
                    "Card payments are not connected for this account".to_string()
                }
                DomainError::InvalidAuthorizationState { .. } => {
                    "Authorization link is invalid or has expired. Please start again".to_string()
                }
                DomainError::InvalidWebhookSignature => "Invalid webhook signature".to_string(),
                DomainError::UnknownMerchant { merchant_id } => {
                    format!("Unknown merchant '{}'", merchant_id)
                }
            },
            AppErrorKind::Infrastructure(_) => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => {
                    if *is_retryable {
                        "Payment provider is temporarily unavailable. Please try again".to_string()
                    } else {
                        "Payment processing failed. Please contact support".to_string()
                    }
                }
                ExternalError::Unavailable { .. } => {
                    "Payment provider is temporarily unavailable. Please try again".to_string()
                }
                ExternalError::CredentialsRejected { .. } => {
                    "The payment account needs to be re-authorized".to_string()
                }
                ExternalError::CaptureFailed { .. } => "Payment could not be captured".to_string(),
            },
            AppErrorKind::Validation(err) => match err {
                ValidationError::InvalidField { field, reason } => {
                    format!("Invalid value for '{}': {}", field, reason)
                }
                ValidationError::InvalidPayload { reason } => {
                    format!("Invalid request payload: {}", reason)
                }
            },
        }
    }

    pub fn is_retryable(&self) -> bool {
        match &self.kind {
            AppErrorKind::Domain(_) => false,
            AppErrorKind::Infrastructure(err) => match err {
                InfrastructureError::Database { is_retryable, .. } => *is_retryable,
                InfrastructureError::Configuration { .. } => false,
            },
            AppErrorKind::External(err) => match err {
                ExternalError::PaymentGateway { is_retryable, .. } => *is_retryable,
                ExternalError::Unavailable { .. } => true,
                ExternalError::CredentialsRejected { .. } => false,
                ExternalError::CaptureFailed { .. } => false,
            },
            AppErrorKind::Validation(_) => false,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.user_message())
    }
}

impl std::error::Error for AppError {}

impl From<PaymentError> for AppError {
    fn from(err: PaymentError) -> Self {
        let status = err.http_status_code();
        let retryable = err.is_retryable();
        let message = err.to_string();

        let kind = match err.root_cause() {
            PaymentError::Validation { message, field } => {
                AppErrorKind::Validation(ValidationError::InvalidField {
                    field: field.clone().unwrap_or_else(|| "request".to_string()),
                    reason: message.clone(),
                })
            }
            PaymentError::Configuration { message } => {
                AppErrorKind::Infrastructure(InfrastructureError::Configuration {
                    message: message.clone(),
                })
            }
            PaymentError::NotConfigured { merchant_id, .. } => {
                AppErrorKind::Domain(DomainError::AuthorizationRequired {
                    merchant_id: merchant_id.clone(),
                })
            }
            PaymentError::TokenRefresh { merchant_id, .. }
            | PaymentError::Authentication { merchant_id } => {
                AppErrorKind::External(ExternalError::CredentialsRejected {
                    merchant_id: merchant_id.clone(),
                })
            }
            PaymentError::Transport { .. } => {
                AppErrorKind::External(ExternalError::Unavailable { message })
            }
            PaymentError::CaptureExhausted { attempts } => {
                AppErrorKind::External(ExternalError::CaptureFailed {
                    attempts: attempts.len(),
                })
            }
            PaymentError::Refund {
                remote_payment_id,
                message,
            } => AppErrorKind::Domain(DomainError::RefundRejected {
                payment_id: remote_payment_id.clone(),
                reason: message.clone(),
            }),
            PaymentError::NotFound { message } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: message.clone(),
                })
            }
            PaymentError::InvalidStateTransition { from, to } => {
                AppErrorKind::Domain(DomainError::InvalidStatusTransition {
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            PaymentError::InvalidAuthorizationState { reason } => {
                AppErrorKind::Domain(DomainError::InvalidAuthorizationState {
                    reason: reason.clone(),
                })
            }
            PaymentError::WebhookVerification { .. } => {
                AppErrorKind::Domain(DomainError::InvalidWebhookSignature)
            }
            PaymentError::Ledger { message, retryable } => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message: message.clone(),
                    is_retryable: *retryable,
                })
            }
            PaymentError::TokenExchange { .. }
            | PaymentError::Gateway { .. }
            | PaymentError::InvalidResponse { .. }
            | PaymentError::OrderCreation { .. }
            | PaymentError::Strategy { .. } => {
                AppErrorKind::External(ExternalError::PaymentGateway {
                    message,
                    status,
                    is_retryable: retryable,
                })
            }
        };

        AppError::new(kind)
    }
}

impl From<DatabaseError> for AppError {
    fn from(err: DatabaseError) -> Self {
        let kind = match &err.kind {
            DatabaseErrorKind::NotFound { entity, id } => {
                AppErrorKind::Domain(DomainError::TransactionNotFound {
                    reference: format!("{} {}", entity, id),
                })
            }
            DatabaseErrorKind::InvalidTransition { from, to } => {
                AppErrorKind::Domain(DomainError::InvalidStatusTransition {
                    from: from.clone(),
                    to: to.clone(),
                })
            }
            _ => AppErrorKind::Infrastructure(InfrastructureError::Database {
                message: err.to_string(),
                is_retryable: err.is_retryable(),
            }),
        };
        AppError::new(kind)
    }
}

impl From<WebhookProcessorError> for AppError {
    fn from(err: WebhookProcessorError) -> Self {
        let kind = match err {
            WebhookProcessorError::InvalidSignature => {
                AppErrorKind::Domain(DomainError::InvalidWebhookSignature)
            }
            WebhookProcessorError::InvalidPayload(reason) => {
                AppErrorKind::Validation(ValidationError::InvalidPayload { reason })
            }
            WebhookProcessorError::UnknownMerchant(merchant_id) => {
                AppErrorKind::Domain(DomainError::UnknownMerchant { merchant_id })
            }
            WebhookProcessorError::TransactionNotFound(reference) => {
                AppErrorKind::Domain(DomainError::TransactionNotFound { reference })
            }
            WebhookProcessorError::DatabaseError(message) => {
                AppErrorKind::Infrastructure(InfrastructureError::Database {
                    message,
                    is_retryable: true,
                })
            }
        };
        AppError::new(kind)
    }
}

pub type AppResult<T> = Result<T, AppError>;
