use crate::database::error::DatabaseError;
use thiserror::Error;

pub type GatewayResult<T> = Result<T, PaymentError>;

#[derive(Debug, Clone, Error)]
pub enum PaymentError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Merchant {merchant_id} is not configured: {message}")]
    NotConfigured {
        merchant_id: String,
        message: String,
    },

    #[error("Token exchange failed: HTTP {http_status}: {body}")]
    TokenExchange { http_status: u16, body: String },

    #[error("Token refresh failed for merchant {merchant_id}: {message}")]
    TokenRefresh {
        merchant_id: String,
        http_status: Option<u16>,
        message: String,
    },

    #[error("Gateway rejected credentials for merchant {merchant_id} after token refresh")]
    Authentication { merchant_id: String },

    #[error("Gateway error: HTTP {http_status} {status_text}: {body_preview}")]
    Gateway {
        http_status: u16,
        status_text: String,
        body_preview: String,
    },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Order creation failed: {source}")]
    OrderCreation {
        #[source]
        source: Box<PaymentError>,
    },

    #[error("Capture strategy {strategy} failed: {source}")]
    Strategy {
        strategy: String,
        #[source]
        source: Box<PaymentError>,
    },

    #[error("All capture strategies failed: {}", .attempts.join("; "))]
    CaptureExhausted { attempts: Vec<String> },

    #[error("Refund failed for payment {remote_payment_id}: {message}")]
    Refund {
        remote_payment_id: String,
        message: String,
    },

    #[error("Not found: {message}")]
    NotFound { message: String },

    #[error("Invalid transaction status transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid authorization state: {reason}")]
    InvalidAuthorizationState { reason: String },

    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Webhook verification failed: {message}")]
    WebhookVerification { message: String },

    #[error("Invalid gateway response: {message}")]
    InvalidResponse { message: String },

    #[error("Ledger error: {message}")]
    Ledger { message: String, retryable: bool },
}

impl PaymentError {
    /// Wraps a strategy failure so the fallback sequence stays auditable.
    pub fn in_strategy(strategy: &str, source: PaymentError) -> Self {
        PaymentError::Strategy {
            strategy: strategy.to_string(),
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through order/strategy wrappers.
    pub fn root_cause(&self) -> &PaymentError {
        match self {
            PaymentError::OrderCreation { source } | PaymentError::Strategy { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Errors that make any further gateway call in the same request pointless.
    pub fn is_credential_failure(&self) -> bool {
        matches!(
            self.root_cause(),
            PaymentError::Authentication { .. }
                | PaymentError::TokenRefresh { .. }
                | PaymentError::NotConfigured { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PaymentError::Configuration { .. } => false,
            PaymentError::NotConfigured { .. } => false,
            PaymentError::TokenExchange { .. } => false,
            PaymentError::TokenRefresh { http_status, .. } => {
                http_status.map(|s| s >= 500).unwrap_or(true)
            }
            PaymentError::Authentication { .. } => false,
            PaymentError::Gateway { http_status, .. } => *http_status >= 500 || *http_status == 429,
            PaymentError::Transport { .. } => true,
            PaymentError::OrderCreation { source } => source.is_retryable(),
            PaymentError::Strategy { source, .. } => source.is_retryable(),
            PaymentError::CaptureExhausted { .. } => false,
            PaymentError::Refund { .. } => false,
            PaymentError::NotFound { .. } => false,
            PaymentError::InvalidStateTransition { .. } => false,
            PaymentError::InvalidAuthorizationState { .. } => false,
            PaymentError::Validation { .. } => false,
            PaymentError::WebhookVerification { .. } => false,
            PaymentError::InvalidResponse { .. } => false,
            PaymentError::Ledger { retryable, .. } => *retryable,
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            PaymentError::Configuration { .. } => 500,
            PaymentError::NotConfigured { .. } => 503,
            PaymentError::TokenExchange { .. } => 502,
            PaymentError::TokenRefresh { .. } => 502,
            PaymentError::Authentication { .. } => 502,
            PaymentError::Gateway { http_status, .. } => {
                if *http_status >= 500 {
                    502
                } else {
                    402
                }
            }
            PaymentError::Transport { .. } => 503,
            PaymentError::OrderCreation { source } => source.http_status_code(),
            PaymentError::Strategy { source, .. } => source.http_status_code(),
            PaymentError::CaptureExhausted { .. } => 502,
            PaymentError::Refund { .. } => 422,
            PaymentError::NotFound { .. } => 404,
            PaymentError::InvalidStateTransition { .. } => 409,
            PaymentError::InvalidAuthorizationState { .. } => 400,
            PaymentError::Validation { .. } => 400,
            PaymentError::WebhookVerification { .. } => 401,
            PaymentError::InvalidResponse { .. } => 502,
            PaymentError::Ledger { .. } => 500,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            PaymentError::Validation { message, .. } => message.clone(),
            PaymentError::Configuration { .. } | PaymentError::NotConfigured { .. } => {
                "Card payments are not configured for this account".to_string()
            }
            PaymentError::TokenExchange { .. } => {
                "Could not connect the payment account. Please try authorizing again".to_string()
            }
            PaymentError::TokenRefresh { .. } | PaymentError::Authentication { .. } => {
                "The payment account needs to be re-authorized".to_string()
            }
            PaymentError::Gateway { .. } | PaymentError::InvalidResponse { .. } => {
                "Payment provider returned an error".to_string()
            }
            PaymentError::Transport { .. } => {
                "Payment provider is temporarily unavailable".to_string()
            }
            PaymentError::OrderCreation { .. } => {
                "Could not start the payment. Please try again".to_string()
            }
            PaymentError::Strategy { source, .. } => source.user_message(),
            PaymentError::CaptureExhausted { .. } => "Payment could not be captured".to_string(),
            PaymentError::Refund { .. } => "Refund was rejected by the payment provider".to_string(),
            PaymentError::NotFound { message } => message.clone(),
            PaymentError::InvalidStateTransition { from, to } => {
                format!("Payment cannot move from {} to {}", from, to)
            }
            PaymentError::InvalidAuthorizationState { .. } => {
                "Authorization link is invalid or has expired".to_string()
            }
            PaymentError::WebhookVerification { .. } => "Invalid webhook signature".to_string(),
            PaymentError::Ledger { .. } => {
                "Service temporarily unavailable. Please try again later".to_string()
            }
        }
    }
}

impl From<DatabaseError> for PaymentError {
    fn from(err: DatabaseError) -> Self {
        PaymentError::Ledger {
            retryable: err.is_retryable(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_status_mapping_distinguishes_rejections_from_outages() {
        let rejected = PaymentError::Gateway {
            http_status: 400,
            status_text: "Bad Request".to_string(),
            body_preview: "{}".to_string(),
        };
        let outage = PaymentError::Gateway {
            http_status: 503,
            status_text: "Service Unavailable".to_string(),
            body_preview: String::new(),
        };
        assert_eq!(rejected.http_status_code(), 402);
        assert!(!rejected.is_retryable());
        assert_eq!(outage.http_status_code(), 502);
        assert!(outage.is_retryable());
    }

    #[test]
    fn transport_is_retryable_but_authentication_is_terminal() {
        assert!(PaymentError::Transport {
            message: "connection reset".to_string()
        }
        .is_retryable());
        assert!(!PaymentError::Authentication {
            merchant_id: "M1".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn strategy_wrapper_keeps_identity_and_root_cause() {
        let err = PaymentError::in_strategy(
            "direct_charge",
            PaymentError::Authentication {
                merchant_id: "M1".to_string(),
            },
        );
        assert!(err.to_string().contains("direct_charge"));
        assert!(err.is_credential_failure());
        assert!(matches!(
            err.root_cause(),
            PaymentError::Authentication { .. }
        ));
    }

    #[test]
    fn capture_exhausted_lists_every_attempt() {
        let err = PaymentError::CaptureExhausted {
            attempts: vec!["a failed".to_string(), "b failed".to_string()],
        };
        assert_eq!(err.to_string(), "All capture strategies failed: a failed; b failed");
    }
}
