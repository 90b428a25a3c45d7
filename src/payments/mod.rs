pub mod client;
pub mod config;
pub mod error;
pub mod oauth;
pub mod strategies;
pub mod types;
pub mod utils;

pub use client::{ApiSurface, GatewayClient};
pub use config::{GatewayConfig, LastResortConfig};
pub use error::{GatewayResult, PaymentError};
pub use oauth::{AuthorizationState, OAuthClient};
pub use strategies::{CaptureStrategy, RemoteOrder};
pub use types::{
    GatewayEnvironment, MerchantCredential, PaymentOutcome, PaymentRequest, PaymentResult,
    RefundResult, Region,
};
