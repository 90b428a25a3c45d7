//! Services module for payment orchestration and webhook handling

pub mod payment_gateway;
pub mod payment_orchestrator;
pub mod webhook_processor;


pub use crate::services::payment_gateway::PaymentGateway;
pub use crate::services::payment_orchestrator::{PaymentOrchestrator, MANUAL_RECONCILIATION_MESSAGE};
pub use crate::services::webhook_processor::{
    verify_signature, DispatchOutcome, WebhookProcessor, WebhookProcessorError,
};
