//! Error types for top-up processing.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::provider::ProviderError;
use crate::store::StoreError;

/// Top-level error returned by the [`TopupEngine`](super::TopupEngine) operations.
#[derive(Debug, Error)]
pub enum TopupError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("payment provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    #[error("{0}")]
    Reconcile(#[from] ReconcileError),
}

/// Request rejected before anything is persisted.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("top-up amount {amount} is below the minimum of {min}")]
    BelowMinimum { amount: i64, min: i64 },

    #[error("payable amount {0} is too low")]
    AmountTooLow(Decimal),

    #[error("payment method '{0}' is not available")]
    UnknownPaymentMethod(String),

    #[error("trade number is empty")]
    EmptyTradeNo,

    #[error("order {0} not found")]
    UnknownOrder(String),
}

/// Failure while settling an order.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("order {trade_no}: lookup failed: {source}")]
    Lookup { trade_no: String, source: StoreError },

    /// The order is still pending; redelivery is safe.
    #[error("order {trade_no}: status update failed: {source}")]
    StatusUpdate { trade_no: String, source: StoreError },

    /// The order is settled but its quota was not credited.
    #[error("order {trade_no}: settled but quota credit failed: {source}")]
    Credit { trade_no: String, source: StoreError },
}

impl ReconcileError {
    /// Whether the provider redelivering the notification can complete the order.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Lookup { .. } | ReconcileError::StatusUpdate { .. } => true,
            ReconcileError::Credit { .. } => false,
        }
    }
}
