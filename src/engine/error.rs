//! Error types surfaced by the engine.

use thiserror::Error;

use crate::Amount;
use crate::store::{LedgerError, StoreError};

/// Malformed request, rejected before any store call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transaction id is empty")]
    EmptyTransactionId,

    #[error("transaction id is {0} bytes long, limit is {max}", max = super::MAX_TRANSACTION_ID_LEN)]
    TransactionIdTooLong(usize),

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    #[error("price must be positive, got {0}")]
    NonPositivePrice(Amount),
}

/// Top-level error returned by the [`Engine`](super::Engine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid request: {0}")]
    Invalid(#[from] ValidationError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// Transient failures outlasted the retry budget. The request did not take
    /// effect and may be retried with the same transaction id.
    #[error("store unavailable after {attempts} attempts: {reason}")]
    StoreUnavailable { attempts: u32, reason: String },

    #[error("store failure: {0}")]
    Store(String),
}

impl EngineError {
    pub(crate) fn from_store(err: StoreError, attempts: u32) -> Self {
        match err {
            StoreError::Ledger(e) => EngineError::Ledger(e),
            StoreError::Transient(reason) => EngineError::StoreUnavailable { attempts, reason },
            StoreError::Fatal(reason) => EngineError::Store(reason),
        }
    }

    /// HTTP status a transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Invalid(_) | EngineError::Ledger(_) => 400,
            EngineError::StoreUnavailable { .. } => 503,
            EngineError::Store(_) => 500,
        }
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable { .. })
    }
}
