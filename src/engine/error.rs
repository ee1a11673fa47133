use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("capacity exceeded: {needed} wheel(s) needed, {available} of {total} free")]
    CapacityExceeded {
        needed: u32,
        available: u32,
        total: u32,
    },
    #[error("daily session limit of {0} reached")]
    DailyLimitReached(u32),
    #[error("payment reference {0} is already in use")]
    DuplicatePaymentReference(String),
    #[error("cannot {action} a {from} booking")]
    InvalidTransition {
        from: &'static str,
        action: &'static str,
    },
    #[error("studio is in maintenance mode: {0}")]
    MaintenanceMode(String),
    #[error("ledger for {0} is busy, retry later")]
    Busy(NaiveDate),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}

impl EngineError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }

    /// Short label for metrics and error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation_error",
            EngineError::NotFound(_) => "not_found",
            EngineError::CapacityExceeded { .. } | EngineError::DailyLimitReached(_) => {
                "capacity_exceeded"
            }
            EngineError::DuplicatePaymentReference(_) => "duplicate_payment_reference",
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::MaintenanceMode(_) => "maintenance_mode",
            EngineError::Busy(_) => "busy",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) => "internal_error",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Busy(_))
    }
}
