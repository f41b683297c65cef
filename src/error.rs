use thiserror::Error;

/// Rejected user input. Surfaced synchronously; nothing is mutated.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("label must not be empty")]
    EmptyLabel,
    #[error("duration must be greater than zero minutes")]
    NonPositiveDuration,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{0}")]
    InvalidState(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage quota exceeded ({needed} bytes needed, quota {quota} bytes)")]
    QuotaExceeded { needed: u64, quota: u64 },
}

impl StoreError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StoreError::QuotaExceeded { .. })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DiskFull) => StoreError::QuotaExceeded { needed: 0, quota: 0 },
            _ => StoreError::Unavailable(err.to_string()),
        }
    }
}

/// Failures of the optional platform capabilities. Always logged and absorbed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    #[error("notifications unavailable: {0}")]
    Unavailable(String),
    #[error("background scheduling unavailable: {0}")]
    SchedulingUnavailable(String),
}
