use thiserror::Error;

/// Errors an `ExchangeGateway` surfaces for a single call.
///
/// `Unknown` is classified as `Transient` by the caller for the first
/// `K` attempts of a given fetch window, then treated as `Permanent`.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("transient gateway error: {0}")]
    Transient(String),

    #[error("permanent gateway error: {0}")]
    Permanent(String),

    #[error("unclassified gateway error: {0}")]
    Unknown(String),
}

/// Errors a `Repository` implementation can raise. A conditional update
/// that simply found no matching row is not an error — callers see `Ok(false)`.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("row not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of a single `JobRunner` attempt, per the error-handling table in
/// the design notes. Only `Integrity` transitions a job to `failed`.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("rate limited, retry after {wait_hint_ms}ms")]
    RateLimited { wait_hint_ms: i64 },

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("cursor advanced by another runner")]
    CursorRace,

    #[error("job lock held by another worker")]
    LockHeld,

    #[error("run cancelled")]
    Cancelled,

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl RunError {
    /// `last_error` is recorded for everything except `CursorRace`,
    /// `LockHeld` and `Cancelled` (those never surface to the job row).
    pub fn records_last_error(&self) -> bool {
        !matches!(
            self,
            RunError::CursorRace | RunError::LockHeld | RunError::Cancelled
        )
    }

    /// Only `Integrity` faults move the job to `failed`; every other kind
    /// leaves it `active` and lets the job retry on its normal cadence.
    pub fn is_integrity_fault(&self) -> bool {
        matches!(self, RunError::Integrity(_))
    }

    /// One-line human string suitable for `last_error`.
    pub fn as_last_error(&self) -> String {
        self.to_string()
    }
}

/// Errors raised while loading or validating indicator configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown indicator key: {0}")]
    UnknownIndicator(String),

    #[error("invalid parameter for {indicator}: {reason}")]
    InvalidParameter { indicator: String, reason: String },
}
