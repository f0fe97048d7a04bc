use ulid::Ulid;

/// Why the conflict engine turned a candidate reservation down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("start time must be before end time")]
    InvalidInterval,
    #[error("reservation window out of range: {0}")]
    OutOfRange(&'static str),
    #[error("start time must be in the future")]
    PastStart,
    #[error("room is already reserved for the selected time slot (conflicts with {existing})")]
    Overlap { existing: Ulid },
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("reservation not found: {0}")]
    NotFound(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    WalError(String),
}
