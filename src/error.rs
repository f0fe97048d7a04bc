use crate::engine::{EngineError, RangeError, Rejection};
use crate::rooms::RoomError;

/// Who caused a failure: the caller (4xx) or the system (5xx).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Client,
    Server,
}

/// Every failure a request can end in.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Authorization(String),
    #[error("invalid or missing token")]
    Unauthenticated,
    #[error("storage failure: {0}")]
    Storage(String),
}

impl ServiceError {
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "validation",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Authorization(_) => "authorization",
            ServiceError::Unauthenticated => "unauthenticated",
            ServiceError::Storage(_) => "storage",
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            ServiceError::Storage(_) => FailureClass::Server,
            _ => FailureClass::Client,
        }
    }

    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Validation(_) => 400,
            ServiceError::Unauthenticated => 401,
            ServiceError::Authorization(_) => 403,
            ServiceError::NotFound(_) => 404,
            ServiceError::Conflict(_) => 409,
            ServiceError::Storage(_) => 500,
        }
    }
}

impl From<Rejection> for ServiceError {
    fn from(r: Rejection) -> Self {
        match r {
            Rejection::Overlap { .. } => ServiceError::Conflict(r.to_string()),
            Rejection::InvalidInterval | Rejection::OutOfRange(_) | Rejection::PastStart => {
                ServiceError::Validation(r.to_string())
            }
        }
    }
}

impl From<EngineError> for ServiceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Rejected(r) => r.into(),
            EngineError::NotFound(id) => ServiceError::NotFound(format!("reservation {id} not found")),
            EngineError::LimitExceeded(what) => ServiceError::Validation(format!("limit exceeded: {what}")),
            EngineError::WalError(msg) => ServiceError::Storage(msg),
        }
    }
}

impl From<RangeError> for ServiceError {
    fn from(e: RangeError) -> Self {
        ServiceError::Validation(e.to_string())
    }
}

impl From<RoomError> for ServiceError {
    fn from(e: RoomError) -> Self {
        match e {
            RoomError::NotFound(_) => ServiceError::NotFound(e.to_string()),
            RoomError::NameTaken(_) => ServiceError::Conflict(e.to_string()),
            RoomError::Invalid(_) | RoomError::LimitExceeded(_) => ServiceError::Validation(e.to_string()),
            RoomError::WalError(msg) => ServiceError::Storage(msg),
        }
    }
}
