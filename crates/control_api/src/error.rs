use std::time::Duration;

use navigation::NavigationError;
use shared::{
    domain::{ItemId, SessionId},
    error::{ApiError, ErrorCode},
};
use thiserror::Error;

/// Every failure a caller can observe. Each variant maps to a distinct wire
/// code so clients can tell "try again" from "this move is impossible".
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("no item occupies position {0}")]
    InvalidPosition(i64),
    #[error("already at the last item of the session")]
    EndOfSession,
    #[error("already at the first item of the session")]
    StartOfSession,
    #[error("current item has no images")]
    NoImages,
    #[error("session has no products")]
    NoProducts,
    #[error("items {0} and {1} belong to different sessions")]
    DifferentSessions(ItemId, ItemId),
    #[error("{0} not found")]
    NotFound(String),
    #[error("session {session_id} is busy; lock not acquired within {waited:?}")]
    Busy {
        session_id: SessionId,
        waited: Duration,
    },
    #[error("{0}")]
    Validation(String),
    #[error("storage is busy: {0:#}")]
    StoreBusy(anyhow::Error),
    #[error("storage failure: {0:#}")]
    Store(anyhow::Error),
}

impl CoordinatorError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoordinatorError::InvalidPosition(_) => ErrorCode::InvalidPosition,
            CoordinatorError::EndOfSession => ErrorCode::EndOfSession,
            CoordinatorError::StartOfSession => ErrorCode::StartOfSession,
            CoordinatorError::NoImages => ErrorCode::NoImages,
            CoordinatorError::NoProducts => ErrorCode::NoProducts,
            CoordinatorError::DifferentSessions(_, _) => ErrorCode::DifferentSessions,
            CoordinatorError::NotFound(_) => ErrorCode::NotFound,
            CoordinatorError::Busy { .. } | CoordinatorError::StoreBusy(_) => ErrorCode::Busy,
            CoordinatorError::Validation(_) => ErrorCode::Validation,
            CoordinatorError::Store(_) => ErrorCode::Internal,
        }
    }

    pub(crate) fn session_not_found(session_id: SessionId) -> Self {
        CoordinatorError::NotFound(format!("session {session_id}"))
    }

    pub(crate) fn item_not_found(item_id: ItemId) -> Self {
        CoordinatorError::NotFound(format!("item {item_id}"))
    }
}

impl From<anyhow::Error> for CoordinatorError {
    fn from(value: anyhow::Error) -> Self {
        if storage::is_busy(&value) {
            CoordinatorError::StoreBusy(value)
        } else {
            CoordinatorError::Store(value)
        }
    }
}

impl From<NavigationError> for CoordinatorError {
    fn from(value: NavigationError) -> Self {
        match value {
            NavigationError::InvalidPosition(position) => {
                CoordinatorError::InvalidPosition(position)
            }
            NavigationError::EndOfSession => CoordinatorError::EndOfSession,
            NavigationError::StartOfSession => CoordinatorError::StartOfSession,
            NavigationError::NoImages => CoordinatorError::NoImages,
            NavigationError::NoProducts => CoordinatorError::NoProducts,
            NavigationError::NoCurrentItem => {
                CoordinatorError::NotFound("current item (cursor not initialized)".into())
            }
            NavigationError::CurrentItemMissing(item_id) => {
                CoordinatorError::item_not_found(item_id)
            }
        }
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(value: CoordinatorError) -> Self {
        ApiError::new(value.code(), value.to_string())
    }
}
