//! Error types for Focusroom Core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::SessionStatus;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Authentication required")]
    AuthenticationRequired,

    #[error("Not allowed: {0}")]
    AuthorizationDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition {
        from: SessionStatus,
        to: SessionStatus,
    },

    #[error("Invalid input: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Stable classification used when the error crosses the wire
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthenticationRequired => ErrorKind::AuthenticationRequired,
            Error::AuthorizationDenied(_) => ErrorKind::AuthorizationDenied,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Error::Validation(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::Database(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// User-facing error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationRequired,
    AuthorizationDenied,
    NotFound,
    InvalidTransition,
    Validation,
    Conflict,
    Internal,
}

pub type Result<T> = std::result::Result<T, Error>;
