//! Error types for data store operations.

use crate::handle::LifecycleState;
use thiserror::Error;

/// Errors returned by a [`crate::DataStore`] or [`crate::StoreHandle`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The requested operation is not valid in the current lifecycle state.
    #[error("'{operation}' is not allowed while the store is {state}")]
    InvalidState {
        operation: &'static str,
        state: LifecycleState,
    },

    /// Engine start or shutdown failed.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Opening or closing the connection failed.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The engine rejected a statement.
    #[error("Statement error: {0}")]
    Statement(String),

    /// Reading or closing a row cursor failed.
    #[error("Cursor error: {0}")]
    Cursor(String),
}

impl StoreError {
    /// Whether this error came from lifecycle misuse rather than the engine.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, StoreError::InvalidState { .. })
    }
}
