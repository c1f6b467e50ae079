//! Lifecycle-enforcing wrapper around a [`DataStore`].

use crate::error::StoreError;
use crate::traits::{DataStore, RowCursor};
use serde::Serialize;
use std::fmt;
use tracing::debug;

/// Lifecycle state of a data store handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Created,
    EngineStarted,
    ConnectionOpen,
    ConnectionClosed,
    EngineClosed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Created => write!(f, "created"),
            LifecycleState::EngineStarted => write!(f, "engine_started"),
            LifecycleState::ConnectionOpen => write!(f, "connection_open"),
            LifecycleState::ConnectionClosed => write!(f, "connection_closed"),
            LifecycleState::EngineClosed => write!(f, "engine_closed"),
        }
    }
}

/// Exclusive owner of a [`DataStore`] that tracks its lifecycle.
///
/// ```text
/// Created -> EngineStarted -> ConnectionOpen -> ConnectionClosed -> EngineClosed
///                  \_____________________________________________/
///                        (engine closed without a connection)
/// ```
///
/// Calls that are not valid in the current state fail with
/// [`StoreError::InvalidState`] and never reach the underlying store.
pub struct StoreHandle<S: DataStore> {
    store: S,
    state: LifecycleState,
}

impl<S: DataStore> StoreHandle<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            state: LifecycleState::Created,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Access the wrapped store (read-only).
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn require(&self, operation: &'static str, allowed: &[LifecycleState]) -> Result<(), StoreError> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(StoreError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!("Store '{}': {} -> {}", self.store.name(), self.state, next);
        self.state = next;
    }

    pub async fn engine_start(&mut self) -> Result<(), StoreError> {
        self.require("engine_start", &[LifecycleState::Created])?;
        self.store.engine_start().await?;
        self.transition(LifecycleState::EngineStarted);
        Ok(())
    }

    pub async fn conn_open(&mut self) -> Result<(), StoreError> {
        self.require("conn_open", &[LifecycleState::EngineStarted])?;
        self.store.conn_open().await?;
        self.transition(LifecycleState::ConnectionOpen);
        Ok(())
    }

    pub async fn exec(&mut self, statement: &str) -> Result<u64, StoreError> {
        self.require("exec", &[LifecycleState::ConnectionOpen])?;
        self.store.exec(statement).await
    }

    pub async fn query(&mut self, statement: &str) -> Result<Box<dyn RowCursor>, StoreError> {
        self.require("query", &[LifecycleState::ConnectionOpen])?;
        self.store.query(statement).await
    }

    /// Close the connection.
    ///
    /// The handle moves to `ConnectionClosed` even when the store reports an
    /// error: a failed close is not retried and the connection must not be
    /// used again.
    pub async fn conn_close(&mut self) -> Result<(), StoreError> {
        self.require("conn_close", &[LifecycleState::ConnectionOpen])?;
        let result = self.store.conn_close().await;
        self.transition(LifecycleState::ConnectionClosed);
        result
    }

    pub async fn engine_close(&mut self) -> Result<(), StoreError> {
        self.require(
            "engine_close",
            &[LifecycleState::EngineStarted, LifecycleState::ConnectionClosed],
        )?;
        self.store.engine_close().await;
        self.transition(LifecycleState::EngineClosed);
        Ok(())
    }
}
