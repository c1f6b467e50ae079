//! Data store port abstraction.
//!
//! This crate defines the narrow contract the exerciser uses to talk to a
//! SQL engine without depending on its internals. Engine adapters
//! (`datastore-sqlite`, `datastore-mysql`) implement [`DataStore`]; the
//! pipeline only ever calls it through a [`StoreHandle`], which enforces the
//! engine/connection lifecycle.

mod cursor;
mod error;
mod handle;
mod traits;
mod value;

pub use cursor::BufferedCursor;
pub use error::StoreError;
pub use handle::{LifecycleState, StoreHandle};
pub use traits::{DataStore, RowCursor};
pub use value::{Row, Value};
