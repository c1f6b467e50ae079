//! Read-only verification queries.

use datastore_port::{DataStore, StoreError, StoreHandle, Value};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Expectation evaluated against the first column of every returned row.
///
/// Only [`Expect::Any`] accepts a query that returns no rows.
#[derive(Debug, Clone, PartialEq)]
pub enum Expect {
    /// Integer equal to `n`, regardless of signedness or text encoding.
    Count(u64),
    /// Equal to the given value. Integers compare numerically.
    Equals(Value),
    /// Any row passes.
    Any,
}

impl Expect {
    fn matches(&self, observed: Option<&Value>) -> bool {
        match self {
            Expect::Any => true,
            Expect::Count(n) => observed.is_some_and(|v| integer_eq(v, *n)),
            Expect::Equals(expected) => observed.is_some_and(|v| values_eq(v, expected)),
        }
    }

    fn allows_empty(&self) -> bool {
        matches!(self, Expect::Any)
    }
}

fn integer_eq(value: &Value, n: u64) -> bool {
    match value {
        Value::UInt(v) => *v == n,
        other => other
            .as_i64()
            .and_then(|v| u64::try_from(v).ok())
            .is_some_and(|v| v == n),
    }
}

fn values_eq(observed: &Value, expected: &Value) -> bool {
    match (observed, expected) {
        (Value::Int(a), Value::UInt(b)) | (Value::UInt(b), Value::Int(a)) => {
            u64::try_from(*a).is_ok_and(|a| a == *b)
        }
        (a, b) => a == b,
    }
}

impl fmt::Display for Expect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expect::Count(n) => write!(f, "count = {n}"),
            Expect::Equals(v) => write!(f, "value = {v}"),
            Expect::Any => write!(f, "any"),
        }
    }
}

/// Result of one verification check.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Every row satisfied the expectation. `observed` is the first row's
    /// first column, `None` when an [`Expect::Any`] query returned no rows.
    Pass { observed: Option<Value>, rows: u64 },
    /// Row `row_index` (0-based) did not satisfy the expectation, or the
    /// query returned no rows (`observed: None, row_index: 0`).
    Fail {
        observed: Option<Value>,
        row_index: u64,
    },
    /// The query or the cursor failed.
    Error {
        #[serde(serialize_with = "serialize_cause")]
        cause: StoreError,
    },
}

fn serialize_cause<S: serde::Serializer>(cause: &StoreError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(cause)
}

impl CheckOutcome {
    pub fn is_pass(&self) -> bool {
        matches!(self, CheckOutcome::Pass { .. })
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, CheckOutcome::Fail { .. })
    }

    pub fn is_error(&self) -> bool {
        matches!(self, CheckOutcome::Error { .. })
    }
}

impl fmt::Display for CheckOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckOutcome::Pass { observed, rows } => match observed {
                Some(v) => write!(f, "pass (observed {v}, {rows} rows)"),
                None => write!(f, "pass (no rows)"),
            },
            CheckOutcome::Fail {
                observed,
                row_index,
            } => match observed {
                Some(v) => write!(f, "fail (observed {v} at row {row_index})"),
                None => write!(f, "fail (no value at row {row_index})"),
            },
            CheckOutcome::Error { cause } => write!(f, "error ({cause})"),
        }
    }
}

/// Run `query` once and evaluate `expect` against each row.
///
/// Stops at the first failing row. An empty result fails every expectation
/// except [`Expect::Any`]. The cursor is closed on every path; a close
/// failure turns a pass into an error.
pub async fn check<S: DataStore>(
    store: &mut StoreHandle<S>,
    query: &str,
    expect: &Expect,
) -> CheckOutcome {
    let mut cursor = match store.query(query).await {
        Ok(cursor) => cursor,
        Err(cause) => return CheckOutcome::Error { cause },
    };

    let mut first: Option<Value> = None;
    let mut rows: u64 = 0;
    let outcome = loop {
        match cursor.next_row().await {
            Ok(Some(row)) => {
                let observed = row.first().cloned();
                if !expect.matches(observed.as_ref()) {
                    break CheckOutcome::Fail {
                        observed,
                        row_index: rows,
                    };
                }
                if rows == 0 {
                    first = observed;
                }
                rows += 1;
            }
            Ok(None) if rows == 0 && !expect.allows_empty() => {
                break CheckOutcome::Fail {
                    observed: None,
                    row_index: 0,
                }
            }
            Ok(None) => {
                break CheckOutcome::Pass {
                    observed: first,
                    rows,
                }
            }
            Err(cause) => break CheckOutcome::Error { cause },
        }
    };

    match cursor.close().await {
        Ok(()) => outcome,
        Err(cause) if outcome.is_pass() => CheckOutcome::Error { cause },
        Err(cause) => {
            warn!("Failed to close verification cursor: {}", cause);
            outcome
        }
    }
}

/// Run `query` and discard every row. Returns the number of rows read.
pub async fn drain<S: DataStore>(
    store: &mut StoreHandle<S>,
    query: &str,
) -> Result<u64, StoreError> {
    let mut cursor = store.query(query).await?;
    let mut rows: u64 = 0;
    let result = loop {
        match cursor.next_row().await {
            Ok(Some(_row)) => rows += 1,
            Ok(None) => break Ok(rows),
            Err(e) => break Err(e),
        }
    };
    let closed = cursor.close().await;
    let rows = result?;
    closed?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedStore;
    use datastore_port::Row;

    async fn open(store: ScriptedStore) -> StoreHandle<ScriptedStore> {
        let mut handle = StoreHandle::new(store);
        handle.engine_start().await.unwrap();
        handle.conn_open().await.unwrap();
        handle
    }

    fn rows(values: &[i64]) -> Vec<Row> {
        values.iter().map(|v| Row::new(vec![Value::Int(*v)])).collect()
    }

    #[tokio::test]
    async fn test_count_pass() {
        let store = ScriptedStore::new();
        let journal = store.journal.clone();
        let mut handle = open(store).await;
        handle.exec("INSERT INTO t VALUES (1)").await.unwrap();
        handle.exec("INSERT INTO t VALUES (2)").await.unwrap();

        let outcome = check(&mut handle, "SELECT COUNT(*) FROM t", &Expect::Count(2)).await;
        assert_eq!(
            outcome,
            CheckOutcome::Pass {
                observed: Some(Value::Int(2)),
                rows: 1
            }
        );
        assert_eq!(journal.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_count_mismatch() {
        let mut handle = open(ScriptedStore::new()).await;
        handle.exec("INSERT INTO t VALUES (1)").await.unwrap();

        let outcome = check(&mut handle, "SELECT COUNT(*) FROM t", &Expect::Count(5)).await;
        assert_eq!(
            outcome,
            CheckOutcome::Fail {
                observed: Some(Value::Int(1)),
                row_index: 0
            }
        );
    }

    #[tokio::test]
    async fn test_short_circuit_closes_cursor() {
        let store = ScriptedStore::new().with_rows(rows(&[7, 7, 8, 7]));
        let journal = store.journal.clone();
        let mut handle = open(store).await;

        let outcome = check(&mut handle, "SELECT v FROM t", &Expect::Equals(Value::UInt(7))).await;
        assert_eq!(
            outcome,
            CheckOutcome::Fail {
                observed: Some(Value::Int(8)),
                row_index: 2
            }
        );
        assert_eq!(journal.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_zero_rows_fail_count() {
        let store = ScriptedStore::new();
        let journal = store.journal.clone();
        let mut handle = open(store).await;
        let outcome = check(&mut handle, "SELECT v FROM t", &Expect::Count(3)).await;
        assert_eq!(
            outcome,
            CheckOutcome::Fail {
                observed: None,
                row_index: 0
            }
        );
        assert_eq!(journal.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_zero_rows_fail_equals_even_for_zero() {
        let mut handle = open(ScriptedStore::new()).await;
        let outcome = check(
            &mut handle,
            "SELECT v FROM t",
            &Expect::Equals(Value::Int(0)),
        )
        .await;
        assert!(outcome.is_fail());
        assert_eq!(outcome.to_string(), "fail (no value at row 0)");
    }

    #[tokio::test]
    async fn test_zero_rows_pass_any() {
        let mut handle = open(ScriptedStore::new()).await;
        let outcome = check(&mut handle, "SELECT v FROM t", &Expect::Any).await;
        assert_eq!(
            outcome,
            CheckOutcome::Pass {
                observed: None,
                rows: 0
            }
        );
    }

    #[tokio::test]
    async fn test_query_error() {
        let mut handle = open(ScriptedStore::new().failing_on("missing")).await;
        let outcome = check(&mut handle, "SELECT * FROM missing", &Expect::Any).await;
        assert!(outcome.is_error());
    }

    #[tokio::test]
    async fn test_cursor_error_closes_cursor() {
        let mut store = ScriptedStore::new().with_rows(rows(&[1, 2, 3]));
        store.fail_cursor_after = Some(1);
        let journal = store.journal.clone();
        let mut handle = open(store).await;

        let outcome = check(&mut handle, "SELECT v FROM t", &Expect::Any).await;
        assert!(matches!(
            outcome,
            CheckOutcome::Error {
                cause: StoreError::Cursor(_)
            }
        ));
        assert_eq!(journal.open_cursors(), 0);
    }

    #[tokio::test]
    async fn test_repeated_checks_are_identical() {
        let mut handle = open(ScriptedStore::new()).await;
        handle.exec("INSERT INTO t VALUES (1)").await.unwrap();

        let first = check(&mut handle, "SELECT COUNT(*) FROM t", &Expect::Count(1)).await;
        let second = check(&mut handle, "SELECT COUNT(*) FROM t", &Expect::Count(1)).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_count_from_text() {
        let store = ScriptedStore::new().with_rows(vec![Row::new(vec![Value::Text("3".into())])]);
        let mut handle = open(store).await;
        let outcome = check(&mut handle, "SELECT n FROM t", &Expect::Count(3)).await;
        assert!(outcome.is_pass());
    }

    #[tokio::test]
    async fn test_drain() {
        let store = ScriptedStore::new().with_rows(rows(&[1, 2, 3]));
        let journal = store.journal.clone();
        let mut handle = open(store).await;

        assert_eq!(drain(&mut handle, "SELECT v FROM t").await.unwrap(), 3);
        assert_eq!(journal.open_cursors(), 0);
    }
}
