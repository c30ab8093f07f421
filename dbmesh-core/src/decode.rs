//! Result decoding.
//!
//! Turns a driver [`RowSource`] into [`GenericRow`]s. Column names are read
//! once, byte sequences become text, NULL stays an explicit [`Value::Null`].
//! The source is owned by the decoder and dropped on every exit path.

use crate::error::{DbError, DbResult};
use crate::row::GenericRow;
use crate::traits::RowSource;
use crate::value::Value;

/// Operation name attached to failures raised while iterating a result set.
pub const ROW_ITERATION: &str = "row iteration";

/// Normalize one driver value for callers.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Bytes(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Value::Text(text),
            Err(e) => Value::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
        },
        other => other,
    }
}

/// Drain a result set into decoded rows.
///
/// An error raised while fetching rows is returned as-is (relabelled as
/// [`ROW_ITERATION`]); an exhausted set with no rows is `Ok(vec![])`.
pub async fn decode_rows(mut source: Box<dyn RowSource>) -> DbResult<Vec<GenericRow>> {
    let columns: Vec<String> = source.columns().to_vec();
    let mut rows = Vec::new();

    while let Some(values) = source
        .next_row()
        .await
        .map_err(|e| e.within(ROW_ITERATION))?
    {
        if values.len() != columns.len() {
            return Err(DbError::query_message(
                ROW_ITERATION,
                "result",
                format!(
                    "row has {} values but the result set has {} columns",
                    values.len(),
                    columns.len()
                ),
            ));
        }
        rows.push(GenericRow::from_parts(
            columns.iter().cloned(),
            values.into_iter().map(normalize),
        ));
    }

    Ok(rows)
}

/// A fully materialized result set.
///
/// Drivers that have to read a whole result before releasing their handle
/// hand rows out through this type.
#[derive(Debug, Clone, Default)]
pub struct BufferedRows {
    columns: Vec<String>,
    rows: std::collections::VecDeque<Vec<Value>>,
}

impl BufferedRows {
    /// Create a buffered result set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns,
            rows: rows.into(),
        }
    }

    /// Number of rows not yet fetched.
    pub fn remaining(&self) -> usize {
        self.rows.len()
    }
}

impl RowSource for BufferedRows {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> crate::traits::BoxFuture<'_, DbResult<Option<Vec<Value>>>> {
        let row = self.rows.pop_front();
        Box::pin(async move { Ok(row) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::BoxFuture;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FailingSource {
        columns: Vec<String>,
        yielded: bool,
        dropped: Arc<AtomicBool>,
    }

    impl RowSource for FailingSource {
        fn columns(&self) -> &[String] {
            &self.columns
        }

        fn next_row(&mut self) -> BoxFuture<'_, DbResult<Option<Vec<Value>>>> {
            let first = !self.yielded;
            self.yielded = true;
            Box::pin(async move {
                if first {
                    Ok(Some(vec![Value::Int(1)]))
                } else {
                    Err(DbError::query_message("fetch", "tsdb", "connection reset"))
                }
            })
        }
    }

    impl Drop for FailingSource {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_null_and_bytes_columns() {
        let source = BufferedRows::new(
            vec!["device".into(), "payload".into(), "reading".into()],
            vec![vec![
                Value::Null,
                Value::Bytes(b"sensor-7".to_vec()),
                Value::Float(21.5),
            ]],
        );

        let rows = decode_rows(Box::new(source)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("device"), Some(&Value::Null));
        assert_eq!(rows[0].get("payload"), Some(&Value::Text("sensor-7".into())));
        assert_eq!(rows[0].get("reading"), Some(&Value::Float(21.5)));
    }

    #[tokio::test]
    async fn test_empty_result_is_ok() {
        let source = BufferedRows::new(vec!["a".into()], vec![]);
        let rows = decode_rows(Box::new(source)).await.unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_iteration_error_is_distinct_and_releases_source() {
        let dropped = Arc::new(AtomicBool::new(false));
        let source = FailingSource {
            columns: vec!["n".into()],
            yielded: false,
            dropped: dropped.clone(),
        };

        let err = decode_rows(Box::new(source)).await.unwrap_err();
        assert_eq!(err.operation(), Some(ROW_ITERATION));
        assert!(err.to_string().contains("connection reset"));
        assert!(dropped.load(Ordering::SeqCst));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let value = normalize(Value::Bytes(vec![0x66, 0xff, 0x6f]));
        assert_eq!(value, Value::Text("f\u{fffd}o".into()));
    }
}
