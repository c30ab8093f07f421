//! Integration tests for the connection manager and the extension wrapper
//! working together.

use std::sync::Arc;

use dbmesh::prelude::*;
use dbmesh::timescale::EXTENSION_PROBE;
use dbmesh::{DbError, Dialect, DriverRegistry};
use dbmesh_core::testing::{MockDriver, MockReply};
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

const DOCUMENT: &str = r#"{
    "connections": [
        {"id": "tsdb", "type": "postgres", "host": "pg.internal", "port": 5432,
         "user": "ingest", "password": "s3cret", "name": "metrics"},
        {"id": "orders", "type": "mysql", "host": "mysql.internal",
         "user": "app", "password": "pw", "name": "shop"},
        {"id": "plain", "type": "postgres", "host": "pg2.internal", "user": "app",
         "name": "app", "options": {"use_timescaledb": "false"}}
    ]
}"#;

fn timescale_postgres() -> MockDriver {
    MockDriver::new(Dialect::Postgres).with_handler(|sql, _| {
        if sql == EXTENSION_PROBE {
            Ok(MockReply::rows(&["extversion"], vec![vec!["2.14.2".into()]]))
        } else if sql.starts_with("SELECT") {
            Ok(MockReply::rows(
                &["time_bucket", "avg_value"],
                vec![vec![Value::from("2023-01-01 00:00:00+00"), Value::Float(21.5)]],
            ))
        } else {
            Ok(MockReply::affected(1))
        }
    })
}

fn mock_manager(postgres: &MockDriver, mysql: &MockDriver) -> ConnectionManager {
    let drivers = DriverRegistry::new()
        .register(Arc::new(postgres.clone()))
        .register(Arc::new(mysql.clone()));
    ConnectionManager::new(drivers)
}

#[test]
fn test_default_drivers_cover_both_dialects() {
    let mut dialects = dbmesh::default_drivers().dialects();
    dialects.sort_by_key(|d| d.to_string());
    assert_eq!(dialects, vec![Dialect::Mysql, Dialect::Postgres]);
}

#[tokio::test]
async fn test_load_document_without_connecting() {
    let manager = dbmesh::manager();
    assert_eq!(manager.load_document(DOCUMENT).await.unwrap(), 3);

    assert!(manager.list().await.is_empty());
    let names: Vec<String> = manager.configs().await.into_iter().map(|c| c.name).collect();
    assert_eq!(names, vec!["tsdb", "orders", "plain"]);

    let err = manager.get("tsdb").await.unwrap_err();
    assert!(err.is_not_connected());
    let err = manager.get("analytics").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_connect_all_then_extension_per_connection() {
    let postgres = timescale_postgres();
    let mysql = MockDriver::new(Dialect::Mysql);
    let manager = mock_manager(&postgres, &mysql);
    manager.load_document(DOCUMENT).await.unwrap();

    let ctx = CallContext::new();
    let report = manager.connect_all(&ctx).await.unwrap();
    assert!(report.is_complete());
    assert_eq!(report.live_count(), 3);
    assert_eq!(manager.list().await, vec!["orders", "plain", "tsdb"]);

    let tsdb = TimescaleDb::new(manager.get("tsdb").await.unwrap()).unwrap();
    tsdb.connect(&ctx).await.unwrap();
    assert_eq!(tsdb.extension_version().as_deref(), Some("2.14.2"));

    let plain = TimescaleDb::new(manager.get("plain").await.unwrap()).unwrap();
    plain.connect(&ctx).await.unwrap();
    assert!(!plain.is_available());

    let orders = TimescaleDb::new(manager.get("orders").await.unwrap()).unwrap();
    orders.connect(&ctx).await.unwrap();
    assert!(!orders.is_available());
    assert!(mysql.statements().is_empty());

    let query = TimeSeriesQueryOptions::new("metrics", "time", "1 hour")
        .aggregate(ColumnAggregation::new(AggregateFunction::Avg, "value"))
        .limit(100);
    let rows = tsdb.time_series_query(&ctx, &query).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("avg_value"), Some(&Value::Float(21.5)));

    let err = plain.time_series_query(&ctx, &query).await.unwrap_err();
    assert!(err.is_extension_unavailable());

    // Only the tsdb probe and the tsdb query reached the server.
    assert_eq!(postgres.statements().len(), 2);

    manager.close_all().await.unwrap();
    assert!(manager.configs().await.is_empty());
    assert!(!tsdb.connection().is_connected());
}

#[tokio::test]
async fn test_partial_failure_keeps_healthy_connections() {
    let postgres = timescale_postgres();
    let mysql = MockDriver::new(Dialect::Mysql).failing_ping();
    let manager = mock_manager(&postgres, &mysql);
    manager.load_document(DOCUMENT).await.unwrap();

    let report = manager.connect_all(&CallContext::new()).await.unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, "orders");
    assert!(report.failures[0].1.is_connect());

    assert!(manager.get("tsdb").await.is_ok());
    assert!(manager.get("orders").await.unwrap_err().is_not_connected());
}

#[tokio::test]
async fn test_concurrent_lookups() {
    let postgres = timescale_postgres();
    let mysql = MockDriver::new(Dialect::Mysql);
    let manager = Arc::new(mock_manager(&postgres, &mysql));
    manager.load_document(DOCUMENT).await.unwrap();
    manager.connect_all(&CallContext::new()).await.unwrap();

    let lookups: Vec<_> = (0..32)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move {
                let name = ["tsdb", "orders", "plain"][i % 3];
                manager.get(name).await.map(|c| c.name().to_string())
            })
        })
        .collect();
    for (i, handle) in lookups.into_iter().enumerate() {
        let name = handle.await.unwrap().unwrap();
        assert_eq!(name, ["tsdb", "orders", "plain"][i % 3]);
    }
}

#[tokio::test]
async fn test_cancelled_context_stops_queries() {
    let postgres = timescale_postgres();
    let mysql = MockDriver::new(Dialect::Mysql);
    let manager = mock_manager(&postgres, &mysql);
    manager.load_document(DOCUMENT).await.unwrap();
    manager.connect_all(&CallContext::new()).await.unwrap();
    postgres.clear();

    let token = CancellationToken::new();
    let ctx = CallContext::with_token(token.clone());
    token.cancel();

    let conn = manager.get("tsdb").await.unwrap();
    let err = conn.query(&ctx, "SELECT 1", &[]).await.unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(err, DbError::Cancelled { .. }));
    assert!(postgres.statements().is_empty());
}
