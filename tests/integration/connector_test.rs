//! Connector lifecycle tests.
//!
//! Drives the public facade through the mock driver.

use pretty_assertions::assert_eq;
use snowflake_connector::db::{MockDriver, MockTable};
use snowflake_connector::{Record, SnowflakeConfig, SnowflakeConnector, Value};

fn config() -> SnowflakeConfig {
    SnowflakeConfig::new("xy12345", "loader", "secret", "COMPUTE_WH", "ANALYTICS", "PUBLIC")
}

fn orders_driver() -> MockDriver {
    MockDriver::new().with_table(
        "SELECT ORDER_ID, STATUS, TOTAL FROM ORDERS",
        MockTable::new(&["ORDER_ID", "STATUS", "TOTAL"])
            .with_row(vec![Value::Int(10), "SHIPPED".into(), Value::Decimal("19.99".into())])
            .with_row(vec![Value::Int(11), "PENDING".into(), Value::Null])
            .with_row(vec![Value::Int(12), "SHIPPED".into(), Value::Decimal("5.00".into())]),
    )
}

#[tokio::test]
async fn test_connect_query_close() {
    let driver = orders_driver();
    let mut connector = SnowflakeConnector::with_driver(config(), driver.clone());

    assert!(connector.connect().await);
    let records = connector
        .execute_query("SELECT ORDER_ID, STATUS, TOTAL FROM ORDERS")
        .await
        .unwrap();
    connector.close().await;

    assert_eq!(records.len(), 3);
    let expected: Record = vec![
        ("ORDER_ID", Value::Int(11)),
        ("STATUS", Value::from("PENDING")),
        ("TOTAL", Value::Null),
    ]
    .into_iter()
    .collect();
    assert_eq!(records[1], expected);

    let calls = driver.calls();
    assert_eq!(calls.connects, 1);
    assert_eq!(calls.cursor_closes, 1);
    assert_eq!(calls.connection_closes, 1);
}

#[tokio::test]
async fn test_session_survives_between_queries() {
    let driver = orders_driver();
    let mut connector = SnowflakeConnector::with_driver(config(), driver.clone());

    for _ in 0..3 {
        connector
            .execute_query("SELECT ORDER_ID, STATUS, TOTAL FROM ORDERS")
            .await
            .unwrap();
    }
    connector.close().await;

    let calls = driver.calls();
    assert_eq!(calls.connects, 1);
    assert_eq!(calls.executed.len(), 3);
}

#[tokio::test]
async fn test_query_after_close_reconnects() {
    let driver = orders_driver();
    let mut connector = SnowflakeConnector::with_driver(config(), driver.clone());

    connector.execute_query("SELECT 1").await.unwrap();
    connector.close().await;
    connector.execute_query("SELECT 1").await.unwrap();
    connector.close().await;

    assert_eq!(driver.calls().connects, 2);
}

#[tokio::test]
async fn test_recovers_after_transient_connect_failure() {
    let driver = orders_driver().with_connect_error("Could not reach Snowflake");
    let mut connector = SnowflakeConnector::with_driver(config(), driver.clone());

    assert_eq!(connector.execute_query("SELECT 1").await, None);

    driver.set_connect_error(None);
    assert!(connector.execute_query("SELECT 1").await.is_some());
    connector.close().await;

    assert_eq!(driver.calls().connects, 2);
}

#[tokio::test]
async fn test_scoped_block() {
    let driver = orders_driver();
    let mut connector = SnowflakeConnector::with_driver(config(), driver.clone());

    let shipped = connector
        .scoped(|c| {
            Box::pin(async move {
                let records = c
                    .execute_query("SELECT ORDER_ID, STATUS, TOTAL FROM ORDERS")
                    .await
                    .unwrap_or_default();
                records
                    .iter()
                    .filter(|r| r["STATUS"] == Value::from("SHIPPED"))
                    .count()
            })
        })
        .await;

    assert_eq!(shipped, 2);
    assert!(!connector.is_connected());
    assert_eq!(driver.calls().connection_closes, 1);
}

#[test]
fn test_blocking_usage() {
    let driver = orders_driver();
    let mut connector = SnowflakeConnector::with_driver(config(), driver.clone());

    let records = tokio_test::block_on(async {
        let records = connector
            .execute_query("SELECT ORDER_ID, STATUS, TOTAL FROM ORDERS")
            .await;
        connector.close().await;
        records
    });

    assert_eq!(records.map(|r| r.len()), Some(3));
    assert_eq!(driver.calls().connection_closes, 1);
}

#[tokio::test]
async fn test_records_serialize_in_column_order() {
    let mut connector = SnowflakeConnector::with_driver(config(), orders_driver());

    let records = connector
        .execute_query("SELECT ORDER_ID, STATUS, TOTAL FROM ORDERS")
        .await
        .unwrap();
    connector.close().await;

    let json = serde_json::to_string(&records[0]).unwrap();
    let order_id = json.find("ORDER_ID").unwrap();
    let status = json.find("STATUS").unwrap();
    let total = json.find("TOTAL").unwrap();
    assert!(order_id < status && status < total);
}
