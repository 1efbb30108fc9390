//! REST driver tests against a fake Snowflake endpoint.
//!
//! Exercises login, statement execution, result polling, chunk downloads and
//! logout through the public connector API.

use super::fake_server::{failure, login_ok, ok_empty, query_ok, FakeSnowflake};
use pretty_assertions::assert_eq;
use serde_json::json;
use snowflake_connector::db::SnowflakeDriver;
use snowflake_connector::{ConnectorError, SnowflakeConfig, SnowflakeConnector, Value};
use std::net::SocketAddr;

fn config_for(addr: SocketAddr) -> SnowflakeConfig {
    SnowflakeConfig::new("xy12345", "loader", "hunter2", "COMPUTE_WH", "ANALYTICS", "PUBLIC")
        .with_role("REPORTER")
        .with_host(addr.ip().to_string())
        .with_port(addr.port())
        .with_protocol("http")
}

fn connector_for(server: &FakeSnowflake) -> SnowflakeConnector {
    SnowflakeConnector::with_driver(config_for(server.addr), SnowflakeDriver::new().with_timeout(5))
}

fn users_result() -> serde_json::Value {
    json!({
        "rowtype": [
            {"name": "ID", "type": "fixed", "scale": 0, "nullable": false},
            {"name": "NAME", "type": "text", "nullable": true},
            {"name": "CREATED", "type": "date", "nullable": true}
        ],
        "rowset": [["1", "Ada", "19782"], ["2", null, null]],
        "queryResultFormat": "json",
        "queryId": "01b2-0001"
    })
}

#[tokio::test]
async fn test_full_session_lifecycle() {
    let server = FakeSnowflake::start(|request, _| match request.path() {
        "/session/v1/login-request" => login_ok("tok-123"),
        "/queries/v1/query-request" => query_ok(users_result()),
        "/session" => ok_empty(),
        _ => (404, String::new()),
    })
    .await;

    let mut connector = connector_for(&server);
    assert!(connector.connect().await);

    let records = connector
        .execute_query("SELECT ID, NAME, CREATED FROM USERS")
        .await
        .unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(
        records[0].keys().collect::<Vec<_>>(),
        vec!["ID", "NAME", "CREATED"]
    );
    assert_eq!(records[0]["ID"], Value::Int(1));
    assert_eq!(records[0]["NAME"], Value::from("Ada"));
    assert_eq!(records[0]["CREATED"].to_display_string(), "2024-02-29");
    assert!(records[1]["NAME"].is_null());

    connector.close().await;

    let login = &server.requests_to("/session/v1/login-request")[0];
    assert_eq!(login.method, "POST");
    assert!(login.target.contains("databaseName=ANALYTICS"));
    assert!(login.target.contains("schemaName=PUBLIC"));
    assert!(login.target.contains("warehouse=COMPUTE_WH"));
    assert!(login.target.contains("roleName=REPORTER"));
    assert_eq!(login.json()["data"]["LOGIN_NAME"], json!("loader"));
    assert_eq!(login.json()["data"]["ACCOUNT_NAME"], json!("xy12345"));

    let query = &server.requests_to("/queries/v1/query-request")[0];
    assert_eq!(
        query.header("authorization"),
        Some("Snowflake Token=\"tok-123\"")
    );
    assert_eq!(
        query.json()["sqlText"],
        json!("SELECT ID, NAME, CREATED FROM USERS")
    );
    assert_eq!(query.json()["sequenceId"], json!(1));

    let logout = server.requests_to("/session");
    assert_eq!(logout.len(), 1);
    assert!(logout[0].target.contains("delete=true"));
}

#[tokio::test]
async fn test_sequence_id_increments_per_statement() {
    let server = FakeSnowflake::start(|request, _| match request.path() {
        "/session/v1/login-request" => login_ok("tok"),
        "/queries/v1/query-request" => query_ok(users_result()),
        _ => ok_empty(),
    })
    .await;

    let mut connector = connector_for(&server);
    connector.execute_query("SELECT 1").await.unwrap();
    connector.execute_query("SELECT 2").await.unwrap();
    connector.close().await;

    let ids: Vec<_> = server
        .requests_to("/queries/v1/query-request")
        .iter()
        .map(|r| r.json()["sequenceId"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2)]);
}

#[tokio::test]
async fn test_polls_running_statement() {
    let server = FakeSnowflake::start(|request, _| match request.path() {
        "/session/v1/login-request" => login_ok("tok"),
        "/queries/v1/query-request" => (
            200,
            json!({
                "data": {"getResultUrl": "/queries/01b2-0001/result", "queryId": "01b2-0001"},
                "code": "333334",
                "message": "Asynchronous execution in progress.",
                "success": true
            })
            .to_string(),
        ),
        "/queries/01b2-0001/result" => query_ok(users_result()),
        _ => ok_empty(),
    })
    .await;

    let mut connector = connector_for(&server);
    let records = connector.try_execute_query("SELECT SLOW()").await.unwrap();

    assert_eq!(records.len(), 2);
    let poll = &server.requests_to("/queries/01b2-0001/result")[0];
    assert_eq!(poll.method, "GET");
    assert_eq!(poll.header("authorization"), Some("Snowflake Token=\"tok\""));

    connector.close().await;
}

#[tokio::test]
async fn test_downloads_result_chunks() {
    let server = FakeSnowflake::start(|request, addr| match request.path() {
        "/session/v1/login-request" => login_ok("tok"),
        "/queries/v1/query-request" => query_ok(json!({
            "rowtype": [
                {"name": "ID", "type": "fixed", "scale": 0},
                {"name": "NAME", "type": "text"}
            ],
            "rowset": [["1", "Ada"]],
            "chunks": [{"url": format!("http://{addr}/chunks/0"), "rowCount": 2}],
            "chunkHeaders": {"x-amz-server-side-encryption-customer-key": "chunk-key"},
            "queryResultFormat": "json"
        })),
        "/chunks/0" => (200, "[\"2\", \"Grace\"],\n[\"3\", null]".to_string()),
        _ => ok_empty(),
    })
    .await;

    let mut connector = connector_for(&server);
    let records = connector
        .execute_query("SELECT ID, NAME FROM BIG")
        .await
        .unwrap();

    let ids: Vec<_> = records.iter().map(|r| r["ID"].clone()).collect();
    assert_eq!(ids, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);

    let chunk = &server.requests_to("/chunks/0")[0];
    assert_eq!(
        chunk.header("x-amz-server-side-encryption-customer-key"),
        Some("chunk-key")
    );
    assert_eq!(chunk.header("authorization"), None);

    connector.close().await;
}

#[tokio::test]
async fn test_bad_credentials() {
    let server = FakeSnowflake::start(|_, _| {
        failure("390100", "Incorrect username or password was specified.")
    })
    .await;

    let mut connector = connector_for(&server);
    assert!(!connector.connect().await);
    assert!(!connector.is_connected());

    let err = connector.try_connect().await.unwrap_err();
    assert_eq!(
        err.to_string(),
        "Connection error: Authentication failed for user 'loader'. Check your credentials."
    );
}

#[tokio::test]
async fn test_query_failure_is_reported() {
    let server = FakeSnowflake::start(|request, _| match request.path() {
        "/session/v1/login-request" => login_ok("tok"),
        "/queries/v1/query-request" => failure(
            "002003",
            "SQL compilation error: Object 'MISSING' does not exist or not authorized.",
        ),
        _ => ok_empty(),
    })
    .await;

    let mut connector = connector_for(&server);
    assert_eq!(connector.execute_query("SELECT * FROM MISSING").await, None);
    assert!(connector.is_connected());

    let err = connector
        .try_execute_query("SELECT * FROM MISSING")
        .await
        .unwrap_err();
    assert!(matches!(err, ConnectorError::Query(_)));
    assert!(err.to_string().contains("does not exist"));
    assert!(err.to_string().contains("002003"));

    connector.close().await;
}

#[tokio::test]
async fn test_arrow_results_are_rejected() {
    let server = FakeSnowflake::start(|request, _| match request.path() {
        "/session/v1/login-request" => login_ok("tok"),
        "/queries/v1/query-request" => query_ok(json!({
            "rowtype": [],
            "rowsetBase64": "",
            "queryResultFormat": "arrow"
        })),
        _ => ok_empty(),
    })
    .await;

    let mut connector = connector_for(&server);
    let err = connector.try_execute_query("SELECT 1").await.unwrap_err();
    assert!(err.to_string().contains("arrow"));

    connector.close().await;
}

#[tokio::test]
async fn test_http_error_status() {
    let server = FakeSnowflake::start(|_, _| (503, String::new())).await;

    let mut connector = connector_for(&server);
    let err = connector.try_connect().await.unwrap_err();

    assert!(matches!(err, ConnectorError::Connection(_)));
    assert!(err.to_string().contains("503"));
}

#[tokio::test]
async fn test_unreachable_service() {
    // Grab a free port, then release it so nothing is listening there
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut connector =
        SnowflakeConnector::with_driver(config_for(addr), SnowflakeDriver::new().with_timeout(2));

    assert!(!connector.connect().await);
    assert_eq!(connector.execute_query("SELECT 1").await, None);
    connector.close().await;
}

#[tokio::test]
async fn test_logout_failure_is_swallowed() {
    let server = FakeSnowflake::start(|request, _| match request.path() {
        "/session/v1/login-request" => login_ok("tok"),
        "/session" => failure("390111", "Session no longer exists."),
        _ => ok_empty(),
    })
    .await;

    let mut connector = connector_for(&server);
    assert!(connector.connect().await);

    connector.close().await;
    assert!(!connector.is_connected());
    assert_eq!(server.requests_to("/session").len(), 1);
}
