//! Snowflake driver implementation.
//!
//! Provides the `SnowflakeDriver` struct that implements the `Driver` trait by
//! speaking Snowflake's REST session protocol over HTTPS using reqwest.

use super::convert::convert_row;
use super::{ColumnInfo, Connection, Cursor, Driver, Row};
use crate::config::SnowflakeConfig;
use crate::error::{ConnectorError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

/// Default timeout for a single HTTP request.
const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Delay between polls of a statement that is still running.
const POLL_INTERVAL_MS: u64 = 500;

const LOGIN_PATH: &str = "/session/v1/login-request";
const QUERY_PATH: &str = "/queries/v1/query-request";
const SESSION_PATH: &str = "/session";

/// Client identity reported at login; it selects the JSON result format.
const CLIENT_APP_ID: &str = "Go";
const CLIENT_APP_VERSION: &str = "1.6.22";

/// Response codes for "statement still running, poll again".
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";

/// Response code for a rejected username/password pair.
const BAD_CREDENTIALS: &str = "390100";

const SNOWFLAKE_ACCEPT: &str = "application/snowflake";

/// Snowflake REST driver.
#[derive(Debug, Clone)]
pub struct SnowflakeDriver {
    timeout: Duration,
}

impl SnowflakeDriver {
    /// Creates a driver with default settings.
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout = Duration::from_secs(timeout_secs);
        self
    }
}

impl Default for SnowflakeDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Driver for SnowflakeDriver {
    async fn connect(&self, config: &SnowflakeConfig) -> Result<Box<dyn Connection>> {
        let base_url = config.base_url()?;

        let client = Client::builder()
            .timeout(self.timeout)
            .gzip(true)
            .build()
            .map_err(|e| ConnectorError::internal(format!("Failed to create HTTP client: {e}")))?;

        let session = Session::login(client, base_url, config).await?;
        debug!("Opened Snowflake session for {}", config.display_string());

        Ok(Box::new(SnowflakeConnection {
            session: Arc::new(session),
        }))
    }
}

/// Authenticated session state shared by a connection and its cursors.
struct Session {
    client: Client,
    base_url: Url,
    token: String,
    sequence: AtomicU64,
}

impl Session {
    async fn login(client: Client, base_url: Url, config: &SnowflakeConfig) -> Result<Self> {
        let request_id = Uuid::new_v4().to_string();
        let mut params = vec![
            ("request_id", request_id.as_str()),
            ("databaseName", config.database()),
            ("schemaName", config.schema()),
            ("warehouse", config.warehouse()),
        ];
        if let Some(role) = config.role() {
            params.push(("roleName", role));
        }

        let url = endpoint(&base_url, LOGIN_PATH, &params)?;
        let body = LoginRequest::new(config);

        let request = client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&body);
        let envelope: Envelope<LoginResponseData> = send(request, &base_url).await?;

        if !envelope.success {
            return Err(map_login_error(&envelope, config));
        }

        let token = envelope
            .data
            .and_then(|data| data.token)
            .ok_or_else(|| ConnectorError::protocol("Login response carried no session token"))?;

        Ok(Self {
            client,
            base_url,
            token,
            sequence: AtomicU64::new(0),
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header(AUTHORIZATION, format!("Snowflake Token=\"{}\"", self.token))
            .header(ACCEPT, SNOWFLAKE_ACCEPT)
    }

    /// Runs a statement to completion and returns its first result page.
    async fn run_query(&self, sql: &str) -> Result<QueryResponseData> {
        let request_id = Uuid::new_v4().to_string();
        let url = endpoint(&self.base_url, QUERY_PATH, &[("requestId", request_id.as_str())])?;
        let body = QueryRequest {
            sql_text: sql,
            async_exec: false,
            sequence_id: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            query_submission_time: chrono::Utc::now().timestamp_millis(),
        };

        let request = self.authorized(self.client.post(url)).json(&body);
        let mut envelope: Envelope<QueryResponseData> = send(request, &self.base_url).await?;

        while envelope.is_in_progress() {
            let result_path = envelope
                .data
                .as_ref()
                .and_then(|data| data.get_result_url.clone())
                .ok_or_else(|| {
                    ConnectorError::protocol("Statement still running but no result URL was given")
                })?;

            debug!("Statement still running, polling {}", result_path);
            tokio::time::sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;

            let url = self
                .base_url
                .join(&result_path)
                .map_err(|e| ConnectorError::protocol(format!("Invalid result URL: {e}")))?;
            envelope = send(self.authorized(self.client.get(url)), &self.base_url).await?;
        }

        if !envelope.success {
            return Err(ConnectorError::query(envelope.describe_failure()));
        }

        let data = envelope
            .data
            .ok_or_else(|| ConnectorError::protocol("Query response carried no data"))?;

        match data.query_result_format.as_deref() {
            None | Some("json") => Ok(data),
            Some(other) => Err(ConnectorError::query(format!(
                "Unsupported result format '{other}'"
            ))),
        }
    }

    /// Downloads one result chunk from cloud storage.
    async fn fetch_chunk(&self, chunk: &ChunkInfo, headers: &HeaderMap) -> Result<Vec<RawRow>> {
        let response = self
            .client
            .get(&chunk.url)
            .headers(headers.clone())
            .send()
            .await
            .map_err(|e| ConnectorError::query(format!("Failed to download result chunk: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ConnectorError::query(format!("Failed to read result chunk: {e}")))?;

        if !status.is_success() {
            return Err(ConnectorError::query(format!(
                "Result chunk download failed ({status})"
            )));
        }

        parse_chunk(&body)
    }

    async fn delete(&self) -> Result<()> {
        let url = endpoint(&self.base_url, SESSION_PATH, &[("delete", "true")])?;
        let request = self.authorized(self.client.post(url));
        let envelope: Envelope<serde_json::Value> = send(request, &self.base_url).await?;

        if envelope.success {
            Ok(())
        } else {
            Err(ConnectorError::connection(envelope.describe_failure()))
        }
    }
}

/// A live Snowflake session.
struct SnowflakeConnection {
    session: Arc<Session>,
}

#[async_trait]
impl Connection for SnowflakeConnection {
    async fn cursor(&self) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(SnowflakeCursor {
            session: Arc::clone(&self.session),
            columns: None,
            pending: None,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        self.session.delete().await
    }
}

/// Rows of the last statement that have not been fetched yet.
struct PendingResult {
    rows: Vec<RawRow>,
    chunks: Vec<ChunkInfo>,
    chunk_headers: HeaderMap,
}

struct SnowflakeCursor {
    session: Arc<Session>,
    columns: Option<Vec<ColumnInfo>>,
    pending: Option<PendingResult>,
}

#[async_trait]
impl Cursor for SnowflakeCursor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.columns = None;
        self.pending = None;

        let data = self.session.run_query(sql).await?;
        if let Some(query_id) = &data.query_id {
            debug!("Statement finished with query id {}", query_id);
        }

        let chunk_headers = chunk_headers(&data)?;
        self.columns = Some(data.rowtype.into_iter().map(ColumnInfo::from).collect());
        self.pending = Some(PendingResult {
            rows: data.rowset,
            chunks: data.chunks,
            chunk_headers,
        });
        Ok(())
    }

    fn description(&self) -> Option<&[ColumnInfo]> {
        self.columns.as_deref()
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let columns = self
            .columns
            .as_deref()
            .ok_or_else(|| ConnectorError::query("No statement has been executed"))?;
        let Some(pending) = self.pending.take() else {
            return Ok(Vec::new());
        };

        let expected: usize = pending.rows.len()
            + pending
                .chunks
                .iter()
                .filter_map(|c| c.row_count)
                .sum::<usize>();
        let mut rows = Vec::with_capacity(expected);
        rows.extend(pending.rows.into_iter().map(|raw| convert_row(columns, raw)));

        for (i, chunk) in pending.chunks.iter().enumerate() {
            debug!("Downloading result chunk {} of {}", i + 1, pending.chunks.len());
            let raw_rows = self
                .session
                .fetch_chunk(chunk, &pending.chunk_headers)
                .await?;
            rows.extend(raw_rows.into_iter().map(|raw| convert_row(columns, raw)));
        }

        Ok(rows)
    }

    async fn close(&mut self) -> Result<()> {
        self.columns = None;
        self.pending = None;
        Ok(())
    }
}

type RawRow = Vec<serde_json::Value>;

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    data: LoginData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
struct LoginData<'a> {
    account_name: &'a str,
    login_name: &'a str,
    password: &'a str,
    client_app_id: &'static str,
    client_app_version: &'static str,
    session_parameters: HashMap<&'static str, serde_json::Value>,
}

impl<'a> LoginRequest<'a> {
    fn new(config: &'a SnowflakeConfig) -> Self {
        // The account may carry a region suffix (`xy12345.eu-west-1`); login wants the bare name.
        let account_name = config
            .account()
            .split('.')
            .next()
            .unwrap_or(config.account());

        let mut session_parameters = HashMap::new();
        session_parameters.insert("GO_QUERY_RESULT_FORMAT", serde_json::json!("json"));

        Self {
            data: LoginData {
                account_name,
                login_name: config.user(),
                password: config.password(),
                client_app_id: CLIENT_APP_ID,
                client_app_version: CLIENT_APP_VERSION,
                session_parameters,
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    sql_text: &'a str,
    async_exec: bool,
    sequence_id: u64,
    query_submission_time: i64,
}

/// Common wrapper around every Snowflake REST response.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default, deserialize_with = "code_as_string")]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

impl<T> Envelope<T> {
    fn is_in_progress(&self) -> bool {
        matches!(
            self.code.as_deref(),
            Some(QUERY_IN_PROGRESS) | Some(QUERY_IN_PROGRESS_ASYNC)
        )
    }

    fn describe_failure(&self) -> String {
        let message = self.message.as_deref().unwrap_or("unknown error");
        match &self.code {
            Some(code) => format!("{message} (code {code})"),
            None => message.to_string(),
        }
    }
}

/// Accepts the response code as either a JSON string or number.
fn code_as_string<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    })
}

#[derive(Debug, Deserialize)]
struct LoginResponseData {
    #[serde(default)]
    token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponseData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<RawRow>,
    #[serde(default)]
    chunks: Vec<ChunkInfo>,
    #[serde(default)]
    chunk_headers: Option<HashMap<String, String>>,
    #[serde(default)]
    qrmk: Option<String>,
    #[serde(default)]
    query_result_format: Option<String>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default)]
    query_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    data_type: String,
    #[serde(default = "default_nullable")]
    nullable: bool,
    #[serde(default)]
    scale: Option<i64>,
}

fn default_nullable() -> bool {
    true
}

impl From<RowType> for ColumnInfo {
    fn from(row_type: RowType) -> Self {
        Self {
            name: row_type.name,
            data_type: row_type.data_type,
            nullable: row_type.nullable,
            scale: row_type.scale,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkInfo {
    url: String,
    #[serde(default)]
    row_count: Option<usize>,
}

/// Builds a URL under the service root with the given query parameters.
fn endpoint(base_url: &Url, path: &str, params: &[(&str, &str)]) -> Result<Url> {
    let mut url = base_url
        .join(path)
        .map_err(|e| ConnectorError::config(format!("Invalid endpoint '{path}': {e}")))?;
    if !params.is_empty() {
        url.query_pairs_mut().extend_pairs(params);
    }
    Ok(url)
}

/// Sends a request and decodes the JSON envelope, mapping transport failures.
async fn send<T: DeserializeOwned>(request: RequestBuilder, base_url: &Url) -> Result<Envelope<T>> {
    let host = base_url.host_str().unwrap_or("Snowflake");

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ConnectorError::connection(format!("Request to {host} timed out"))
        } else if e.is_connect() {
            ConnectorError::connection(format!(
                "Cannot connect to {host}. Check the account identifier and your network."
            ))
        } else {
            ConnectorError::connection(format!("Request to {host} failed: {e}"))
        }
    })?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ConnectorError::protocol(format!("Failed to read response: {e}")))?;

    if !status.is_success() {
        return Err(map_status_error(status, &body));
    }

    serde_json::from_str(&body)
        .map_err(|e| ConnectorError::protocol(format!("Failed to parse response: {e}")))
}

fn map_status_error(status: StatusCode, body: &str) -> ConnectorError {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return ConnectorError::connection("Session is not authorized or has expired.");
    }

    if let Ok(envelope) = serde_json::from_str::<Envelope<serde_json::Value>>(body) {
        if envelope.message.is_some() {
            return ConnectorError::connection(format!(
                "Snowflake returned {status}: {}",
                envelope.describe_failure()
            ));
        }
    }

    ConnectorError::connection(format!("Snowflake returned {status}"))
}

fn map_login_error<T>(envelope: &Envelope<T>, config: &SnowflakeConfig) -> ConnectorError {
    if envelope.code.as_deref() == Some(BAD_CREDENTIALS) {
        return ConnectorError::connection(format!(
            "Authentication failed for user '{}'. Check your credentials.",
            config.user()
        ));
    }

    ConnectorError::connection(format!(
        "Login to account '{}' failed: {}",
        config.account(),
        envelope.describe_failure()
    ))
}

/// Picks the headers needed to download result chunks.
fn chunk_headers(data: &QueryResponseData) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();

    if let Some(given) = &data.chunk_headers {
        for (name, value) in given {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ConnectorError::protocol(format!("Invalid chunk header: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ConnectorError::protocol(format!("Invalid chunk header: {e}")))?;
            headers.insert(name, value);
        }
    } else if let Some(qrmk) = &data.qrmk {
        let key = HeaderValue::from_str(qrmk)
            .map_err(|e| ConnectorError::protocol(format!("Invalid result key: {e}")))?;
        headers.insert(
            "x-amz-server-side-encryption-customer-algorithm",
            HeaderValue::from_static("AES256"),
        );
        headers.insert("x-amz-server-side-encryption-customer-key", key);
    } else if !data.chunks.is_empty() {
        warn!("Result has chunks but no download headers");
    }

    Ok(headers)
}

/// Chunk bodies are a comma-separated list of JSON arrays without the outer brackets.
fn parse_chunk(body: &str) -> Result<Vec<RawRow>> {
    let wrapped = format!("[{}]", body.trim());
    serde_json::from_str(&wrapped)
        .map_err(|e| ConnectorError::protocol(format!("Failed to parse result chunk: {e}")))
}
