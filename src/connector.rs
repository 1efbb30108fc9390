//! The connector facade.
//!
//! `SnowflakeConnector` owns one connection and one cursor at a time and turns
//! query results into [`Record`]s. Its plain operations report failure as
//! `false`/`None` after logging the cause; the `try_*` variants return the
//! underlying [`ConnectorError`] instead.

use crate::config::SnowflakeConfig;
use crate::db::{ColumnInfo, Connection, Cursor, Driver, Record, SnowflakeDriver};
use crate::error::{ConnectorError, Result};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info, warn};

/// Number of query characters echoed in the success log line.
const QUERY_PREVIEW_CHARS: usize = 100;

/// Open session state. The cursor never outlives its connection.
struct Handles {
    connection: Box<dyn Connection>,
    cursor: Box<dyn Cursor>,
}

/// Connects to Snowflake, runs queries and hands back rows as records.
pub struct SnowflakeConnector {
    config: SnowflakeConfig,
    driver: Box<dyn Driver>,
    handles: Option<Handles>,
}

impl SnowflakeConnector {
    /// Creates an unconnected connector using the Snowflake REST driver.
    pub fn new(config: SnowflakeConfig) -> Self {
        Self::with_driver(config, SnowflakeDriver::new())
    }

    /// Creates an unconnected connector using the given driver.
    pub fn with_driver(config: SnowflakeConfig, driver: impl Driver + 'static) -> Self {
        Self {
            config,
            driver: Box::new(driver),
            handles: None,
        }
    }

    /// Returns the connection settings.
    pub fn config(&self) -> &SnowflakeConfig {
        &self.config
    }

    /// Returns true while a connection and cursor are held.
    pub fn is_connected(&self) -> bool {
        self.handles.is_some()
    }

    /// Opens a session and allocates a cursor.
    ///
    /// Returns `false` and logs the cause on failure, leaving any existing
    /// session untouched.
    pub async fn connect(&mut self) -> bool {
        match self.try_connect().await {
            Ok(()) => {
                info!("Successfully connected to Snowflake");
                true
            }
            Err(e) => {
                error!(category = e.category(), "Error connecting to Snowflake: {}", e);
                false
            }
        }
    }

    /// Opens a session and allocates a cursor, returning the cause on failure.
    ///
    /// An already open session is replaced, and closed, only once the new one
    /// is fully established.
    pub async fn try_connect(&mut self) -> Result<()> {
        let handles = self.open_handles().await?;

        if let Some(previous) = self.handles.replace(handles) {
            debug!("Replacing existing session");
            if let Err(e) = release(previous).await {
                warn!("Error closing replaced session: {}", e);
            }
        }

        Ok(())
    }

    async fn open_handles(&self) -> Result<Handles> {
        debug!("Connecting to {}", self.config.display_string());
        let mut connection = self.driver.connect(&self.config).await?;

        match connection.cursor().await {
            Ok(cursor) => Ok(Handles { connection, cursor }),
            Err(e) => {
                if let Err(close_err) = connection.close().await {
                    warn!("Error closing half-open session: {}", close_err);
                }
                Err(e)
            }
        }
    }

    /// Executes a statement and returns every result row as a record.
    ///
    /// Connects first if needed. Returns `None` and logs the cause on any
    /// failure.
    pub async fn execute_query(&mut self, query: &str) -> Option<Vec<Record>> {
        if self.handles.is_none() && !self.connect().await {
            return None;
        }

        match self.run_statement(query).await {
            Ok(records) => {
                info!("Successfully executed query: {}...", preview(query));
                Some(records)
            }
            Err(e) => {
                error!(category = e.category(), "Error executing query: {}", e);
                None
            }
        }
    }

    /// Executes a statement, returning the cause on failure.
    pub async fn try_execute_query(&mut self, query: &str) -> Result<Vec<Record>> {
        if self.handles.is_none() {
            self.try_connect().await?;
        }

        let records = self.run_statement(query).await?;
        info!("Successfully executed query: {}...", preview(query));
        Ok(records)
    }

    async fn run_statement(&mut self, query: &str) -> Result<Vec<Record>> {
        let handles = self
            .handles
            .as_mut()
            .ok_or_else(|| ConnectorError::internal("No active connection"))?;

        handles.cursor.execute(query).await?;

        let columns: Vec<ColumnInfo> = match handles.cursor.description() {
            Some(columns) => columns.to_vec(),
            None => return Ok(Vec::new()),
        };

        let rows = handles.cursor.fetch_all().await?;
        Ok(rows
            .into_iter()
            .map(|row| Record::from_row(&columns, row))
            .collect())
    }

    /// Releases the cursor and connection.
    ///
    /// Never fails: teardown errors are logged. Calling it again, or without
    /// ever connecting, is harmless.
    pub async fn close(&mut self) {
        if let Some(handles) = self.handles.take() {
            if let Err(e) = release(handles).await {
                error!(category = e.category(), "Error closing connection: {}", e);
                return;
            }
        }

        info!("Successfully closed Snowflake connection");
    }

    /// Runs `body` inside a connect/close pair.
    ///
    /// `close()` runs after the body no matter how it ends, including a
    /// panic, which is resumed once the session is released. The outcome of
    /// the initial `connect()` is not checked; the body can ask
    /// [`is_connected`](Self::is_connected).
    ///
    /// ```no_run
    /// # use snowflake_connector::{SnowflakeConfig, SnowflakeConnector};
    /// # async fn demo(config: SnowflakeConfig) {
    /// let mut connector = SnowflakeConnector::new(config);
    /// let rows = connector
    ///     .scoped(|c| Box::pin(async move { c.execute_query("SELECT CURRENT_VERSION()").await }))
    ///     .await;
    /// # }
    /// ```
    pub async fn scoped<T, F>(&mut self, body: F) -> T
    where
        F: for<'a> FnOnce(&'a mut SnowflakeConnector) -> BoxFuture<'a, T>,
    {
        self.connect().await;
        let outcome = AssertUnwindSafe(body(&mut *self)).catch_unwind().await;
        self.close().await;

        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

/// Closes the cursor, then the connection, reporting the first error.
async fn release(mut handles: Handles) -> Result<()> {
    let cursor_result = handles.cursor.close().await;
    let connection_result = handles.connection.close().await;
    cursor_result.and(connection_result)
}

fn preview(query: &str) -> String {
    query.chars().take(QUERY_PREVIEW_CHARS).collect()
}

impl fmt::Debug for SnowflakeConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeConnector")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl Drop for SnowflakeConnector {
    fn drop(&mut self) {
        let Some(handles) = self.handles.take() else {
            return;
        };

        warn!("Snowflake connector dropped while connected; releasing session");
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    if let Err(e) = release(handles).await {
                        error!(category = e.category(), "Error closing connection: {}", e);
                    }
                });
            }
            Err(_) => debug!("No async runtime available; session dropped without logout"),
        }
    }
}
