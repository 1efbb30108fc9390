//! Mock driver for testing.
//!
//! Provides an in-memory driver with scripted results and failures, and
//! records every call so tests can check how the connector drove it.

use super::{ColumnInfo, Connection, Cursor, Driver, Row, Value};
use crate::config::SnowflakeConfig;
use crate::error::{ConnectorError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// A canned result set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockTable {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Row>,
}

impl MockTable {
    /// Creates a table with text columns of the given names.
    pub fn new(columns: &[&str]) -> Self {
        Self {
            columns: columns.iter().map(|c| ColumnInfo::new(*c, "text")).collect(),
            rows: Vec::new(),
        }
    }

    /// Appends a row.
    pub fn with_row(mut self, row: Vec<Value>) -> Self {
        self.rows.push(row);
        self
    }
}

/// Counters and logs of the calls a mock driver received.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriverCalls {
    pub connects: usize,
    pub cursors: usize,
    pub executed: Vec<String>,
    pub cursor_closes: usize,
    pub connection_closes: usize,
}

#[derive(Debug, Default)]
struct MockState {
    tables: HashMap<String, MockTable>,
    failing_queries: HashMap<String, String>,
    connect_error: Option<String>,
    cursor_error: Option<String>,
    cursor_close_error: Option<String>,
    connection_close_error: Option<String>,
    calls: DriverCalls,
}

/// A mock driver that returns predefined results.
///
/// Clones share state, so a test can keep one handle for inspection while the
/// connector owns another.
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    state: Arc<Mutex<MockState>>,
}

impl MockDriver {
    /// Creates a mock driver with no canned results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the result returned for an exact statement.
    pub fn with_table(self, sql: impl Into<String>, table: MockTable) -> Self {
        self.lock().tables.insert(sql.into(), table);
        self
    }

    /// Makes an exact statement fail with the given message.
    pub fn with_failing_query(self, sql: impl Into<String>, message: impl Into<String>) -> Self {
        self.lock()
            .failing_queries
            .insert(sql.into(), message.into());
        self
    }

    /// Makes every connect attempt fail until cleared.
    pub fn with_connect_error(self, message: impl Into<String>) -> Self {
        self.set_connect_error(Some(message.into()));
        self
    }

    /// Makes cursor allocation fail.
    pub fn with_cursor_error(self, message: impl Into<String>) -> Self {
        self.lock().cursor_error = Some(message.into());
        self
    }

    /// Makes cursor teardown fail.
    pub fn with_cursor_close_error(self, message: impl Into<String>) -> Self {
        self.lock().cursor_close_error = Some(message.into());
        self
    }

    /// Makes connection teardown fail.
    pub fn with_connection_close_error(self, message: impl Into<String>) -> Self {
        self.lock().connection_close_error = Some(message.into());
        self
    }

    /// Sets or clears the connect failure.
    pub fn set_connect_error(&self, message: Option<String>) {
        self.lock().connect_error = message;
    }

    /// Returns a snapshot of the calls received so far.
    pub fn calls(&self) -> DriverCalls {
        self.lock().calls.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        // A panicking test thread must not hide the state from the others.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Driver for MockDriver {
    async fn connect(&self, _config: &SnowflakeConfig) -> Result<Box<dyn Connection>> {
        let mut state = self.lock();
        state.calls.connects += 1;

        if let Some(message) = &state.connect_error {
            return Err(ConnectorError::connection(message.clone()));
        }

        Ok(Box::new(MockConnection {
            driver: self.clone(),
            open: Arc::new(AtomicBool::new(true)),
        }))
    }
}

struct MockConnection {
    driver: MockDriver,
    open: Arc<AtomicBool>,
}

#[async_trait]
impl Connection for MockConnection {
    async fn cursor(&self) -> Result<Box<dyn Cursor>> {
        let mut state = self.driver.lock();
        state.calls.cursors += 1;

        if !self.open.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection("Connection is closed"));
        }
        if let Some(message) = &state.cursor_error {
            return Err(ConnectorError::connection(message.clone()));
        }

        Ok(Box::new(MockCursor {
            driver: self.driver.clone(),
            connection_open: Arc::clone(&self.open),
            result: None,
            closed: false,
        }))
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.driver.lock();
        state.calls.connection_closes += 1;
        self.open.store(false, Ordering::SeqCst);

        match &state.connection_close_error {
            Some(message) => Err(ConnectorError::connection(message.clone())),
            None => Ok(()),
        }
    }
}

struct MockCursor {
    driver: MockDriver,
    connection_open: Arc<AtomicBool>,
    result: Option<MockTable>,
    closed: bool,
}

impl MockCursor {
    fn ensure_usable(&self) -> Result<()> {
        if self.closed {
            return Err(ConnectorError::query("Cursor is closed"));
        }
        if !self.connection_open.load(Ordering::SeqCst) {
            return Err(ConnectorError::connection("Connection is closed"));
        }
        Ok(())
    }
}

#[async_trait]
impl Cursor for MockCursor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.ensure_usable()?;

        let mut state = self.driver.lock();
        state.calls.executed.push(sql.to_string());

        if let Some(message) = state.failing_queries.get(sql) {
            return Err(ConnectorError::query(message.clone()));
        }

        let table = match state.tables.get(sql) {
            Some(table) => table.clone(),
            None if sql.trim_start().to_uppercase().starts_with("SELECT") => {
                MockTable::new(&["RESULT"])
                    .with_row(vec![Value::String(format!("Mock result for: {sql}"))])
            }
            // Statements without a registered result produce no rows
            None => MockTable::default(),
        };

        self.result = Some(table);
        Ok(())
    }

    fn description(&self) -> Option<&[ColumnInfo]> {
        self.result.as_ref().map(|table| table.columns.as_slice())
    }

    async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        self.ensure_usable()?;

        match self.result.as_mut() {
            Some(table) => Ok(std::mem::take(&mut table.rows)),
            None => Err(ConnectorError::query("No statement has been executed")),
        }
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.driver.lock();
        state.calls.cursor_closes += 1;
        self.closed = true;
        self.result = None;

        match &state.cursor_close_error {
            Some(message) => Err(ConnectorError::query(message.clone())),
            None => Ok(()),
        }
    }
}
