//! Driver abstraction layer.
//!
//! Provides a trait-based interface for the database driver behind the
//! connector, so that the Snowflake REST driver and the in-memory mock can be
//! used interchangeably.

mod convert;
mod mock;
mod snowflake;
mod types;

pub use mock::{DriverCalls, MockDriver, MockTable};
pub use snowflake::SnowflakeDriver;
pub use types::{ColumnInfo, Record, Row, Value};

use crate::config::SnowflakeConfig;
use crate::error::Result;
use async_trait::async_trait;

/// Opens sessions against a database service.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Opens a new session using the given settings.
    async fn connect(&self, config: &SnowflakeConfig) -> Result<Box<dyn Connection>>;
}

/// A live session with the database service.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Allocates a cursor bound to this session.
    async fn cursor(&self) -> Result<Box<dyn Cursor>>;

    /// Ends the session.
    async fn close(&mut self) -> Result<()>;
}

/// A stateful statement handle bound to a connection.
#[async_trait]
pub trait Cursor: Send + Sync {
    /// Executes a statement, replacing any previous result.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Column metadata of the last executed statement, if it produced any.
    fn description(&self) -> Option<&[ColumnInfo]>;

    /// Returns all remaining rows of the last executed statement.
    async fn fetch_all(&mut self) -> Result<Vec<Row>>;

    /// Releases the cursor and any buffered result.
    async fn close(&mut self) -> Result<()>;
}
