//! Failures surfaced by the driver seam and the connector.
//!
//! The sentinel methods on `SnowflakeConnector` log these and return
//! `false`/`None`; the `try_*` methods hand them to the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The session could not be opened, used, or closed: unreachable host,
    /// request timeout, a non-2xx status, a rejected login (`390100` and
    /// friends), or an expired token.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Snowflake rejected or failed a statement (compilation errors carry
    /// the SQL state code), or a result chunk could not be downloaded.
    #[error("Query error: {0}")]
    Query(String),

    /// Missing profile fields, unreadable TOML, or an endpoint that does not
    /// form a valid URL.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A response that does not match the REST session protocol: no token,
    /// no data, no result URL while polling, or an unparseable chunk.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Broken local state, such as a query with no session behind it.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConnectorError {
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short label attached to log events as the `category` field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Connection(_) => "connection",
            Self::Query(_) => "query",
            Self::Config(_) => "config",
            Self::Protocol(_) => "protocol",
            Self::Internal(_) => "internal",
        }
    }
}

/// Result type alias using ConnectorError.
pub type Result<T> = std::result::Result<T, ConnectorError>;
