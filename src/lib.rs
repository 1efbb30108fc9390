//! snowflake-connector - a small Snowflake connection and query facade.
//!
//! ```no_run
//! use snowflake_connector::{SnowflakeConfig, SnowflakeConnector};
//!
//! # async fn demo() {
//! let config = SnowflakeConfig::new("xy12345", "LOADER", "secret", "COMPUTE_WH", "ANALYTICS", "PUBLIC");
//! let mut connector = SnowflakeConnector::new(config);
//!
//! if let Some(records) = connector.execute_query("SELECT ID, NAME FROM USERS").await {
//!     for record in &records {
//!         println!("{} {}", record["ID"], record["NAME"]);
//!     }
//! }
//! connector.close().await;
//! # }
//! ```

pub mod config;
pub mod connector;
pub mod db;
pub mod error;
pub mod logging;

pub use config::SnowflakeConfig;
pub use connector::SnowflakeConnector;
pub use db::{Record, Value};
pub use error::{ConnectorError, Result};
