//! Configuration management for the connector.
//!
//! Handles the immutable connection settings handed to a connector, plus
//! loading named connection profiles from TOML files and environment variables.

use crate::error::{ConnectorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Domain appended to the account identifier when no host is configured.
const DEFAULT_DOMAIN: &str = "snowflakecomputing.com";

/// Settings for one Snowflake session.
///
/// The six core fields are fixed at construction; only the optional endpoint
/// and role extras can be set, and only while building.
#[derive(Clone, PartialEq, Eq)]
pub struct SnowflakeConfig {
    account: String,
    user: String,
    password: String,
    warehouse: String,
    database: String,
    schema: String,
    role: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    protocol: String,
}

impl SnowflakeConfig {
    /// Creates a config from the six connection parameters.
    pub fn new(
        account: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        warehouse: impl Into<String>,
        database: impl Into<String>,
        schema: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            user: user.into(),
            password: password.into(),
            warehouse: warehouse.into(),
            database: database.into(),
            schema: schema.into(),
            role: None,
            host: None,
            port: None,
            protocol: "https".to_string(),
        }
    }

    /// Loads the default profile from environment variables (and `.env`).
    pub fn from_env() -> Result<Self> {
        let mut profile = ConnectionProfile::default();
        profile.apply_env_defaults();
        profile.into_config()
    }

    /// Sets the role assumed for the session.
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    /// Overrides the service host (defaults to `<account>.snowflakecomputing.com`).
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Overrides the service port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Overrides the URL scheme (`https` by default).
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    pub fn warehouse(&self) -> &str {
        &self.warehouse
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    /// Returns the host sessions are opened against.
    pub fn host(&self) -> String {
        match &self.host {
            Some(host) => host.clone(),
            None => format!("{}.{DEFAULT_DOMAIN}", self.account),
        }
    }

    /// Returns the base URL of the Snowflake service.
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = format!("{}://{}", self.protocol, self.host());
        if let Some(port) = self.port {
            raw.push(':');
            raw.push_str(&port.to_string());
        }

        Url::parse(&raw)
            .map_err(|e| ConnectorError::config(format!("Invalid service URL '{raw}': {e}")))
    }

    /// Returns a display-safe string (no password) for log lines.
    pub fn display_string(&self) -> String {
        format!(
            "{}@{} ({}.{} on {})",
            self.user, self.account, self.database, self.schema, self.warehouse
        )
    }
}

impl fmt::Debug for SnowflakeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnowflakeConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// Config file contents: a table of named connection profiles.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Named connection profiles.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionProfile>,
}

/// One connection profile as written in the config file.
///
/// Every field is optional so that environment variables can fill the gaps.
#[derive(Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub account: Option<String>,
    pub user: Option<String>,

    /// Password (not recommended to store in config).
    pub password: Option<String>,
    pub warehouse: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub role: Option<String>,

    /// Endpoint override, mostly useful for proxies and private links.
    pub host: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
}

impl fmt::Debug for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProfile")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("role", &self.role)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("protocol", &self.protocol)
            .finish()
    }
}

impl ConnectionProfile {
    /// Fills unset fields from `SNOWFLAKE_*` environment variables, then from
    /// the nearest `.env` file in the working directory or its parents.
    pub fn apply_env_defaults(&mut self) {
        let dotenv = dotenv_vars(dotenvy::dotenv_iter().ok());
        self.apply_process_env_then(&dotenv);
    }

    /// Like [`apply_env_defaults`](Self::apply_env_defaults), reading the
    /// `.env` file at `path` instead of searching for one.
    pub fn apply_env_defaults_with_dotenv(&mut self, path: &Path) {
        let dotenv = dotenv_vars(dotenvy::from_path_iter(path).ok());
        self.apply_process_env_then(&dotenv);
    }

    fn apply_process_env_then(&mut self, dotenv: &HashMap<String, String>) {
        self.apply_defaults_from(|key| {
            std::env::var(key)
                .ok()
                .or_else(|| dotenv.get(key).cloned())
        });
    }

    /// Fills unset fields using the given variable lookup.
    pub fn apply_defaults_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        fn fill(slot: &mut Option<String>, value: Option<String>) {
            if slot.is_none() {
                *slot = value;
            }
        }

        fill(&mut self.account, lookup("SNOWFLAKE_ACCOUNT"));
        fill(&mut self.user, lookup("SNOWFLAKE_USER"));
        fill(&mut self.password, lookup("SNOWFLAKE_PASSWORD"));
        fill(&mut self.warehouse, lookup("SNOWFLAKE_WAREHOUSE"));
        fill(&mut self.database, lookup("SNOWFLAKE_DATABASE"));
        fill(&mut self.schema, lookup("SNOWFLAKE_SCHEMA"));
        fill(&mut self.role, lookup("SNOWFLAKE_ROLE"));
        fill(&mut self.host, lookup("SNOWFLAKE_HOST"));
        if self.port.is_none() {
            self.port = lookup("SNOWFLAKE_PORT").and_then(|p| p.parse().ok());
        }
        fill(&mut self.protocol, lookup("SNOWFLAKE_PROTOCOL"));
    }

    /// Converts the profile into connector settings.
    ///
    /// Fails if any of the six required fields is still unset.
    pub fn into_config(self) -> Result<SnowflakeConfig> {
        fn required(value: Option<String>, name: &str) -> Result<String> {
            value.ok_or_else(|| {
                ConnectorError::config(format!(
                    "missing field '{name}' (set it in the config file or SNOWFLAKE_{})",
                    name.to_uppercase()
                ))
            })
        }

        let mut config = SnowflakeConfig::new(
            required(self.account, "account")?,
            required(self.user, "user")?,
            required(self.password, "password")?,
            required(self.warehouse, "warehouse")?,
            required(self.database, "database")?,
            required(self.schema, "schema")?,
        );

        if let Some(role) = self.role {
            config = config.with_role(role);
        }
        if let Some(host) = self.host {
            config = config.with_host(host);
        }
        if let Some(port) = self.port {
            config = config.with_port(port);
        }
        if let Some(protocol) = self.protocol {
            config = config.with_protocol(protocol);
        }

        Ok(config)
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("snowflake-connector")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file.
    ///
    /// A missing file yields an empty configuration.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConnectorError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            ConnectorError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Gets a named profile, or the default profile if name is None.
    pub fn get_connection(&self, name: Option<&str>) -> Option<&ConnectionProfile> {
        let key = name.unwrap_or("default");
        self.connections.get(key)
    }

    /// Resolves a named profile into connector settings.
    ///
    /// Values from the file win; environment variables fill whatever the file
    /// left unset. An unknown name is an error, while a missing default profile
    /// falls back to the environment alone.
    pub fn resolve(&self, name: Option<&str>) -> Result<SnowflakeConfig> {
        let mut profile = self.profile_or_default(name)?;
        profile.apply_env_defaults();
        profile.into_config()
    }

    /// Resolves a named profile, reading the `.env` file at `dotenv_path`.
    pub fn resolve_with_dotenv(
        &self,
        name: Option<&str>,
        dotenv_path: &Path,
    ) -> Result<SnowflakeConfig> {
        let mut profile = self.profile_or_default(name)?;
        profile.apply_env_defaults_with_dotenv(dotenv_path);
        profile.into_config()
    }

    fn profile_or_default(&self, name: Option<&str>) -> Result<ConnectionProfile> {
        match (self.get_connection(name), name) {
            (Some(profile), _) => Ok(profile.clone()),
            (None, Some(name)) => Err(ConnectorError::config(format!(
                "Connection '{name}' not found in config file"
            ))),
            (None, None) => Ok(ConnectionProfile::default()),
        }
    }
}

/// Collects the pairs of a dotenv file; unreadable lines are skipped.
fn dotenv_vars(iter: Option<dotenvy::Iter<std::fs::File>>) -> HashMap<String, String> {
    iter.into_iter().flatten().filter_map(|item| item.ok()).collect()
}
