//! Typed store configuration.
//!
//! Loads once at startup, fails fast if required settings are missing.
//! The database password is wrapped in secrecy::SecretString to prevent
//! log leaks.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::{Error, Result};

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 28015;
pub const DEFAULT_ADMIN_DB: &str = "postgres";
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database holding the subscription and queue item tables.
    pub db_name: String,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// Bounds connection acquisition and the index wait during bootstrap.
    pub timeout: Option<Duration>,
    /// Require TLS on the wire. When false, TLS is used if the server offers it.
    pub ssl: bool,
    /// Database used to check for and create `db_name`.
    pub admin_db: String,
    pub max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl StoreConfig {
    /// Configuration with defaults for everything but the database name.
    pub fn new(db_name: impl Into<String>) -> Self {
        Self {
            db_name: db_name.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            username: None,
            password: None,
            timeout: None,
            ssl: false,
            admin_db: DEFAULT_ADMIN_DB.to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_name = lookup("WRKR_DB_NAME").ok_or_else(|| {
            Error::Config("required environment variable WRKR_DB_NAME is not set".to_string())
        })?;

        let mut config = Self::new(db_name);
        if let Some(host) = lookup("WRKR_DB_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("WRKR_DB_PORT") {
            config.port = parse_var("WRKR_DB_PORT", &port)?;
        }
        config.username = lookup("WRKR_DB_USER");
        config.password = lookup("WRKR_DB_PASSWORD").map(SecretString::from);
        if let Some(secs) = lookup("WRKR_DB_TIMEOUT_SECS") {
            config.timeout = Some(Duration::from_secs(parse_var(
                "WRKR_DB_TIMEOUT_SECS",
                &secs,
            )?));
        }
        if let Some(ssl) = lookup("WRKR_DB_SSL") {
            config.ssl = parse_bool("WRKR_DB_SSL", &ssl)?;
        }
        if let Some(admin_db) = lookup("WRKR_DB_ADMIN_DB") {
            config.admin_db = admin_db;
        }
        if let Some(n) = lookup("WRKR_MAX_CONNECTIONS") {
            config.max_connections = parse_var("WRKR_MAX_CONNECTIONS", &n)?;
        }
        config.otel_endpoint = lookup("OTEL_ENDPOINT");
        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document with a `[database]` table.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: ConfigFile = toml::from_str(s)?;
        let db = file.database;

        let config = Self {
            db_name: db.name,
            host: db.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: db.port.unwrap_or(DEFAULT_PORT),
            username: db.username,
            password: db.password.map(SecretString::from),
            timeout: db.timeout_secs.map(Duration::from_secs),
            ssl: db.ssl.unwrap_or(false),
            admin_db: db.admin_db.unwrap_or_else(|| DEFAULT_ADMIN_DB.to_string()),
            max_connections: db.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
            otel_endpoint: file.otel_endpoint,
            log_level: file.log_level.unwrap_or_else(|| "info".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Check the settings that must be present before any network I/O.
    pub fn validate(&self) -> Result<()> {
        if self.db_name.trim().is_empty() {
            return Err(Error::Config("database name must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("database port must not be 0".to_string()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Connection options targeting `database` on the configured server.
    pub fn connect_options(&self, database: &str) -> PgConnectOptions {
        let ssl_mode = if self.ssl {
            PgSslMode::Require
        } else {
            PgSslMode::Prefer
        };

        let mut opts = PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .database(database)
            .ssl_mode(ssl_mode)
            .application_name("wrkr-store");
        if let Some(ref username) = self.username {
            opts = opts.username(username);
        }
        if let Some(ref password) = self.password {
            opts = opts.password(password.expose_secret());
        }
        opts
    }
}

#[derive(Deserialize)]
struct ConfigFile {
    database: DatabaseSection,
    otel_endpoint: Option<String>,
    log_level: Option<String>,
}

#[derive(Deserialize)]
struct DatabaseSection {
    name: String,
    host: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    timeout_secs: Option<u64>,
    ssl: Option<bool>,
    admin_db: Option<String>,
    max_connections: Option<u32>,
}

fn parse_var<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} has an invalid value: {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean, got {value:?}"
        ))),
    }
}
