//! Database session, bootstrap, and health check.
//!
//! The [`Store`] owns the connection pool. Every operation borrows it from
//! the store; there is no global connection.

mod criteria;
pub mod items;
pub mod schema;
pub mod subscriptions;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::StoreConfig;
use crate::error::{Error, Result};

pub const SUBSCRIPTIONS_TABLE: &str = "wrkr_subscriptions";
pub const QUEUE_ITEMS_TABLE: &str = "wrkr_qitems";
pub const QUEUE_WHEN_INDEX: &str = "idx_queue_when";

/// Store handle. Owns the configuration and, once connected, the pool.
pub struct Store {
    config: StoreConfig,
    pool: Option<PgPool>,
}

impl Store {
    /// Create an unconnected store. Fails if the configuration is incomplete.
    pub fn new(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, pool: None })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.pool.is_some()
    }

    /// Connect to Postgres and bootstrap the schema.
    ///
    /// Creates the database if it does not exist yet, opens the pool, then
    /// runs [`ensure_ready`](Self::ensure_ready). Calling this on a connected
    /// store replaces the pool.
    pub async fn connect(&mut self) -> Result<()> {
        tracing::debug!(
            host = %self.config.host,
            port = self.config.port,
            db = %self.config.db_name,
            "connecting"
        );

        schema::ensure_database(&self.config).await?;

        let mut options = PgPoolOptions::new().max_connections(self.config.max_connections);
        if let Some(timeout) = self.config.timeout {
            options = options.acquire_timeout(timeout);
        }
        let pool = options
            .connect_with(self.config.connect_options(&self.config.db_name))
            .await?;

        if let Some(old) = self.pool.replace(pool) {
            old.close().await;
        }
        tracing::info!(db = %self.config.db_name, "connected");

        if let Err(e) = self.ensure_ready().await {
            // A store that failed bootstrap must not be used.
            if let Some(pool) = self.pool.take() {
                pool.close().await;
            }
            return Err(e);
        }
        Ok(())
    }

    /// Close the pool. A no-op on a store that was never connected.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(pool) = self.pool.take() else {
            return Ok(());
        };
        pool.close().await;
        tracing::info!(db = %self.config.db_name, "disconnected");
        Ok(())
    }

    /// Round-trip a `SELECT 1`.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(self.pool()?).await?;
        Ok(())
    }

    /// The connection pool, or `NotConnected`.
    pub(crate) fn pool(&self) -> Result<&PgPool> {
        self.pool.as_ref().ok_or(Error::NotConnected)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("db_name", &self.config.db_name)
            .field("connected", &self.pool.is_some())
            .finish()
    }
}
