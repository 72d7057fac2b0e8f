//! Schema bootstrap: database, tables, and the claim ordering index.
//!
//! Every step checks before it creates, so re-running against an
//! initialized database only performs the existence checks. The first
//! failing step aborts the sequence; nothing is rolled back.

use std::time::Duration;

use sqlx::{Connection, PgConnection};

use super::{QUEUE_ITEMS_TABLE, QUEUE_WHEN_INDEX, SUBSCRIPTIONS_TABLE, Store};
use crate::config::StoreConfig;
use crate::error::{Error, Result};

const INDEX_POLL_INTERVAL: Duration = Duration::from_millis(50);

const CREATE_SUBSCRIPTIONS: &str = "
    CREATE TABLE IF NOT EXISTS wrkr_subscriptions (
        event_name  TEXT PRIMARY KEY,
        queues      TEXT[] NOT NULL DEFAULT '{}'
    )";

const CREATE_QUEUE_ITEMS: &str = "
    CREATE TABLE IF NOT EXISTS wrkr_qitems (
        id          UUID PRIMARY KEY,
        name        TEXT NOT NULL,
        queue       TEXT NOT NULL,
        tid         TEXT,
        payload     JSONB NOT NULL DEFAULT '{}',
        parent      UUID,
        created     TIMESTAMPTZ NOT NULL,
        \"when\"      TIMESTAMPTZ,
        done        TIMESTAMPTZ,
        retry_count INTEGER NOT NULL DEFAULT 0
    )";

// Pending items only; claimed rows drop out of the index.
const CREATE_QUEUE_WHEN_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS idx_queue_when
        ON wrkr_qitems (queue, \"when\" ASC NULLS FIRST)
        WHERE done IS NULL";

/// Session advisory lock keys. Concurrent bootstraps queue up on these
/// instead of racing each other's catalog inserts.
const DATABASE_LOCK_KEY: i64 = 0x7772_6b72_0001;
const SCHEMA_LOCK_KEY: i64 = 0x7772_6b72_0002;

/// SQLSTATEs raised when another session created the object first.
const DUPLICATE_DATABASE: &str = "42P04";
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";

/// Create the configured database if it does not exist.
///
/// Runs over a one-off connection to the admin database, since a pool
/// cannot be opened against a database that is not there yet.
pub(crate) async fn ensure_database(config: &StoreConfig) -> Result<()> {
    let mut conn = PgConnection::connect_with(&config.connect_options(&config.admin_db)).await?;

    lock(&mut conn, DATABASE_LOCK_KEY).await?;
    let result = create_database(&mut conn, config).await;
    let released = unlock(&mut conn, DATABASE_LOCK_KEY).await;
    let closed = conn.close().await.map_err(Error::from);

    result.and(released).and(closed)
}

async fn create_database(conn: &mut PgConnection, config: &StoreConfig) -> Result<()> {
    let names: Vec<(String,)> = sqlx::query_as("SELECT datname::text FROM pg_database")
        .fetch_all(&mut *conn)
        .await?;

    if names.iter().any(|(name,)| name == &config.db_name) {
        tracing::debug!(db = %config.db_name, "database exists");
        return Ok(());
    }

    tracing::info!(db = %config.db_name, "creating database");
    let stmt = format!("CREATE DATABASE {}", quote_ident(&config.db_name));
    match sqlx::query(&stmt).execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(e) if created_concurrently(&e) => {
            tracing::debug!(db = %config.db_name, "database created concurrently");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

impl Store {
    /// Make sure both tables and the ordering index exist, then wait until
    /// the index is usable.
    ///
    /// Called by [`connect`](Store::connect); safe to call again at any time,
    /// including from several processes at once.
    pub async fn ensure_ready(&self) -> Result<()> {
        let mut conn = self.pool()?.acquire().await?;
        tracing::debug!(db = %self.config.db_name, "setting up tables");

        lock(&mut conn, SCHEMA_LOCK_KEY).await?;
        let result = create_schema(&mut conn, self.config.timeout).await;

        if let Err(e) = unlock(&mut conn, SCHEMA_LOCK_KEY).await {
            // Closed on drop, so the lock cannot leak back into the pool.
            drop(conn.detach());
            return result.and(Err(e));
        }
        result
    }
}

async fn create_schema(conn: &mut PgConnection, timeout: Option<Duration>) -> Result<()> {
    let tables = list_tables(conn).await?;
    create_table(conn, &tables, SUBSCRIPTIONS_TABLE, CREATE_SUBSCRIPTIONS).await?;
    create_table(conn, &tables, QUEUE_ITEMS_TABLE, CREATE_QUEUE_ITEMS).await?;

    let indexes = list_indexes(conn, QUEUE_ITEMS_TABLE).await?;
    if indexes.iter().any(|name| name == QUEUE_WHEN_INDEX) {
        tracing::debug!(index = QUEUE_WHEN_INDEX, "index exists");
    } else {
        tracing::info!(index = QUEUE_WHEN_INDEX, "creating index");
        create_if_absent(conn, CREATE_QUEUE_WHEN_INDEX).await?;
    }

    wait_for_indexes(conn, QUEUE_ITEMS_TABLE, timeout).await
}

async fn lock(conn: &mut PgConnection, key: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_lock($1)")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

async fn unlock(conn: &mut PgConnection, key: i64) -> Result<()> {
    sqlx::query("SELECT pg_advisory_unlock($1)")
        .bind(key)
        .execute(conn)
        .await?;
    Ok(())
}

/// True when `e` reports that another session already created the object.
fn created_concurrently(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some(DUPLICATE_DATABASE | DUPLICATE_TABLE | UNIQUE_VIOLATION)
        ),
        _ => false,
    }
}

/// Run a `CREATE ... IF NOT EXISTS`, treating a lost creation race as success.
async fn create_if_absent(conn: &mut PgConnection, ddl: &str) -> Result<()> {
    match sqlx::query(ddl).execute(conn).await {
        Ok(_) => Ok(()),
        Err(e) if created_concurrently(&e) => {
            tracing::debug!("object created concurrently");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_tables(conn: &mut PgConnection) -> Result<Vec<String>> {
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT tablename::text FROM pg_tables WHERE schemaname = current_schema()")
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

async fn create_table(
    conn: &mut PgConnection,
    existing: &[String],
    table: &str,
    ddl: &str,
) -> Result<()> {
    if existing.iter().any(|name| name == table) {
        tracing::debug!(table, "table exists");
        return Ok(());
    }
    tracing::info!(table, "creating table");
    create_if_absent(conn, ddl).await
}

async fn list_indexes(conn: &mut PgConnection, table: &str) -> Result<Vec<String>> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT indexname::text FROM pg_indexes
         WHERE schemaname = current_schema() AND tablename = $1",
    )
    .bind(table)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Block until every index on `table` is valid and ready for queries.
async fn wait_for_indexes(
    conn: &mut PgConnection,
    table: &str,
    timeout: Option<Duration>,
) -> Result<()> {
    let started = tokio::time::Instant::now();
    loop {
        let (not_ready,): (i64,) = sqlx::query_as(
            "SELECT count(*) FROM pg_index
             WHERE indrelid = to_regclass($1)::oid
             AND NOT (indisvalid AND indisready)",
        )
        .bind(table)
        .fetch_one(&mut *conn)
        .await?;

        if not_ready == 0 {
            tracing::debug!(table, "indexes ready");
            return Ok(());
        }

        check_index_wait(table, not_ready, started.elapsed(), timeout)?;
        tokio::time::sleep(INDEX_POLL_INTERVAL).await;
    }
}

/// Fail with `IndexNotReady` once `elapsed` has reached the configured
/// timeout. Without a timeout the wait never gives up.
fn check_index_wait(
    table: &str,
    not_ready: i64,
    elapsed: Duration,
    timeout: Option<Duration>,
) -> Result<()> {
    match timeout {
        Some(limit) if elapsed >= limit => Err(Error::IndexNotReady(format!(
            "{not_ready} index(es) on {table} still building after {limit:?}"
        ))),
        _ => Ok(()),
    }
}

/// Quote an SQL identifier, doubling embedded quotes.
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
