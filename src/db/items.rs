//! Queue item operations: publish, atomic claim, find, and remove.

use std::time::Instant;

use chrono::{DateTime, Utc};
use opentelemetry::KeyValue;
use uuid::Uuid;

use super::criteria::{self as sql, ITEM_COLUMNS};
use crate::error::{Error, Result};
use crate::model::criteria::Criteria;
use crate::model::{ItemId, NewQueueItem, QueueItem};
use crate::telemetry::{metrics, spans};

impl super::Store {
    /// Publish one item or a batch. Returns the generated ids in the order
    /// the items were given.
    ///
    /// All rows go in with a single `INSERT`. If the database reports a
    /// different row count than requested, the call fails with
    /// [`Error::InsertCountMismatch`].
    pub async fn publish(&self, items: impl Into<Vec<NewQueueItem>>) -> Result<Vec<ItemId>> {
        let items: Vec<NewQueueItem> = items.into();
        if items.is_empty() {
            return Ok(Vec::new());
        }
        let pool = self.pool()?;
        let now = Utc::now();
        tracing::debug!(count = items.len(), "publishing");

        let ids: Vec<ItemId> = items.iter().map(|_| ItemId::new()).collect();
        let columns = Columns::from_items(&ids, &items);

        let inserted = sqlx::query(
            "INSERT INTO wrkr_qitems (id, name, queue, tid, payload, parent, created, \"when\", retry_count)
             SELECT id, name, queue, tid, payload, parent, $7, \"when\", retry_count
             FROM UNNEST($1::uuid[], $2::text[], $3::text[], $4::text[], $5::jsonb[], $6::uuid[], $8::timestamptz[], $9::int4[])
                 AS t(id, name, queue, tid, payload, parent, \"when\", retry_count)",
        )
        .bind(columns.id)
        .bind(columns.name)
        .bind(columns.queue)
        .bind(columns.tid)
        .bind(columns.payload)
        .bind(columns.parent)
        .bind(now)
        .bind(columns.when)
        .bind(columns.retry_count)
        .execute(pool)
        .await;

        let inserted = match inserted {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                metrics::items_published().add(1, &[KeyValue::new("result", "error")]);
                return Err(e.into());
            }
        };

        if let Err(e) = check_inserted(ids.len(), inserted) {
            metrics::items_published().add(1, &[KeyValue::new("result", "error")]);
            return Err(e);
        }

        metrics::items_published().add(inserted, &[KeyValue::new("result", "ok")]);
        Ok(ids)
    }

    /// Claim the earliest eligible item in `queue`. Returns None if nothing
    /// is eligible right now.
    pub async fn fetch_next(&self, queue: &str) -> Result<Option<QueueItem>> {
        self.fetch_next_at(queue, Utc::now()).await
    }

    /// Claim the earliest item in `queue` that is eligible at `now`.
    ///
    /// Selection and update run as one statement. The candidate row is
    /// locked with `FOR UPDATE SKIP LOCKED`, so concurrent claimers never
    /// take the same item; a claimer that finds every candidate locked gets
    /// None. Items with no `when` sort ahead of every dated item. The
    /// claimed item comes back with `done = now` and `when` cleared.
    pub async fn fetch_next_at(&self, queue: &str, now: DateTime<Utc>) -> Result<Option<QueueItem>> {
        let pool = self.pool()?;
        let span = spans::start_claim_span(queue);
        let started = Instant::now();

        let row: Option<QueueItemRow> = sqlx::query_as(&format!(
            "WITH candidate AS (
                 SELECT id FROM wrkr_qitems
                 WHERE queue = $1 AND done IS NULL AND (\"when\" IS NULL OR \"when\" <= $2)
                 ORDER BY \"when\" ASC NULLS FIRST
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             UPDATE wrkr_qitems AS q SET done = $2, \"when\" = NULL
             FROM candidate
             WHERE q.id = candidate.id AND q.done IS NULL
             RETURNING {}",
            qualified_columns("q")
        ))
        .bind(queue)
        .bind(now)
        .fetch_optional(pool)
        .await?;

        let item = row.map(QueueItem::from);
        let result = if item.is_some() { "claimed" } else { "empty" };
        metrics::claim_duration_ms().record(
            started.elapsed().as_secs_f64() * 1000.0,
            &[KeyValue::new("result", result)],
        );
        metrics::claims().add(1, &[KeyValue::new("result", result)]);

        match item {
            Some(ref item) => spans::record_claimed(&span, item.id),
            None => tracing::trace!(queue, "nothing eligible"),
        }
        Ok(item)
    }

    /// Find items matching `criteria`, oldest first. Empty when nothing matches.
    pub async fn find(&self, criteria: &Criteria) -> Result<Vec<QueueItem>> {
        let mut qb = sql::select_items(criteria)?;
        let pool = self.pool()?;
        tracing::debug!(?criteria, "finding");

        let rows: Vec<QueueItemRow> = qb.build_query_as().fetch_all(pool).await?;
        Ok(rows.into_iter().map(QueueItem::from).collect())
    }

    /// Permanently delete items matching `criteria`. Returns how many went.
    pub async fn remove(&self, criteria: &Criteria) -> Result<u64> {
        let mut qb = sql::delete_items(criteria)?;
        let pool = self.pool()?;
        tracing::debug!(?criteria, "removing");

        let removed = qb.build().execute(pool).await?.rows_affected();
        metrics::items_removed().add(removed, &[]);
        Ok(removed)
    }
}

/// Column-wise view of a publish batch, for binding to `UNNEST`.
struct Columns {
    id: Vec<Uuid>,
    name: Vec<String>,
    queue: Vec<String>,
    tid: Vec<Option<String>>,
    payload: Vec<serde_json::Value>,
    parent: Vec<Option<Uuid>>,
    when: Vec<Option<DateTime<Utc>>>,
    retry_count: Vec<i32>,
}

impl Columns {
    fn from_items(ids: &[ItemId], items: &[NewQueueItem]) -> Self {
        let mut columns = Self {
            id: Vec::with_capacity(items.len()),
            name: Vec::with_capacity(items.len()),
            queue: Vec::with_capacity(items.len()),
            tid: Vec::with_capacity(items.len()),
            payload: Vec::with_capacity(items.len()),
            parent: Vec::with_capacity(items.len()),
            when: Vec::with_capacity(items.len()),
            retry_count: Vec::with_capacity(items.len()),
        };
        for (id, item) in ids.iter().zip(items) {
            columns.id.push(id.0);
            columns.name.push(item.name.clone());
            columns.queue.push(item.queue.clone());
            columns.tid.push(item.tid.clone());
            columns.payload.push(item.payload.clone());
            columns.parent.push(item.parent.map(|p| p.0));
            columns.when.push(item.when);
            columns.retry_count.push(item.retry_count);
        }
        columns
    }
}

/// Fail unless the insert wrote exactly one row per requested item.
fn check_inserted(requested: usize, inserted: u64) -> Result<()> {
    if inserted == requested as u64 {
        Ok(())
    } else {
        Err(Error::InsertCountMismatch {
            requested,
            inserted,
        })
    }
}

fn qualified_columns(alias: &str) -> String {
    ITEM_COLUMNS
        .split(", ")
        .map(|col| format!("{alias}.{col}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueItemRow {
    id: Uuid,
    name: String,
    queue: String,
    tid: Option<String>,
    payload: serde_json::Value,
    parent: Option<Uuid>,
    created: DateTime<Utc>,
    when: Option<DateTime<Utc>>,
    done: Option<DateTime<Utc>>,
    retry_count: i32,
}

impl From<QueueItemRow> for QueueItem {
    fn from(row: QueueItemRow) -> Self {
        Self {
            id: ItemId(row.id),
            name: row.name,
            queue: row.queue,
            tid: row.tid,
            payload: row.payload,
            parent: row.parent.map(ItemId),
            created: row.created,
            when: row.when,
            done: row.done,
            retry_count: row.retry_count,
        }
    }
}
