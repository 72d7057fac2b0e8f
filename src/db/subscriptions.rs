//! Subscription registry: event name -> set of queue names.

use opentelemetry::KeyValue;

use crate::error::Result;
use crate::model::Subscription;
use crate::telemetry::metrics;

impl super::Store {
    /// Add `queue` to the subscribers of `event_name` (idempotent).
    ///
    /// A single upsert; the queue is appended only if it is not already in
    /// the set, under the row lock taken by `ON CONFLICT`.
    pub async fn subscribe(&self, event_name: &str, queue: &str) -> Result<()> {
        let pool = self.pool()?;
        tracing::debug!(event = event_name, queue, "subscribe");

        sqlx::query(
            "INSERT INTO wrkr_subscriptions (event_name, queues) VALUES ($1, ARRAY[$2])
             ON CONFLICT (event_name) DO UPDATE SET queues =
                 CASE WHEN $2 = ANY(wrkr_subscriptions.queues) THEN wrkr_subscriptions.queues
                      ELSE array_append(wrkr_subscriptions.queues, $2)
                 END",
        )
        .bind(event_name)
        .bind(queue)
        .execute(pool)
        .await?;

        metrics::subscription_changes().add(1, &[KeyValue::new("operation", "subscribe")]);
        Ok(())
    }

    /// Remove `queue` from the subscribers of `event_name`. Removing a queue
    /// that is not subscribed succeeds silently.
    pub async fn unsubscribe(&self, event_name: &str, queue: &str) -> Result<()> {
        let pool = self.pool()?;
        tracing::debug!(event = event_name, queue, "unsubscribe");

        sqlx::query(
            "UPDATE wrkr_subscriptions SET queues = array_remove(queues, $2)
             WHERE event_name = $1",
        )
        .bind(event_name)
        .bind(queue)
        .execute(pool)
        .await?;

        metrics::subscription_changes().add(1, &[KeyValue::new("operation", "unsubscribe")]);
        Ok(())
    }

    /// Queues subscribed to `event_name`; empty if there is no record.
    pub async fn subscriptions(&self, event_name: &str) -> Result<Vec<String>> {
        let pool = self.pool()?;
        let row: Option<(Vec<String>,)> =
            sqlx::query_as("SELECT queues FROM wrkr_subscriptions WHERE event_name = $1")
                .bind(event_name)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|(queues,)| queues).unwrap_or_default())
    }

    /// The subscription record for `event_name`, empty if there is none.
    pub async fn subscription(&self, event_name: &str) -> Result<Subscription> {
        Ok(Subscription {
            event_name: event_name.to_string(),
            queues: self.subscriptions(event_name).await?,
        })
    }
}
