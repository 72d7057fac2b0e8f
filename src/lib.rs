//! # wrkr-store
//!
//! Postgres storage engine for a work queue.
//!
//! Persists event subscriptions and queued items, and provides the claim
//! primitive that lets a pool of workers poll the same queue safely: each
//! [`fetch_next`](db::Store::fetch_next) call claims at most one eligible
//! item, and no item is ever claimed twice.

pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod telemetry;

pub use config::StoreConfig;
pub use db::Store;
pub use error::{Error, Result};
pub use model::criteria::Criteria;
pub use model::{ItemId, NewQueueItem, QueueItem, Subscription};
