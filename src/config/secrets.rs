//! Secret handling utilities.
//!
//! Re-exports the secrecy types used for database credentials so callers
//! building a [`StoreConfig`](super::StoreConfig) by hand need no direct
//! dependency on secrecy.

pub use secrecy::{ExposeSecret, SecretString};
