//! Key-value backends with expiring entries.
//!
//! The aggregation store only needs a small slice of Redis semantics: string
//! values with a TTL, hashes with field increments, key expiry and prefix
//! listing. `CacheBackend` captures exactly that slice so the pipeline can run
//! against Redis in production and an in-process map in tests/dev.
//!
//! ## Expiry semantics (shared by every backend)
//!
//! - `set_ex` replaces the value and sets a fresh TTL
//! - `hincr` / `hset` create a hash without TTL and keep an existing TTL
//! - `expire` on a missing key is a no-op
//! - expired keys read as absent

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryBackend;
#[cfg(feature = "redis")]
pub use self::redis::RedisBackend;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("store connection error: {0}")]
    Connection(String),

    #[error("store command error: {0}")]
    Command(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Minimal key-value contract used by the aggregation store.
pub trait CacheBackend: Send + Sync {
    /// Verify the backend is reachable.
    fn ping(&self) -> Result<(), StoreError>;

    /// Store a string value with a TTL (replaces any previous value).
    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Increment an integer hash field, returning the new value.
    fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError>;

    /// Read several hash fields at once (`None` for absent fields).
    fn hget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError>;

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// All fields of a hash; empty when the key is absent.
    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Keys starting with `prefix` (order unspecified).
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

impl<B> CacheBackend for Arc<B>
where
    B: CacheBackend + ?Sized,
{
    fn ping(&self) -> Result<(), StoreError> {
        (**self).ping()
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).set_ex(key, value, ttl)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key)
    }

    fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        (**self).hincr(key, field, by)
    }

    fn hget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        (**self).hget(key, fields)
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        (**self).hset(key, field, value)
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        (**self).hgetall(key)
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        (**self).expire(key, ttl)
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        (**self).keys_with_prefix(prefix)
    }
}
