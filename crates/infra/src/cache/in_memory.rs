//! In-memory cache backend for tests/dev.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use super::{CacheBackend, StoreError};

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Slot {
    value: Value,
    expires_at: Option<Instant>,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Command(format!(
        "WRONGTYPE operation against key {key:?} holding the wrong kind of value"
    ))
}

/// Process-local backend with per-key deadlines.
///
/// - No IO
/// - Expired keys are invisible to reads and evicted lazily on write access
///   (or in bulk via [`InMemoryBackend::purge_expired`])
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    inner: RwLock<HashMap<String, Slot>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = Instant::now();
        let mut map = self.write()?;
        let before = map.len();
        map.retain(|_, slot| slot.is_live(now));
        Ok(before - map.len())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, HashMap<String, Slot>>, StoreError> {
        self.inner
            .read()
            .map_err(|_| StoreError::Connection("in-memory store lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, Slot>>, StoreError> {
        self.inner
            .write()
            .map_err(|_| StoreError::Connection("in-memory store lock poisoned".to_string()))
    }

    /// Live slot for `key`, evicting it first if it has expired.
    fn live_entry<'a>(
        map: &'a mut HashMap<String, Slot>,
        key: &str,
        now: Instant,
    ) -> Entry<'a, String, Slot> {
        if map.get(key).is_some_and(|slot| !slot.is_live(now)) {
            map.remove(key);
        }
        map.entry(key.to_string())
    }

    fn live_hash_mut<'a>(
        map: &'a mut HashMap<String, Slot>,
        key: &str,
    ) -> Result<&'a mut HashMap<String, String>, StoreError> {
        let slot = Self::live_entry(map, key, Instant::now()).or_insert_with(|| Slot {
            value: Value::Hash(HashMap::new()),
            expires_at: None,
        });
        match &mut slot.value {
            Value::Hash(fields) => Ok(fields),
            Value::Text(_) => Err(wrong_type(key)),
        }
    }
}

impl CacheBackend for InMemoryBackend {
    fn ping(&self) -> Result<(), StoreError> {
        self.read().map(|_| ())
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut map = self.write()?;
        map.insert(
            key.to_string(),
            Slot {
                value: Value::Text(value.to_string()),
                expires_at: Some(Instant::now() + ttl),
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let map = self.read()?;
        match map.get(key) {
            Some(slot) if slot.is_live(Instant::now()) => match &slot.value {
                Value::Text(text) => Ok(Some(text.clone())),
                Value::Hash(_) => Err(wrong_type(key)),
            },
            _ => Ok(None),
        }
    }

    fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        let mut map = self.write()?;
        let fields = Self::live_hash_mut(&mut map, key)?;
        let current = match fields.get(field) {
            Some(raw) => raw.parse::<i64>().map_err(|_| {
                StoreError::Command(format!("ERR hash value of {key:?}.{field} is not an integer"))
            })?,
            None => 0,
        };
        let next = current + by;
        fields.insert(field.to_string(), next.to_string());
        Ok(next)
    }

    fn hget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        let map = self.read()?;
        match map.get(key) {
            Some(slot) if slot.is_live(Instant::now()) => match &slot.value {
                Value::Hash(hash) => Ok(fields.iter().map(|f| hash.get(*f).cloned()).collect()),
                Value::Text(_) => Err(wrong_type(key)),
            },
            _ => Ok(vec![None; fields.len()]),
        }
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.write()?;
        Self::live_hash_mut(&mut map, key)?.insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let map = self.read()?;
        match map.get(key) {
            Some(slot) if slot.is_live(Instant::now()) => match &slot.value {
                Value::Hash(hash) => Ok(hash.clone()),
                Value::Text(_) => Err(wrong_type(key)),
            },
            _ => Ok(HashMap::new()),
        }
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut map = self.write()?;
        if let Entry::Occupied(mut entry) = Self::live_entry(&mut map, key, now) {
            entry.get_mut().expires_at = Some(now + ttl);
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let now = Instant::now();
        let map = self.read()?;
        Ok(map
            .iter()
            .filter(|(key, slot)| key.starts_with(prefix) && slot.is_live(now))
            .map(|(key, _)| key.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SHORT: Duration = Duration::from_millis(40);

    #[test]
    fn set_ex_then_get() {
        let backend = InMemoryBackend::new();
        backend.set_ex("a:1", "v", Duration::from_secs(60)).unwrap();
        assert_eq!(backend.get("a:1").unwrap().as_deref(), Some("v"));
        assert_eq!(backend.get("a:2").unwrap(), None);
    }

    #[test]
    fn values_expire_after_ttl() {
        let backend = InMemoryBackend::new();
        backend.set_ex("a:1", "v", SHORT).unwrap();
        thread::sleep(SHORT * 2);
        assert_eq!(backend.get("a:1").unwrap(), None);
        assert!(backend.keys_with_prefix("a:").unwrap().is_empty());
        assert_eq!(backend.purge_expired().unwrap(), 1);
    }

    #[test]
    fn hash_without_expire_is_persistent_until_expired() {
        let backend = InMemoryBackend::new();
        assert_eq!(backend.hincr("stats:j", "count", 1).unwrap(), 1);
        assert_eq!(backend.hincr("stats:j", "count", 2).unwrap(), 3);
        backend.hset("stats:j", "min_time", "t").unwrap();
        assert_eq!(
            backend.hget("stats:j", &["count", "min_time", "max_time"]).unwrap(),
            vec![Some("3".to_string()), Some("t".to_string()), None]
        );

        backend.expire("stats:j", SHORT).unwrap();
        // hset keeps the deadline set by expire
        backend.hset("stats:j", "max_time", "t").unwrap();
        thread::sleep(SHORT * 2);
        assert!(backend.hgetall("stats:j").unwrap().is_empty());

        // a fresh increment after expiry starts from zero
        assert_eq!(backend.hincr("stats:j", "count", 1).unwrap(), 1);
    }

    #[test]
    fn expire_on_missing_key_is_noop() {
        let backend = InMemoryBackend::new();
        backend.expire("nope", SHORT).unwrap();
        assert!(backend.hgetall("nope").unwrap().is_empty());
    }

    #[test]
    fn type_mismatch_is_a_command_error() {
        let backend = InMemoryBackend::new();
        backend.set_ex("k", "v", Duration::from_secs(60)).unwrap();
        assert!(matches!(backend.hincr("k", "count", 1), Err(StoreError::Command(_))));
        backend.hset("h", "f", "v").unwrap();
        assert!(matches!(backend.get("h"), Err(StoreError::Command(_))));
    }

    #[test]
    fn prefix_listing() {
        let backend = InMemoryBackend::new();
        let ttl = Duration::from_secs(60);
        backend.set_ex("job-a:0", "x", ttl).unwrap();
        backend.set_ex("job-a:1", "x", ttl).unwrap();
        backend.set_ex("job-b:0", "x", ttl).unwrap();
        let mut keys = backend.keys_with_prefix("job-a:").unwrap();
        keys.sort();
        assert_eq!(keys, vec!["job-a:0".to_string(), "job-a:1".to_string()]);
    }
}
