//! Redis-backed cache backend.
//!
//! One connection is opened in [`RedisBackend::connect`], verified with
//! `PING`, and shared behind a mutex. Callers hold the backend in an `Arc`
//! and thread it through constructors; there is no process-global client.
//! A dropped connection is re-established once per failing command. Only
//! read commands are sent again on the new connection; a write whose reply
//! was lost may already have been applied, so its error is returned.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tracing::warn;

use super::{CacheBackend, StoreError};

/// Keys scanned per `SCAN` round trip.
const SCAN_COUNT: usize = 500;

pub struct RedisBackend {
    client: redis::Client,
    conn: Mutex<redis::Connection>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("client", &self.client)
            .finish_non_exhaustive()
    }
}

impl RedisBackend {
    /// Open and verify a connection.
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379/0")
    pub fn connect(redis_url: impl AsRef<str>) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let conn = client
            .get_connection()
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let backend = Self {
            client,
            conn: Mutex::new(conn),
        };
        backend.ping()?;
        Ok(backend)
    }

    fn query<T>(
        &self,
        what: &str,
        replay: Replay,
        run: impl Fn(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Connection("redis connection lock poisoned".to_string()))?;

        with_reconnect(&mut *conn, what, replay, || self.client.get_connection(), run)
    }
}

/// Whether a command may be sent again after its connection dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replay {
    Allowed,
    Forbidden,
}

/// Run `run` on `conn`; on a lost connection, replace it through `reconnect`
/// and, for replayable commands only, run once more.
fn with_reconnect<C, T>(
    conn: &mut C,
    what: &str,
    replay: Replay,
    reconnect: impl FnOnce() -> redis::RedisResult<C>,
    run: impl Fn(&mut C) -> redis::RedisResult<T>,
) -> Result<T, StoreError> {
    match run(conn) {
        Ok(value) => Ok(value),
        Err(e) if e.is_connection_dropped() || e.is_io_error() => {
            warn!(command = what, error = %e, "redis connection lost; reconnecting");
            *conn = reconnect().map_err(|e| StoreError::Connection(e.to_string()))?;
            match replay {
                Replay::Allowed => {
                    run(conn).map_err(|e| StoreError::Command(format!("{what} failed: {e}")))
                }
                Replay::Forbidden => Err(StoreError::Connection(format!(
                    "{what} outcome unknown after connection loss: {e}"
                ))),
            }
        }
        Err(e) => Err(StoreError::Command(format!("{what} failed: {e}"))),
    }
}

fn millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

/// Escape glob metacharacters so a key prefix matches literally.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

impl CacheBackend for RedisBackend {
    fn ping(&self) -> Result<(), StoreError> {
        let _: String = self.query("PING", Replay::Allowed, |conn| redis::cmd("PING").query(conn))?;
        Ok(())
    }

    fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.query("SET", Replay::Forbidden, |conn| {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(millis(ttl))
                .query::<()>(conn)
        })
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.query("GET", Replay::Allowed, |conn| redis::cmd("GET").arg(key).query(conn))
    }

    fn hincr(&self, key: &str, field: &str, by: i64) -> Result<i64, StoreError> {
        self.query("HINCRBY", Replay::Forbidden, |conn| {
            redis::cmd("HINCRBY").arg(key).arg(field).arg(by).query(conn)
        })
    }

    fn hget(&self, key: &str, fields: &[&str]) -> Result<Vec<Option<String>>, StoreError> {
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        self.query("HMGET", Replay::Allowed, |conn| redis::cmd("HMGET").arg(key).arg(fields).query(conn))
    }

    fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.query("HSET", Replay::Forbidden, |conn| {
            redis::cmd("HSET").arg(key).arg(field).arg(value).query::<()>(conn)
        })
    }

    fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.query("HGETALL", Replay::Allowed, |conn| redis::cmd("HGETALL").arg(key).query(conn))
    }

    fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.query("PEXPIRE", Replay::Forbidden, |conn| {
            redis::cmd("PEXPIRE").arg(key).arg(millis(ttl)).query::<()>(conn)
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let pattern = format!("{}*", glob_escape(prefix));
        // SCAN instead of KEYS so large databases are not blocked.
        self.query("SCAN", Replay::Allowed, |conn| {
            let mut keys = Vec::new();
            let mut cursor: u64 = 0;
            loop {
                let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_COUNT)
                    .query(conn)?;
                keys.extend(batch);
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            keys.sort();
            keys.dedup();
            Ok(keys)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn glob_metacharacters_are_escaped() {
        assert_eq!(glob_escape("job-1:"), "job-1:");
        assert_eq!(glob_escape("a*b?[c]\\"), "a\\*b\\?\\[c\\]\\\\");
    }

    #[test]
    fn ttl_is_sent_in_whole_milliseconds() {
        assert_eq!(millis(Duration::from_secs(3600)), 3_600_000);
        assert_eq!(millis(Duration::ZERO), 1);
    }

    fn dropped() -> redis::RedisError {
        redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "connection reset",
        ))
    }

    /// Connection stand-in: a generation number bumped on every reconnect.
    fn flaky_run(calls: &Cell<u32>) -> impl Fn(&mut u32) -> redis::RedisResult<i64> + '_ {
        move |generation: &mut u32| {
            calls.set(calls.get() + 1);
            if *generation == 0 { Err(dropped()) } else { Ok(1) }
        }
    }

    #[test]
    fn writes_are_not_sent_twice_after_a_dropped_connection() {
        let calls = Cell::new(0);
        let mut conn = 0u32;

        let err = with_reconnect(&mut conn, "HINCRBY", Replay::Forbidden, || Ok(1), flaky_run(&calls))
            .unwrap_err();

        assert!(matches!(err, StoreError::Connection(_)));
        assert_eq!(calls.get(), 1);
        // the next command starts on the fresh connection
        assert_eq!(conn, 1);
    }

    #[test]
    fn reads_are_replayed_on_the_new_connection() {
        let calls = Cell::new(0);
        let mut conn = 0u32;

        let value = with_reconnect(&mut conn, "GET", Replay::Allowed, || Ok(1), flaky_run(&calls))
            .unwrap();

        assert_eq!(value, 1);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn command_errors_do_not_reconnect() {
        let mut conn = 0u32;
        let err = with_reconnect(
            &mut conn,
            "HINCRBY",
            Replay::Forbidden,
            || -> redis::RedisResult<u32> { panic!("must not reconnect") },
            |_: &mut u32| -> redis::RedisResult<i64> {
                Err(redis::RedisError::from((redis::ErrorKind::TypeError, "WRONGTYPE")))
            },
        )
        .unwrap_err();

        assert!(matches!(err, StoreError::Command(_)));
        assert_eq!(conn, 0);
    }

    #[cfg(feature = "redis-tests")]
    mod live {
        use super::super::*;
        use std::thread;

        fn backend() -> RedisBackend {
            let url = std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string());
            RedisBackend::connect(url).expect("redis must be reachable for redis-tests")
        }

        fn unique(prefix: &str) -> String {
            format!("{prefix}-{}", chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default())
        }

        #[test]
        fn hash_and_expiry_semantics() {
            let backend = backend();
            let key = unique("stats:chronos-test");
            assert_eq!(backend.hincr(&key, "count", 1).unwrap(), 1);
            backend.hset(&key, "min_time", "t").unwrap();
            assert_eq!(
                backend.hget(&key, &["count", "min_time", "max_time"]).unwrap(),
                vec![Some("1".to_string()), Some("t".to_string()), None]
            );
            backend.expire(&key, Duration::from_millis(50)).unwrap();
            thread::sleep(Duration::from_millis(150));
            assert!(backend.hgetall(&key).unwrap().is_empty());
        }

        #[test]
        fn prefix_scan_finds_written_keys() {
            let backend = backend();
            let job = unique("chronos-test-job");
            for row in 0..3 {
                backend
                    .set_ex(&format!("{job}:{row}"), "{}", Duration::from_secs(30))
                    .unwrap();
            }
            assert_eq!(backend.keys_with_prefix(&format!("{job}:")).unwrap().len(), 3);
        }
    }
}
