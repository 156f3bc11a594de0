//! Outcome persistence and per-job running statistics.
//!
//! ## Layout
//!
//! - **Cache entry**: `<job-id>:<row-id>` → JSON [`Outcome`], TTL refreshed per write
//! - **Job statistics**: hash `stats:<job-id>` with fields `count`, `min_time`,
//!   `max_time`; TTL reset on every merge
//!
//! Both windows use the same TTL so a job's entries and its statistics age out
//! together.
//!
//! ## Single writer
//!
//! `merge` is a read-then-conditionally-write sequence on the statistics hash.
//! Two unserialized callers can lose a min/max update between the read and the
//! write, so every mutation goes through one drain thread
//! ([`AggregationStore::spawn_drain`]). Producers only push onto the outcome
//! queue; outside this crate the store exposes reads only.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::warn;

use chronos_core::{JobId, JobStats, Outcome};

use crate::cache::{CacheBackend, StoreError};

pub mod drain;

pub use drain::DrainHandle;

/// Retention window for cache entries and job statistics.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

const STATS_PREFIX: &str = "stats:";
const FIELD_COUNT: &str = "count";
const FIELD_MIN_TIME: &str = "min_time";
const FIELD_MAX_TIME: &str = "max_time";

/// Key of the cache entry holding one row's outcome.
pub fn entry_key(job_id: &JobId, row_id: u64) -> String {
    format!("{job_id}:{row_id}")
}

/// Key of the statistics hash for a job.
pub fn stats_key(job_id: &JobId) -> String {
    format!("{STATS_PREFIX}{job_id}")
}

/// RFC 3339 with nanoseconds in UTC; round-trips through [`decode_instant`].
pub fn encode_instant(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub fn decode_instant(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Deserialization(format!("timestamp {raw:?}: {e}")))
}

/// A raw cache entry as stored for one row.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
}

/// Owner of every cache entry and statistics mutation.
#[derive(Debug)]
pub struct AggregationStore<B> {
    backend: B,
    ttl: Duration,
}

impl<B: CacheBackend> AggregationStore<B> {
    pub fn new(backend: B) -> Self {
        Self::with_ttl(backend, DEFAULT_TTL)
    }

    pub fn with_ttl(backend: B, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Persist an outcome and merge `at` into its job's statistics.
    pub(crate) fn write_at(&self, outcome: &Outcome, at: DateTime<Utc>) -> Result<(), StoreError> {
        let data = serde_json::to_string(outcome)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        self.backend
            .set_ex(&entry_key(&outcome.job_id, outcome.row_id), &data, self.ttl)?;

        self.merge(&outcome.job_id, at)
    }

    /// Fold one write into the job's statistics.
    ///
    /// Count always grows by one (it is not deduplicated by timestamp); the
    /// bounds only move when `at` is a new extremum. The TTL is reset no matter
    /// which branch was taken. Must only be called from the single writer.
    pub(crate) fn merge(&self, job_id: &JobId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let key = stats_key(job_id);
        let encoded = encode_instant(at);

        self.backend.hincr(&key, FIELD_COUNT, 1)?;

        let bounds = self.backend.hget(&key, &[FIELD_MIN_TIME, FIELD_MAX_TIME])?;
        let current_min = bounds.first().cloned().flatten();
        let current_max = bounds.get(1).cloned().flatten();

        if replaces(&key, FIELD_MIN_TIME, current_min.as_deref(), |cur| at < cur) {
            self.backend.hset(&key, FIELD_MIN_TIME, &encoded)?;
        }
        if replaces(&key, FIELD_MAX_TIME, current_max.as_deref(), |cur| at > cur) {
            self.backend.hset(&key, FIELD_MAX_TIME, &encoded)?;
        }

        self.backend.expire(&key, self.ttl)
    }

    /// Current statistics, or `NotFound` when none exist or they expired.
    pub fn read_stats(&self, job_id: &JobId) -> Result<JobStats, StoreError> {
        let fields = self.backend.hgetall(&stats_key(job_id))?;
        if fields.is_empty() {
            return Err(StoreError::NotFound(format!("no stats for job {job_id}")));
        }

        let field = |name: &str| {
            fields
                .get(name)
                .ok_or_else(|| StoreError::Deserialization(format!("stats field {name} missing")))
        };

        let count = field(FIELD_COUNT)?
            .parse::<u64>()
            .map_err(|e| StoreError::Deserialization(format!("stats count: {e}")))?;

        Ok(JobStats {
            job_id: job_id.clone(),
            count,
            min_time: decode_instant(field(FIELD_MIN_TIME)?)?,
            max_time: decode_instant(field(FIELD_MAX_TIME)?)?,
        })
    }

    /// The stored outcome for one row.
    pub fn read_outcome(&self, job_id: &JobId, row_id: u64) -> Result<Outcome, StoreError> {
        let key = entry_key(job_id, row_id);
        let raw = self
            .backend
            .get(&key)?
            .ok_or_else(|| StoreError::NotFound(format!("key {key} not found")))?;

        serde_json::from_str(&raw).map_err(|e| StoreError::Deserialization(e.to_string()))
    }

    /// Every live cache entry of a job, ordered by row id.
    ///
    /// Keys that expire between listing and reading are skipped.
    pub fn entries(&self, job_id: &JobId) -> Result<Vec<CacheEntry>, StoreError> {
        let prefix = format!("{job_id}:");
        let mut entries = Vec::new();

        for key in self.backend.keys_with_prefix(&prefix)? {
            match self.backend.get(&key) {
                Ok(Some(value)) => entries.push(CacheEntry { key, value }),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "failed to read cache entry"),
            }
        }

        entries.sort_by_key(|entry| row_of(&entry.key, &prefix));
        Ok(entries)
    }
}

/// Whether a stored bound should be overwritten by the incoming instant.
///
/// A missing bound is always replaced; so is one that no longer parses.
fn replaces(
    key: &str,
    field: &str,
    current: Option<&str>,
    beats: impl Fn(DateTime<Utc>) -> bool,
) -> bool {
    match current.map(decode_instant) {
        None => true,
        Some(Ok(cur)) => beats(cur),
        Some(Err(e)) => {
            warn!(key = %key, field = field, error = %e, "overwriting unreadable stats bound");
            true
        }
    }
}

fn row_of(key: &str, prefix: &str) -> (u64, String) {
    let row = key
        .strip_prefix(prefix)
        .and_then(|r| r.parse::<u64>().ok())
        .unwrap_or(u64::MAX);
    (row, key.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryBackend;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    fn job(id: &str) -> JobId {
        id.parse().unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn store() -> AggregationStore<InMemoryBackend> {
        AggregationStore::new(InMemoryBackend::new())
    }

    #[test]
    fn write_then_read_outcome_round_trips() {
        let store = store();
        let success = Outcome::success(job("job-a"), 0, r#"{"ok":true}"#);
        let failure = Outcome::failed(job("job-a"), 1, "error sending POST request: refused");

        store.write_at(&success, Utc::now()).unwrap();
        store.write_at(&failure, Utc::now()).unwrap();

        assert_eq!(store.read_outcome(&job("job-a"), 0).unwrap(), success);
        assert_eq!(store.read_outcome(&job("job-a"), 1).unwrap(), failure);
        assert!(matches!(
            store.read_outcome(&job("job-a"), 2),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn stats_are_created_on_first_write() {
        let store = store();
        assert!(matches!(store.read_stats(&job("job-a")), Err(StoreError::NotFound(_))));

        store
            .write_at(&Outcome::success(job("job-a"), 0, ""), at(5))
            .unwrap();

        let stats = store.read_stats(&job("job-a")).unwrap();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.min_time, at(5));
        assert_eq!(stats.max_time, at(5));
    }

    #[test]
    fn merge_tracks_bounds_out_of_order() {
        let store = store();
        let j = job("job-a");
        for secs in [10, 3, 7, 42, 1, 15] {
            store.merge(&j, at(secs)).unwrap();
        }

        let stats = store.read_stats(&j).unwrap();
        assert_eq!(stats.count, 6);
        assert_eq!(stats.min_time, at(1));
        assert_eq!(stats.max_time, at(42));
    }

    #[test]
    fn count_is_not_deduplicated_by_timestamp() {
        let store = store();
        let j = job("job-a");
        store.merge(&j, at(1)).unwrap();
        store.merge(&j, at(9)).unwrap();
        store.merge(&j, at(5)).unwrap();
        store.merge(&j, at(5)).unwrap();

        let stats = store.read_stats(&j).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.min_time, at(1));
        assert_eq!(stats.max_time, at(9));
    }

    #[test]
    fn jobs_are_isolated() {
        let store = store();
        store.merge(&job("job-a"), at(1)).unwrap();
        store.merge(&job("job-b"), at(2)).unwrap();
        store.merge(&job("job-b"), at(3)).unwrap();

        assert_eq!(store.read_stats(&job("job-a")).unwrap().count, 1);
        assert_eq!(store.read_stats(&job("job-b")).unwrap().count, 2);
    }

    #[test]
    fn entries_and_stats_expire_after_retention_window() {
        let ttl = Duration::from_millis(40);
        let store = AggregationStore::with_ttl(InMemoryBackend::new(), ttl);
        let j = job("job-a");
        store.write_at(&Outcome::success(j.clone(), 0, "ok"), Utc::now()).unwrap();
        assert!(store.read_stats(&j).is_ok());

        thread::sleep(ttl * 3);

        assert!(matches!(store.read_stats(&j), Err(StoreError::NotFound(_))));
        assert!(matches!(store.read_outcome(&j, 0), Err(StoreError::NotFound(_))));
        assert!(store.entries(&j).unwrap().is_empty());
    }

    #[test]
    fn every_merge_resets_the_stats_ttl() {
        let ttl = Duration::from_millis(300);
        let store = AggregationStore::with_ttl(InMemoryBackend::new(), ttl);
        let j = job("job-a");
        store.merge(&j, at(10)).unwrap();
        thread::sleep(ttl / 2);
        // not a new extremum, but the window still restarts
        store.merge(&j, at(10)).unwrap();
        thread::sleep(ttl * 2 / 3);

        assert_eq!(store.read_stats(&j).unwrap().count, 2);
    }

    #[test]
    fn entries_are_ordered_by_row() {
        let store = store();
        let j = job("job-a");
        for row in [10, 2, 1] {
            store.write_at(&Outcome::success(j.clone(), row, "ok"), Utc::now()).unwrap();
        }
        store.write_at(&Outcome::success(job("job-b"), 0, "ok"), Utc::now()).unwrap();

        let keys: Vec<_> = store.entries(&j).unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["job-a:1", "job-a:2", "job-a:10"]);
    }

    #[test]
    fn unreadable_bound_is_overwritten() {
        let store = store();
        let j = job("job-a");
        store.backend.hset(&stats_key(&j), FIELD_MIN_TIME, "garbage").unwrap();
        store.merge(&j, at(4)).unwrap();

        let stats = store.read_stats(&j).unwrap();
        assert_eq!(stats.min_time, at(4));
        assert_eq!(stats.max_time, at(4));
    }

    #[test]
    fn instant_encoding_round_trips_with_nanos() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let encoded = encode_instant(t);
        assert_eq!(encoded, "2023-11-14T22:13:20.123456789Z");
        assert_eq!(decode_instant(&encoded).unwrap(), t);
    }

    #[test]
    fn concurrent_producers_through_one_drain_keep_exact_bounds() {
        let store = Arc::new(store());
        let (tx, rx) = std::sync::mpsc::sync_channel::<(Outcome, DateTime<Utc>)>(8);
        let drain = {
            let store = Arc::clone(&store);
            thread::spawn(move || store.drain(rx))
        };

        // producer p stamps its outcomes with p*1000 + i seconds, interleaved
        // with negative offsets so both bounds move under contention
        let producers: Vec<_> = (0..8i64)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..250i64 {
                        let row = (p * 1_000 + i) as u64;
                        let secs = if i % 2 == 0 { p * 1_000 + i } else { -(p * 1_000 + i) };
                        tx.send((Outcome::success(job("job-a"), row, "ok"), at(secs)))
                            .unwrap();
                    }
                })
            })
            .collect();
        drop(tx);
        for p in producers {
            p.join().unwrap();
        }

        assert_eq!(drain.join().unwrap(), 2_000);
        let stats = store.read_stats(&job("job-a")).unwrap();
        assert_eq!(stats.count, 2_000);
        // extremes: producer 7, i = 249 (odd, negative) and i = 248 (even)
        assert_eq!(stats.min_time, at(-7_249));
        assert_eq!(stats.max_time, at(7_248));
        assert_eq!(store.entries(&job("job-a")).unwrap().len(), 2_000);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: bounds equal min/max of the merged instants whatever the order.
        #[test]
        fn merge_order_does_not_matter(
            offsets in prop::collection::vec(-1_000_000i64..1_000_000i64, 1..40)
                .prop_shuffle()
        ) {
            let store = store();
            let j = job("job-prop");
            for secs in &offsets {
                store.merge(&j, at(*secs)).unwrap();
            }

            let stats = store.read_stats(&j).unwrap();
            prop_assert_eq!(stats.count, offsets.len() as u64);
            prop_assert_eq!(stats.min_time, at(*offsets.iter().min().unwrap()));
            prop_assert_eq!(stats.max_time, at(*offsets.iter().max().unwrap()));
        }
    }
}
