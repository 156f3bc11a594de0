//! Record source: parses a feed header and streams record lines onto the work queue.
//!
//! Feed format (NDJSON):
//!
//! ```text
//! {"protocol":"http","host":"localhost","port":"8080","path":"/upload","metadata":[]}
//! {"id":0,"payload":"..."}
//! {"id":1,"payload":"..."}
//! ```
//!
//! A missing or malformed header is fatal to the job. A malformed record line
//! is logged and skipped.

use std::io::BufRead;
use std::sync::Arc;
use std::sync::mpsc::SyncSender;

use tracing::{error, warn};

use chronos_core::{ConfigurationHeader, JobConfiguration, JobId, Record, RecordLine};

/// Failures that abort a job before any record is queued.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("the feed is empty or does not contain any records")]
    EmptyFeed,

    #[error("invalid configuration line: {0}")]
    InvalidConfiguration(String),

    #[error("feed i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Counts reported once a feed has been fully read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishSummary {
    pub published: u64,
    pub skipped: u64,
}

/// Parse the header line and bind it to `job_id`.
///
/// On success the reader is positioned at the start of the second line.
pub fn read_configuration<R: BufRead>(
    job_id: JobId,
    reader: &mut R,
) -> Result<JobConfiguration, DispatchError> {
    let mut line = Vec::new();
    if reader.read_until(b'\n', &mut line)? == 0 {
        return Err(DispatchError::EmptyFeed);
    }

    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Err(DispatchError::InvalidConfiguration(
            "configuration line is blank".to_string(),
        ));
    }

    let header: ConfigurationHeader = serde_json::from_slice(trimmed)
        .map_err(|e| DispatchError::InvalidConfiguration(e.to_string()))?;

    Ok(JobConfiguration::new(job_id, header))
}

/// Decode loop: one record per line until end of feed.
///
/// Each record is pushed (blocking) before the next line is read, so feed
/// order is preserved on the queue. Stops early if the feed becomes unreadable
/// or the work queue is closed.
pub fn publish<R: BufRead>(
    config: &Arc<JobConfiguration>,
    mut reader: R,
    records: &SyncSender<Record>,
) -> PublishSummary {
    let job_id = &config.job_id;
    let mut summary = PublishSummary::default();
    let mut ordinal = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                error!(job_id = %job_id, error = %e, "feed became unreadable; stopping");
                break;
            }
        }

        let trimmed = line.trim_ascii();
        if trimmed.is_empty() {
            continue;
        }

        let position = ordinal;
        ordinal += 1;

        let decoded: RecordLine = match serde_json::from_slice(trimmed) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(job_id = %job_id, record = position, error = %e, "skipping malformed record");
                summary.skipped += 1;
                continue;
            }
        };

        if records.send(Record::from_line(decoded, position, config)).is_err() {
            warn!(job_id = %job_id, "work queue closed; stopping publisher");
            break;
        }
        summary.published += 1;
    }

    summary
}
