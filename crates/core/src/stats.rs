//! Running per-job aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::JobId;

/// Count and insertion-time bounds over every outcome written for a job.
///
/// The count covers successes and failures alike and is not deduplicated by
/// timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    pub job_id: JobId,
    pub count: u64,
    pub min_time: DateTime<Utc>,
    pub max_time: DateTime<Utc>,
}
