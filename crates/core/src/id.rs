//! Strongly-typed identifiers used across the pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of a dispatched job.
///
/// Job ids become part of store keys (`<job>:<row>`, `stats:<job>`) and of
/// prefix scans, so key separators and glob characters are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

/// Characters that would collide with the store key layout.
const RESERVED: &[char] = &[':', '*', '?', '[', ']'];

impl JobId {
    /// Generate a fresh identifier (`job-<uuid>`).
    ///
    /// Uses UUIDv7 (time-ordered) so ids sort by creation time.
    pub fn generate() -> Self {
        Self(format!("job-{}", Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for JobId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(DomainError::invalid_id("JobId: empty"));
        }
        if let Some(c) = s.chars().find(|c| c.is_whitespace() || RESERVED.contains(c)) {
            return Err(DomainError::invalid_id(format!(
                "JobId: reserved character {c:?} in {s:?}"
            )));
        }
        Ok(Self(s.to_string()))
    }
}

impl From<JobId> for String {
    fn from(value: JobId) -> Self {
        value.0
    }
}
