//! Units of work produced by the record source.

use std::sync::Arc;

use serde::Deserialize;

use crate::id::JobId;
use crate::job::JobConfiguration;

/// Wire form of one feed line after the header.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RecordLine {
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub payload: String,
}

/// A record stamped with its job and a shared handle on the job configuration.
#[derive(Debug, Clone)]
pub struct Record {
    pub job_id: JobId,
    pub row_id: u64,
    pub payload: String,
    pub config: Arc<JobConfiguration>,
}

impl Record {
    /// Build a record from a decoded line.
    ///
    /// `ordinal` is the zero-based position of the line among record lines;
    /// it becomes the row id when the line carries none.
    pub fn from_line(line: RecordLine, ordinal: u64, config: &Arc<JobConfiguration>) -> Self {
        Self {
            job_id: config.job_id.clone(),
            row_id: line.id.unwrap_or(ordinal),
            payload: line.payload,
            config: Arc::clone(config),
        }
    }
}
