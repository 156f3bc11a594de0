//! Per-record delivery results.

use serde::{Deserialize, Serialize};

use crate::id::JobId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failed,
}

/// Result of attempting to deliver one record.
///
/// `response` is only set on success and `error` only on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub job_id: JobId,
    pub row_id: u64,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Outcome {
    pub fn success(job_id: JobId, row_id: u64, response: impl Into<String>) -> Self {
        Self {
            job_id,
            row_id,
            status: OutcomeStatus::Success,
            response: Some(response.into()),
            error: None,
        }
    }

    pub fn failed(job_id: JobId, row_id: u64, error: impl Into<String>) -> Self {
        Self {
            job_id,
            row_id,
            status: OutcomeStatus::Failed,
            response: None,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> JobId {
        "job-1".parse().unwrap()
    }

    #[test]
    fn success_omits_error_field() {
        let value = serde_json::to_value(Outcome::success(job(), 7, "ok")).unwrap();
        assert_eq!(
            value,
            json!({"job_id": "job-1", "row_id": 7, "status": "success", "response": "ok"})
        );
    }

    #[test]
    fn failure_omits_response_field() {
        let value = serde_json::to_value(Outcome::failed(job(), 3, "unsupported protocol: ftp")).unwrap();
        assert_eq!(
            value,
            json!({"job_id": "job-1", "row_id": 3, "status": "failed", "error": "unsupported protocol: ftp"})
        );
    }
}
