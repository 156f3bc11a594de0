//! `chronos-core`: domain types of the job dispatch pipeline.
//!
//! This crate contains **pure domain** values (no infrastructure concerns).

pub mod error;
pub mod id;
pub mod job;
pub mod outcome;
pub mod record;
pub mod stats;

pub use error::DomainError;
pub use id::JobId;
pub use job::{ConfigurationHeader, JobConfiguration, MetadataItem, Scheme};
pub use outcome::{Outcome, OutcomeStatus};
pub use record::{Record, RecordLine};
pub use stats::JobStats;
