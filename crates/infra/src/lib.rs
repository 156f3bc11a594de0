//! Infrastructure layer: cache backends, aggregation, ingestion pipeline, config.

pub mod aggregation;
pub mod cache;
pub mod config;
pub mod pipeline;
