//! HTTP API: job intake, status queries and health check.

pub mod app;
