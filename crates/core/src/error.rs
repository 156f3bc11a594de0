//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Covers deterministic failures on values that flow through the pipeline
/// (identifiers, configuration headers). Storage and transport concerns belong
/// to the infrastructure crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. empty or containing key separators).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A transport scheme outside the supported set.
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unsupported_protocol(protocol: impl Into<String>) -> Self {
        Self::UnsupportedProtocol(protocol.into())
    }
}
