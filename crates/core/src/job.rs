//! Job configuration: the header line of a feed plus the job identity.

use core::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::DomainError;
use crate::id::JobId;

/// Transport schemes the remote task invoker can speak.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Https => "https",
        }
    }
}

impl core::fmt::Display for Scheme {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Self::Http),
            "https" => Ok(Self::Https),
            other => Err(DomainError::unsupported_protocol(other)),
        }
    }
}

/// One key/value pair of the header's `metadata` array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    pub key: String,
    pub value: String,
}

impl MetadataItem {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Wire form of the first feed line.
///
/// `protocol` is kept verbatim: an unsupported scheme fails each record at
/// invocation time rather than rejecting the whole job.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfigurationHeader {
    pub protocol: String,
    pub host: String,
    #[serde(default, deserialize_with = "port_text")]
    pub port: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub metadata: Vec<MetadataItem>,
}

/// Accepts `"8080"`, `8080` or `null`.
fn port_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Port {
        Text(String),
        Number(u64),
    }

    Ok(match Option::<Port>::deserialize(deserializer)? {
        Some(Port::Text(s)) => s,
        Some(Port::Number(n)) => n.to_string(),
        None => String::new(),
    })
}

/// Immutable per-job endpoint configuration, shared by every record of the job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobConfiguration {
    pub job_id: JobId,
    pub protocol: String,
    pub host: String,
    pub port: String,
    pub path: String,
    pub metadata: Vec<MetadataItem>,
}

impl JobConfiguration {
    /// Bind a parsed header to the job it belongs to.
    pub fn new(job_id: JobId, header: ConfigurationHeader) -> Self {
        Self {
            job_id,
            protocol: header.protocol,
            host: header.host,
            port: header.port,
            path: header.path,
            metadata: header.metadata,
        }
    }

    pub fn scheme(&self) -> Result<Scheme, DomainError> {
        self.protocol.parse()
    }

    /// `<scheme>://<host>[:<port>]<path>`
    pub fn target_uri(&self, scheme: Scheme) -> String {
        let mut uri = format!("{}://{}", scheme, self.host);
        if !self.port.is_empty() {
            uri.push(':');
            uri.push_str(&self.port);
        }
        if !self.path.is_empty() && !self.path.starts_with('/') {
            uri.push('/');
        }
        uri.push_str(&self.path);
        uri
    }
}
