//! Remote task invoker: one outbound call per record.

use std::sync::{Arc, OnceLock};

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;

use chronos_core::{JobConfiguration, Scheme};

/// A completed call: status code and full response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub status: u16,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvokeError {
    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("http client error: {0}")]
    Client(String),

    #[error("error sending POST request: {0}")]
    Request(String),

    #[error("error reading response body: {message}")]
    ReadBody { status: u16, message: String },
}

impl InvokeError {
    /// Status code observed before the failure, or 0 when none was received.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::ReadBody { status, .. } => *status,
            _ => 0,
        }
    }
}

/// Delivers one record payload to the endpoint described by its job.
///
/// Called synchronously from worker threads; implementations must not retry.
pub trait TaskInvoker: Send + Sync {
    fn invoke(&self, payload: &str, config: &JobConfiguration) -> Result<Invocation, InvokeError>;
}

impl<T> TaskInvoker for Arc<T>
where
    T: TaskInvoker + ?Sized,
{
    fn invoke(&self, payload: &str, config: &JobConfiguration) -> Result<Invocation, InvokeError> {
        (**self).invoke(payload, config)
    }
}

/// HTTP(S) invoker: `POST <scheme>://<host>:<port><path>` with a JSON body.
///
/// The payload is the whole body, sent as `Content-Type: application/json`;
/// job metadata is never put on the wire. Non-2xx responses are returned as
/// invocations, not errors. Default client timeouts apply.
///
/// The blocking client is built on first use so that it is always created on
/// a worker thread, outside any async runtime.
#[derive(Debug, Default)]
pub struct HttpInvoker {
    client: OnceLock<Result<Client, String>>,
}

impl HttpInvoker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a preconfigured client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client: OnceLock::from(Ok(client)),
        }
    }

    fn client(&self) -> Result<&Client, InvokeError> {
        self.client
            .get_or_init(|| Client::builder().build().map_err(|e| e.to_string()))
            .as_ref()
            .map_err(|e| InvokeError::Client(e.clone()))
    }
}

impl TaskInvoker for HttpInvoker {
    fn invoke(&self, payload: &str, config: &JobConfiguration) -> Result<Invocation, InvokeError> {
        let scheme: Scheme = config
            .scheme()
            .map_err(|_| InvokeError::UnsupportedProtocol(config.protocol.clone()))?;

        let uri = config.target_uri(scheme);

        let response = self
            .client()?
            .post(&uri)
            .header(CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .map_err(|e| InvokeError::Request(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().map_err(|e| InvokeError::ReadBody {
            status,
            message: e.to_string(),
        })?;

        Ok(Invocation { status, body })
    }
}
