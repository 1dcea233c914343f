//! HTTP adapter: turns any blocking HTTP client into a broker transport.

use crate::error::{EngineError, EngineResult};
use crate::transport::{BrokerResponse, BrokerTransport, Method};
use serde_json::Value;

/// A minimal blocking HTTP client.
///
/// The embedding application supplies one, wired to its HTTP stack and the
/// pool's authentication. Errors are plain strings; the transport wraps
/// them as [`EngineError::Transport`].
pub trait HttpClient: Send + Sync {
    /// Sends one request and returns the status code and body text.
    fn send(&self, method: Method, url: &str, body: Option<&str>) -> Result<(u16, String), String>;
}

/// A broker transport over an [`HttpClient`].
///
/// Encodes request bodies as JSON text and decodes non-empty response
/// bodies back to JSON.
#[derive(Debug)]
pub struct HttpBrokerTransport<C> {
    client: C,
}

impl<C: HttpClient> HttpBrokerTransport<C> {
    /// Wraps a client.
    pub fn new(client: C) -> Self {
        Self { client }
    }
}

impl<C: HttpClient> BrokerTransport for HttpBrokerTransport<C> {
    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> EngineResult<BrokerResponse> {
        let body_text = body.map(|value| value.to_string());
        let (status, text) = self
            .client
            .send(method, url, body_text.as_deref())
            .map_err(EngineError::transport)?;

        let body = if text.trim().is_empty() {
            None
        } else {
            Some(
                serde_json::from_str(&text)
                    .map_err(|error| EngineError::Serialization(error.to_string()))?,
            )
        };
        Ok(BrokerResponse { status, body })
    }
}
