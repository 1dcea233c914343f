//! The broker transport seam.

use crate::error::{EngineError, EngineResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use syndicate_config::Pool;

/// HTTP method of a broker request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Create.
    Post,
    /// Update.
    Put,
    /// Delete.
    Delete,
}

impl Method {
    /// The method name on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A decoded broker response.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded JSON body, if the response had one.
    pub body: Option<Value>,
}

impl BrokerResponse {
    /// A bodyless 200 response.
    pub fn ok() -> Self {
        Self {
            status: 200,
            body: None,
        }
    }

    /// A bodyless response with the given status.
    pub fn with_status(status: u16) -> Self {
        Self { status, body: None }
    }

    /// Attaches a body.
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns true for 404.
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

/// Sends requests to the central broker.
///
/// One implementation per wire stack; [`MockBroker`] scripts responses for
/// tests and the `http` module adapts any [`crate::HttpClient`].
pub trait BrokerTransport: Send + Sync {
    /// Sends one request and decodes the response.
    fn request(&self, method: Method, url: &str, body: Option<&Value>)
        -> EngineResult<BrokerResponse>;
}

/// Builds the broker endpoint URL of an entity type channel.
///
/// With a shared id the URL addresses one entity (`PUT`/`DELETE`), without
/// one it addresses the collection (`POST`).
pub fn entity_endpoint(
    pool: &Pool,
    entity_type: &str,
    bundle: &str,
    version: &str,
    shared_id: Option<&str>,
) -> String {
    let base = format!(
        "{}/{}/{}/{}/{}",
        pool.backend_url, pool.site_id, entity_type, bundle, version
    );
    match shared_id {
        Some(id) => format!("{base}/{id}"),
        None => base,
    }
}

/// One request captured by [`MockBroker`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// The method sent.
    pub method: Method,
    /// The URL addressed.
    pub url: String,
    /// The JSON body sent, if any.
    pub body: Option<Value>,
}

/// A scripted broker for tests.
///
/// Responses are served from a queue; when the queue is empty every request
/// succeeds with a bodyless 200. All requests are recorded.
#[derive(Debug, Default)]
pub struct MockBroker {
    requests: Mutex<Vec<RecordedRequest>>,
    responses: Mutex<VecDeque<Result<BrokerResponse, EngineError>>>,
}

impl MockBroker {
    /// Creates a broker that answers 200 to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn push_response(&self, response: BrokerResponse) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a transport error.
    pub fn push_error(&self, error: EngineError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Returns all recorded requests.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of recorded requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl BrokerTransport for MockBroker {
    fn request(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
    ) -> EngineResult<BrokerResponse> {
        self.requests.lock().push(RecordedRequest {
            method,
            url: url.to_string(),
            body: body.cloned(),
        });
        match self.responses.lock().pop_front() {
            Some(scripted) => scripted,
            None => Ok(BrokerResponse::ok()),
        }
    }
}
