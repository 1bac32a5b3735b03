//! Blocking JSON-over-HTTP transport.
//!
//! The client only needs "POST this JSON, give me JSON back" and "GET this
//! JSON". Keeping that behind a trait lets tests script backend behaviour
//! without a socket.

use std::time::Duration;

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

/// Characters of an error body kept in diagnostics.
const BODY_PREVIEW_CHARS: usize = 200;

/// Failure of a single HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum TransportError {
    /// The server answered 404: the endpoint does not exist on this backend.
    #[error("endpoint not found (404)")]
    #[diagnostic(code(absa::transport::not_found))]
    NotFound,

    /// Any other non-2xx status.
    #[error("HTTP {code}: {body}")]
    #[diagnostic(code(absa::transport::status))]
    Status { code: u16, body: String },

    /// Connection, DNS, TLS, or timeout failure.
    #[error("transport error: {0}")]
    #[diagnostic(
        code(absa::transport::connection),
        help("Check that Ollama is running and reachable from this host.")
    )]
    Connection(String),

    /// The body was not valid JSON.
    #[error("invalid JSON body: {0}")]
    #[diagnostic(code(absa::transport::decode))]
    Decode(String),
}

/// Minimal HTTP surface used by [`super::OllamaClient`].
pub trait Transport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError>;
    fn get_json(&self, url: &str) -> Result<Value, TransportError>;
}

/// Production transport backed by a shared `ureq` agent.
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn read(result: Result<ureq::Response, ureq::Error>) -> Result<Value, TransportError> {
        match result {
            Ok(resp) => {
                let text = resp
                    .into_string()
                    .map_err(|e| TransportError::Connection(e.to_string()))?;
                serde_json::from_str(&text).map_err(|e| TransportError::Decode(e.to_string()))
            }
            Err(ureq::Error::Status(404, _)) => Err(TransportError::NotFound),
            Err(ureq::Error::Status(code, resp)) => {
                let body = resp.into_string().unwrap_or_default();
                Err(TransportError::Status {
                    code,
                    body: body.chars().take(BODY_PREVIEW_CHARS).collect(),
                })
            }
            Err(ureq::Error::Transport(t)) => Err(TransportError::Connection(t.to_string())),
        }
    }
}

impl Transport for UreqTransport {
    fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
        let body_str =
            serde_json::to_string(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        Self::read(
            self.agent
                .post(url)
                .set("Content-Type", "application/json")
                .send_string(&body_str),
        )
    }

    fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        Self::read(self.agent.get(url).call())
    }
}

impl std::fmt::Debug for UreqTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UreqTransport").finish_non_exhaustive()
    }
}
