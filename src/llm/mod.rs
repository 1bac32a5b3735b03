//! Ollama client for weak-label extraction.
//!
//! Each request attempt tries the chat endpoint first, then the completion
//! endpoint when chat is missing (404) or answers with nothing.
//! Attempts are retried with linear backoff until the configured budget is
//! spent.

pub mod prompt;
pub mod transport;

use std::time::Duration;

use miette::Diagnostic;
use serde_json::{Value, json};
use thiserror::Error;

use crate::config::OllamaConfig;
use crate::response::{self, ResponseError};

pub use transport::{Transport, TransportError, UreqTransport};

/// Errors from the LLM subsystem.
#[derive(Debug, Error, Diagnostic)]
pub enum LlmError {
    #[error("Ollama is not available at {url}")]
    #[diagnostic(
        code(absa::llm::unavailable),
        help("Start Ollama with `ollama serve` or point --host at a running instance.")
    )]
    Unavailable { url: String },

    #[error("model \"{model}\" is not installed")]
    #[diagnostic(
        code(absa::llm::model_missing),
        help("Run `ollama pull {model}` or pass --model with an installed model.")
    )]
    ModelMissing { model: String },

    #[error("{endpoint} endpoint not found at {url}")]
    #[diagnostic(
        code(absa::llm::not_found),
        help("The backend does not expose this endpoint. Upgrade Ollama or check the base URL.")
    )]
    NotFound { endpoint: Endpoint, url: String },

    #[error("empty content from {endpoint} endpoint")]
    #[diagnostic(
        code(absa::llm::empty_content),
        help("The model produced no text. Check that the model is pulled and fits in memory.")
    )]
    EmptyContent { endpoint: Endpoint },

    #[error("Ollama request to {url} failed: {message}")]
    #[diagnostic(
        code(absa::llm::request_failed),
        help("Check that Ollama is running and the model is pulled.")
    )]
    RequestFailed { url: String, message: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Parse(#[from] ResponseError),

    #[error("all {attempts} attempts failed (chat: {chat_url}, generate: {generate_url}): {last}")]
    #[diagnostic(
        code(absa::llm::exhausted),
        help("Increase `retries` / `timeout_secs` in the config, or use a smaller model.")
    )]
    Exhausted {
        attempts: u32,
        chat_url: String,
        generate_url: String,
        #[source]
        last: Box<LlmError>,
    },
}

impl LlmError {
    /// Whether the next endpoint in priority order should be tried within
    /// the same attempt.
    fn allows_fallback(&self) -> bool {
        matches!(self, LlmError::NotFound { .. } | LlmError::EmptyContent { .. })
    }
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// A backend protocol capable of producing a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/api/chat`: role-tagged messages, text in `message.content`.
    Chat,
    /// `/api/generate`: single prompt, text in `response`.
    Generate,
}

impl Endpoint {
    pub fn path(self) -> &'static str {
        match self {
            Endpoint::Chat => "/api/chat",
            Endpoint::Generate => "/api/generate",
        }
    }

    fn request_body(self, config: &OllamaConfig, system: &str, user: &str) -> Value {
        match self {
            Endpoint::Chat => json!({
                "model": config.model,
                "format": "json",
                "stream": false,
                "options": config.options,
                "messages": [
                    {"role": "system", "content": system},
                    {"role": "user", "content": user},
                ],
            }),
            Endpoint::Generate => json!({
                "model": config.model,
                "prompt": prompt::completion_prompt(system, user),
                "options": config.options,
                "format": "json",
                "stream": false,
            }),
        }
    }

    fn response_text(self, body: &Value) -> &str {
        let text = match self {
            Endpoint::Chat => &body["message"]["content"],
            Endpoint::Generate => &body["response"],
        };
        text.as_str().unwrap_or_default()
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.path())
    }
}

/// Something that can turn a review sentence into a raw aspect payload.
///
/// The orchestrator only sees this trait; tests plug in canned responses.
pub trait AspectSource {
    /// Ask for aspects of `sentence`. `None` means the source gave up.
    fn extract_aspects(&self, sentence: &str) -> Option<Value>;

    /// Identifier stamped into every aspect's `annotator` field.
    fn annotator(&self) -> String;
}

/// Client for the Ollama REST API.
pub struct OllamaClient<T: Transport = UreqTransport> {
    config: OllamaConfig,
    transport: T,
    sleep: fn(Duration),
    available: bool,
    /// Models available locally after `probe()`.
    available_models: Vec<String>,
}

impl OllamaClient<UreqTransport> {
    /// Create a client talking HTTP with the configured timeout.
    pub fn new(config: OllamaConfig) -> Self {
        let transport = UreqTransport::new(Duration::from_secs(config.timeout_secs));
        Self::with_transport(config, transport)
    }
}

impl<T: Transport> OllamaClient<T> {
    pub fn with_transport(config: OllamaConfig, transport: T) -> Self {
        Self {
            config,
            transport,
            sleep: std::thread::sleep,
            available: false,
            available_models: Vec::new(),
        }
    }

    pub fn config(&self) -> &OllamaConfig {
        &self.config
    }

    /// Get the model name being used.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn endpoint_url(&self, endpoint: Endpoint) -> String {
        format!("{}{}", self.config.host(), endpoint.path())
    }

    /// Query `/api/tags` and remember which models are installed.
    pub fn probe(&mut self) -> bool {
        let url = format!("{}/api/tags", self.config.host());
        match self.transport.get_json(&url) {
            Ok(json) => {
                self.available = true;
                self.available_models = json["models"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|m| m["name"].as_str().map(str::to_string))
                            .collect()
                    })
                    .unwrap_or_default();
                true
            }
            Err(e) => {
                tracing::debug!(url = %url, error = %e, "probe failed");
                self.available = false;
                self.available_models.clear();
                false
            }
        }
    }

    /// Whether the last probe reached the server.
    pub fn is_available(&self) -> bool {
        self.available
    }

    /// Whether the configured model is installed. `qwen2.5` matches
    /// `qwen2.5:latest`.
    pub fn has_model(&self) -> bool {
        let target = &self.config.model;
        self.available_models
            .iter()
            .any(|m| m == target || m.split(':').next() == Some(target.as_str()))
    }

    pub fn available_models(&self) -> &[String] {
        &self.available_models
    }

    /// Probe the server and require the configured model to be installed.
    pub fn ensure_ready(&mut self) -> LlmResult<()> {
        if !self.probe() {
            return Err(LlmError::Unavailable {
                url: self.config.base_url.clone(),
            });
        }
        if !self.has_model() {
            return Err(LlmError::ModelMissing {
                model: self.config.model.clone(),
            });
        }
        Ok(())
    }

    /// Request a JSON answer, retrying failed attempts with linear backoff.
    pub fn request_json(&self, system: &str, user: &str) -> LlmResult<Value> {
        let attempts = self.config.retries + 1;
        let mut attempt = 0;
        loop {
            match self.attempt(system, user) {
                Ok(value) => return Ok(value),
                Err(e) if attempt + 1 < attempts => {
                    let backoff = self.config.backoff(attempt);
                    tracing::warn!(attempt, error = %e, ?backoff, "model request failed, retrying");
                    (self.sleep)(backoff);
                    attempt += 1;
                }
                Err(e) => {
                    let chat_url = self.endpoint_url(Endpoint::Chat);
                    let generate_url = self.endpoint_url(Endpoint::Generate);
                    tracing::error!(
                        attempts,
                        error = %e,
                        chat_url = %chat_url,
                        generate_url = %generate_url,
                        "model request failed, giving up"
                    );
                    return Err(LlmError::Exhausted {
                        attempts,
                        chat_url,
                        generate_url,
                        last: Box::new(e),
                    });
                }
            }
        }
    }

    /// One attempt: chat, then generate if chat is missing or silent.
    fn attempt(&self, system: &str, user: &str) -> LlmResult<Value> {
        let text = match self.complete(Endpoint::Chat, system, user) {
            Ok(text) => text,
            Err(e) if e.allows_fallback() => {
                tracing::debug!(error = %e, "falling back to {}", Endpoint::Generate);
                self.complete(Endpoint::Generate, system, user)?
            }
            Err(e) => return Err(e),
        };
        Ok(response::extract_json(&text)?)
    }

    /// Send one request and return the non-empty completion text.
    fn complete(&self, endpoint: Endpoint, system: &str, user: &str) -> LlmResult<String> {
        let url = self.endpoint_url(endpoint);
        let body = endpoint.request_body(&self.config, system, user);

        let json = self.transport.post_json(&url, &body).map_err(|e| match e {
            TransportError::NotFound => LlmError::NotFound {
                endpoint,
                url: url.clone(),
            },
            other => LlmError::RequestFailed {
                url: url.clone(),
                message: other.to_string(),
            },
        })?;

        let text = endpoint.response_text(&json);
        if text.trim().is_empty() {
            return Err(LlmError::EmptyContent { endpoint });
        }
        Ok(text.to_string())
    }
}

impl<T: Transport> AspectSource for OllamaClient<T> {
    fn extract_aspects(&self, sentence: &str) -> Option<Value> {
        let user = prompt::build_user_prompt(sentence);
        self.request_json(prompt::SYSTEM_PROMPT, &user).ok()
    }

    fn annotator(&self) -> String {
        format!("ollama:{}", self.config.model)
    }
}

impl<T: Transport> std::fmt::Debug for OllamaClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaClient")
            .field("base_url", &self.config.base_url)
            .field("model", &self.config.model)
            .field("available", &self.available)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Transport that replays scripted replies and records requested URLs.
    #[derive(Default)]
    struct Scripted {
        replies: RefCell<VecDeque<Result<Value, TransportError>>>,
        calls: RefCell<Vec<String>>,
        bodies: RefCell<Vec<Value>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<Value, TransportError>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                ..Default::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.borrow().clone()
        }
    }

    impl Transport for Scripted {
        fn post_json(&self, url: &str, body: &Value) -> Result<Value, TransportError> {
            self.calls.borrow_mut().push(url.to_string());
            self.bodies.borrow_mut().push(body.clone());
            self.replies
                .borrow_mut()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Connection("script exhausted".into())))
        }

        fn get_json(&self, url: &str) -> Result<Value, TransportError> {
            self.post_json(url, &Value::Null)
        }
    }

    fn chat_reply(content: &str) -> Result<Value, TransportError> {
        Ok(json!({"message": {"role": "assistant", "content": content}}))
    }

    fn generate_reply(text: &str) -> Result<Value, TransportError> {
        Ok(json!({"response": text}))
    }

    fn client(replies: Vec<Result<Value, TransportError>>) -> OllamaClient<Scripted> {
        let config = OllamaConfig {
            base_url: "http://ollama.test/".into(),
            model: "qwen2.5:14b-instruct".into(),
            retries: 2,
            backoff_ms: 0,
            ..Default::default()
        };
        OllamaClient::with_transport(config, Scripted::new(replies))
    }

    const CHAT: &str = "http://ollama.test/api/chat";
    const GENERATE: &str = "http://ollama.test/api/generate";

    #[test]
    fn chat_success_skips_generate() {
        let c = client(vec![chat_reply(r#"{"aspects":[]}"#)]);
        assert_eq!(c.request_json("s", "u").unwrap(), json!({"aspects": []}));
        assert_eq!(c.transport.calls(), vec![CHAT]);
    }

    #[test]
    fn chat_body_carries_model_format_and_options() {
        let c = client(vec![chat_reply("{}")]);
        c.request_json("sys", "usr").unwrap();
        let body = c.transport.bodies.borrow()[0].clone();
        assert_eq!(body["model"], "qwen2.5:14b-instruct");
        assert_eq!(body["format"], "json");
        assert_eq!(body["stream"], false);
        assert_eq!(body["options"]["num_ctx"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["content"], "usr");
    }

    #[test]
    fn chat_404_falls_back_to_generate_in_same_attempt() {
        let c = client(vec![
            Err(TransportError::NotFound),
            generate_reply(r#"{"aspects":[{"term":"핏"}]}"#),
        ]);
        let value = c.request_json("sys", "usr").unwrap();
        assert_eq!(value["aspects"][0]["term"], "핏");
        assert_eq!(c.transport.calls(), vec![CHAT, GENERATE]);
        let body = c.transport.bodies.borrow()[1].clone();
        assert_eq!(body["prompt"], "[SYSTEM]\nsys\n[USER]\nusr");
        assert_eq!(body["format"], "json");
    }

    #[test]
    fn empty_chat_content_falls_back() {
        let c = client(vec![chat_reply(""), generate_reply("{\"aspects\": []}")]);
        assert!(c.request_json("s", "u").is_ok());
        assert_eq!(c.transport.calls(), vec![CHAT, GENERATE]);
    }

    #[test]
    fn server_error_fails_attempt_without_fallback() {
        let c = client(vec![
            Err(TransportError::Status {
                code: 500,
                body: "oom".into(),
            }),
            chat_reply("{\"aspects\": []}"),
        ]);
        assert!(c.request_json("s", "u").is_ok());
        assert_eq!(c.transport.calls(), vec![CHAT, CHAT]);
    }

    #[test]
    fn parse_failure_is_retried_like_transport_failure() {
        let c = client(vec![
            chat_reply("I cannot help with that."),
            chat_reply("Sure:\n{\"aspects\": []}"),
        ]);
        assert_eq!(c.request_json("s", "u").unwrap(), json!({"aspects": []}));
        assert_eq!(c.transport.calls().len(), 2);
    }

    #[test]
    fn exhausted_budget_reports_both_urls() {
        let c = client(vec![]);
        let err = c.request_json("s", "u").unwrap_err();
        match err {
            LlmError::Exhausted {
                attempts,
                chat_url,
                generate_url,
                ..
            } => {
                assert_eq!(attempts, 3);
                assert_eq!(chat_url, CHAT);
                assert_eq!(generate_url, GENERATE);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(c.transport.calls().len(), 3);
    }

    #[test]
    fn empty_from_both_endpoints_is_attempt_failure() {
        let c = client(vec![
            chat_reply(""),
            generate_reply(""),
            chat_reply("{\"aspects\": []}"),
        ]);
        assert!(c.request_json("s", "u").is_ok());
        assert_eq!(c.transport.calls(), vec![CHAT, GENERATE, CHAT]);
    }

    #[test]
    fn aspect_source_returns_none_after_exhaustion() {
        let c = client(vec![]);
        assert_eq!(c.extract_aspects("사이즈가 커요"), None);
        assert_eq!(c.annotator(), "ollama:qwen2.5:14b-instruct");
    }

    #[test]
    fn probe_records_models() {
        let mut c = client(vec![Ok(json!({
            "models": [{"name": "qwen2.5:14b-instruct"}, {"name": "llama3.2:latest"}]
        }))]);
        assert!(c.probe());
        assert!(c.is_available());
        assert!(c.has_model());
        assert_eq!(c.available_models().len(), 2);
    }

    thread_local! {
        static SLEPT: RefCell<Vec<Duration>> = const { RefCell::new(Vec::new()) };
    }

    fn record_sleep(d: Duration) {
        SLEPT.with(|s| s.borrow_mut().push(d));
    }

    #[test]
    fn retries_back_off_linearly() {
        let mut c = client(vec![]);
        c.config.backoff_ms = 500;
        c.sleep = record_sleep;
        assert!(c.request_json("s", "u").is_err());
        let slept = SLEPT.with(|s| s.borrow().clone());
        assert_eq!(slept, [Duration::from_millis(500), Duration::from_millis(1000)]);
    }

    #[test]
    fn ensure_ready_reports_missing_model() {
        let mut c = client(vec![Ok(json!({"models": [{"name": "llama3.2:latest"}]}))]);
        let err = c.ensure_ready().unwrap_err();
        assert!(matches!(err, LlmError::ModelMissing { ref model } if model == "qwen2.5:14b-instruct"));

        let mut c = client(vec![]);
        assert!(matches!(c.ensure_ready(), Err(LlmError::Unavailable { .. })));

        let mut c = client(vec![Ok(json!({"models": [{"name": "qwen2.5:14b-instruct"}]}))]);
        assert!(c.ensure_ready().is_ok());
    }

    #[test]
    fn has_model_matches_untagged_name() {
        let config = OllamaConfig {
            model: "llama3.2".into(),
            ..Default::default()
        };
        let mut c = OllamaClient::with_transport(
            config,
            Scripted::new(vec![Ok(json!({"models": [{"name": "llama3.2:latest"}]}))]),
        );
        assert!(c.probe());
        assert!(c.has_model());
    }

    #[test]
    fn probe_unreachable_returns_false() {
        let config = OllamaConfig {
            base_url: "http://127.0.0.1:1".into(), // unreachable port
            timeout_secs: 2,
            ..Default::default()
        };
        let mut client = OllamaClient::new(config);
        assert!(!client.probe());
        assert!(!client.is_available());
        assert!(!client.has_model());
    }
}
