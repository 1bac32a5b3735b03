//! Process configuration, read once at start-up from an optional TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working setup against a local Ollama server.

use std::path::Path;
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from loading configuration.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(absa::config::read),
        help("Ensure the config file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(absa::config::parse),
        help("Check the TOML syntax. Only the [ollama], [ollama.options] and [labeling] tables are recognised, and unknown keys are rejected.")
    )]
    Parse { path: String, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub labeling: LabelingConfig,
}

/// Connection and sampling settings for the Ollama backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OllamaConfig {
    /// Base URL for the Ollama API.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Model name to use.
    #[serde(default = "default_model")]
    pub model: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra attempts after the first failed one.
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Backoff unit; attempt `n` (0-based) sleeps `backoff_ms * (n + 1)`.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default)]
    pub options: SamplingOptions,
}

/// The `options` object sent with every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SamplingOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f64>,
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LabelingConfig {
    /// Confidence stamped on every model-produced aspect.
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Pause after each model call, in milliseconds.
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
    /// Log progress every this many labeled records (0 disables).
    #[serde(default = "default_progress_every")]
    pub progress_every: usize,
}

fn default_base_url() -> String {
    "http://localhost:11434".into()
}
fn default_model() -> String {
    "qwen2.5:14b-instruct".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_retries() -> u32 {
    2
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_temperature() -> f64 {
    0.1
}
fn default_num_ctx() -> u32 {
    4096
}
fn default_confidence() -> f64 {
    1.0
}
fn default_delay_ms() -> u64 {
    5
}
fn default_progress_every() -> usize {
    50
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            options: SamplingOptions::default(),
        }
    }
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            num_ctx: default_num_ctx(),
            top_p: None,
            repeat_penalty: None,
        }
    }
}

impl Default for LabelingConfig {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            delay_ms: default_delay_ms(),
            progress_every: default_progress_every(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.display().to_string(),
            message,
        })
    }

    /// Load from `path` when given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> ConfigResult<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    fn parse(content: &str) -> Result<Self, String> {
        let config: AppConfig = toml::from_str(content).map_err(|e| e.to_string())?;
        if !(0.0..=1.0).contains(&config.labeling.confidence) {
            return Err(format!(
                "labeling.confidence must be within [0, 1], got {}",
                config.labeling.confidence
            ));
        }
        Ok(config)
    }
}

impl OllamaConfig {
    /// Apply CLI overrides on top of file values.
    pub fn with_overrides(mut self, base_url: Option<String>, model: Option<String>) -> Self {
        if let Some(url) = base_url {
            self.base_url = url;
        }
        if let Some(model) = model {
            self.model = model;
        }
        self
    }

    /// Sleep before retry number `attempt + 1` (0-based `attempt`).
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt) + 1))
    }

    /// Base URL without a trailing slash.
    pub fn host(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = AppConfig::default();
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
        assert_eq!(config.ollama.model, "qwen2.5:14b-instruct");
        assert_eq!(config.ollama.timeout_secs, 120);
        assert_eq!(config.ollama.retries, 2);
        assert_eq!(config.ollama.options.temperature, 0.1);
        assert_eq!(config.ollama.options.num_ctx, 4096);
        assert_eq!(config.labeling.confidence, 1.0);
        assert_eq!(config.labeling.delay_ms, 5);
    }

    #[test]
    fn empty_file_yields_defaults() {
        assert_eq!(AppConfig::parse("").unwrap(), AppConfig::default());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let config = AppConfig::parse(
            r#"
            [ollama]
            model = "llama3.1:8b-instruct"
            [ollama.options]
            num_ctx = 8192
            top_p = 0.9
            "#,
        )
        .unwrap();
        assert_eq!(config.ollama.model, "llama3.1:8b-instruct");
        assert_eq!(config.ollama.options.num_ctx, 8192);
        assert_eq!(config.ollama.options.top_p, Some(0.9));
        assert_eq!(config.ollama.options.temperature, 0.1);
        assert_eq!(config.ollama.base_url, "http://localhost:11434");
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(AppConfig::parse("[ollama]\nmodle = \"x\"\n").is_err());
    }

    #[test]
    fn out_of_range_confidence_is_rejected() {
        assert!(AppConfig::parse("[labeling]\nconfidence = 1.5\n").is_err());
    }

    #[test]
    fn overrides_and_host_trim() {
        let config = OllamaConfig::default()
            .with_overrides(Some("http://gpu-box:11434/".into()), None);
        assert_eq!(config.host(), "http://gpu-box:11434");
        assert_eq!(config.model, "qwen2.5:14b-instruct");
    }

    #[test]
    fn backoff_grows_linearly() {
        let config = OllamaConfig::default();
        let delays: Vec<u64> = (0..config.retries)
            .map(|attempt| config.backoff(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, [500, 1000]);
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("absa-seed.toml");
        std::fs::write(
            &path,
            "[ollama]\nmodel = \"llama3.2\"\n\n[ollama.options]\nrepeat_penalty = 1.05\n",
        )
        .unwrap();
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.ollama.model, "llama3.2");
        assert_eq!(config.ollama.options.repeat_penalty, Some(1.05));
        assert_eq!(config.labeling, LabelingConfig::default());
    }

    #[test]
    fn missing_file_is_read_error() {
        let err = AppConfig::load(Path::new("/nonexistent/absa-seed.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
