use crate::errors::{NotebookError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Lifetime requested from the remote service for every new session (one hour)
pub const DEFAULT_SESSION_TTL_SECS: u64 = 60 * 60;

/// Pause between consecutive runs of a "run all" sweep
pub const DEFAULT_RUN_ALL_PAUSE_MS: u64 = 100;

/// What the session manager does once the advisory lifetime has elapsed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryPolicy {
    /// Remaining lifetime is a display hint only; the remote service
    /// decides when the session is gone
    #[default]
    Advisory,

    /// Refuse to hand out the session once its lifetime has elapsed
    Enforced,
}

impl ExpiryPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "advisory" => Some(Self::Advisory),
            "enforced" => Some(Self::Enforced),
            _ => None,
        }
    }

    /// Description for logging/debugging
    pub fn description(&self) -> &'static str {
        match self {
            ExpiryPolicy::Advisory => "Advisory expiry (remote service retires the session)",
            ExpiryPolicy::Enforced => "Enforced expiry (fail fast once the lifetime elapses)",
        }
    }
}

/// Remote sandbox service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSettings {
    /// Control-plane endpoint used to create sessions
    pub api_url: String,
    /// Domain under which session hosts are reachable
    pub domain: String,
    /// Sandbox template to boot
    pub template: String,
    /// Lifetime set on the remote session right after creation
    pub session_ttl_secs: u64,
    /// Per-request timeout; `None` lets a hung remote call block its caller
    pub request_timeout_secs: Option<u64>,
    pub expiry_policy: ExpiryPolicy,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.e2b.dev".to_string(),
            domain: "e2b.app".to_string(),
            template: "code-interpreter-v1".to_string(),
            session_ttl_secs: DEFAULT_SESSION_TTL_SECS,
            request_timeout_secs: None,
            expiry_policy: ExpiryPolicy::Advisory,
        }
    }
}

impl SandboxSettings {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

/// Text-generation service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// OpenAI-compatible base URL (chat completions live under it)
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub request_timeout_secs: u64,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com/v1beta/openai".to_string(),
            model: "gemini-2.0-pro-exp-02-05".to_string(),
            api_key_env: "GEMINI_API_KEY".to_string(),
            temperature: 0.2,
            request_timeout_secs: 120,
        }
    }
}

impl LlmSettings {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
    }
}

/// File staging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingSettings {
    /// Keep only this many leading lines of tabular files before upload
    pub tabular_line_limit: Option<usize>,
}

/// Top-level configuration for the notebook backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotebookConfig {
    pub sandbox: SandboxSettings,
    pub llm: LlmSettings,
    pub staging: StagingSettings,
    pub run_all_pause_ms: u64,
}

impl Default for NotebookConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxSettings::default(),
            llm: LlmSettings::default(),
            staging: StagingSettings::default(),
            run_all_pause_ms: DEFAULT_RUN_ALL_PAUSE_MS,
        }
    }
}

impl NotebookConfig {
    /// Defaults overlaid with process environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok());
        config
    }

    /// Load a JSON config file, then overlay environment variables
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            NotebookError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config: Self = serde_json::from_str(&text)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn run_all_pause(&self) -> Duration {
        Duration::from_millis(self.run_all_pause_ms)
    }

    /// Overlay values from a key lookup (environment in production)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(v) = get("E2B_API_URL") {
            self.sandbox.api_url = v;
        }
        if let Some(v) = get("E2B_DOMAIN") {
            self.sandbox.domain = v;
        }
        if let Some(v) = get("E2B_TEMPLATE") {
            self.sandbox.template = v;
        }
        if let Some(v) = get("PYNOTEBOOK_SESSION_TTL_SECS").and_then(|v| v.parse().ok()) {
            self.sandbox.session_ttl_secs = v;
        }
        if let Some(v) = get("PYNOTEBOOK_REQUEST_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.sandbox.request_timeout_secs = Some(v);
        }
        if let Some(policy) = get("PYNOTEBOOK_EXPIRY_POLICY") {
            match ExpiryPolicy::parse(&policy) {
                Some(p) => self.sandbox.expiry_policy = p,
                None => tracing::warn!("Ignoring unknown expiry policy: {}", policy),
            }
        }
        if let Some(v) = get("PYNOTEBOOK_LLM_BASE_URL") {
            self.llm.base_url = v;
        }
        if let Some(v) = get("PYNOTEBOOK_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("PYNOTEBOOK_LLM_API_KEY_ENV") {
            self.llm.api_key_env = v;
        }
        if let Some(v) = get("PYNOTEBOOK_CSV_LINE_LIMIT").and_then(|v| v.parse().ok()) {
            self.staging.tabular_line_limit = Some(v);
        }
        if let Some(v) = get("PYNOTEBOOK_RUN_ALL_PAUSE_MS").and_then(|v| v.parse().ok()) {
            self.run_all_pause_ms = v;
        }
    }
}
