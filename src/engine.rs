use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// One display item produced by an execution, as reported by the remote side
///
/// `chart` and `extra` are kept as the JSON the kernel sent. Their shape
/// depends on the plotting library and kernel version.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawResult {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub markdown: Option<String>,
    #[serde(default)]
    pub svg: Option<String>,
    /// Base64-encoded PNG
    #[serde(default)]
    pub png: Option<String>,
    /// Base64-encoded JPEG
    #[serde(default)]
    pub jpeg: Option<String>,
    /// Base64-encoded PDF
    #[serde(default)]
    pub pdf: Option<String>,
    #[serde(default)]
    pub latex: Option<String>,
    #[serde(default)]
    pub json: Option<Value>,
    #[serde(default)]
    pub javascript: Option<String>,
    /// The untouched wire record
    #[serde(default, skip_deserializing)]
    pub raw: Option<Value>,
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub chart: Option<Value>,
    #[serde(default)]
    pub extra: Option<Value>,
    #[serde(default)]
    pub is_main_result: bool,
}

impl RawResult {
    /// Build a result from a wire record, keeping the record itself in `raw`.
    ///
    /// Never fails: a slot with an unexpected type is left empty instead of
    /// losing the whole result.
    pub fn from_wire(record: Value) -> Self {
        let text = |key: &str| record.get(key).and_then(Value::as_str).map(str::to_string);
        let value = |key: &str| record.get(key).filter(|v| !v.is_null()).cloned();

        let mut result = RawResult {
            text: text("text"),
            html: text("html"),
            markdown: text("markdown"),
            svg: text("svg"),
            png: text("png"),
            jpeg: text("jpeg"),
            pdf: text("pdf"),
            latex: text("latex"),
            json: value("json"),
            javascript: text("javascript"),
            raw: None,
            data: value("data"),
            chart: value("chart"),
            extra: value("extra"),
            is_main_result: record
                .get("is_main_result")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        };
        result.raw = Some(record);
        result
    }
}

/// Captured stdout/stderr chunks
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Logs {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

/// Exception raised by the executed code
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionErrorInfo {
    pub name: String,
    pub value: String,
    pub traceback: String,
}

/// Everything the remote side reported for one code submission
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawExecution {
    pub results: Vec<RawResult>,
    pub logs: Logs,
    pub error: Option<ExecutionErrorInfo>,
    pub execution_count: Option<u64>,
}

impl RawExecution {
    /// Text of the main result, i.e. the value of the last expression
    pub fn text(&self) -> Option<&str> {
        self.results
            .iter()
            .find(|r| r.is_main_result)
            .and_then(|r| r.text.as_deref())
    }
}

/// A live remote execution context
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Remote identifier of the session
    fn id(&self) -> &str;

    /// Ask the remote service to retire the session after `ttl`
    async fn set_timeout(&self, ttl: Duration) -> Result<()>;

    /// Execute code and wait for the full result
    async fn run_code(&self, code: &str) -> Result<RawExecution>;

    /// Write a text file into the session's working directory
    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
}

/// Factory for remote sessions
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    /// Create a new remote session authenticated with `credential`
    async fn create_session(&self, credential: &str) -> Result<Arc<dyn RemoteSession>>;

    /// Provider name for logging
    fn name(&self) -> &str;
}
