use crate::{
    config::SandboxSettings,
    engine::{ExecutionErrorInfo, RawExecution, RawResult, RemoteSession, SandboxProvider},
    errors::{NotebookError, Result},
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Port of the code-interpreter kernel gateway inside a session
const EXECUTION_PORT: u16 = 49999;
/// Port of the filesystem daemon inside a session
const FILESYSTEM_PORT: u16 = 49983;
/// Working directory owner inside the session
const SESSION_USER: &str = "user";

/// E2B-style code-interpreter sandbox service over HTTP
pub struct E2bProvider {
    http: Client,
    api_url: String,
    domain: String,
    template: String,
    session_ttl: Duration,
}

impl E2bProvider {
    pub fn new(settings: &SandboxSettings) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = settings.request_timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(Self {
            http: builder.build()?,
            api_url: settings.api_url.trim_end_matches('/').to_string(),
            domain: settings.domain.clone(),
            template: settings.template.clone(),
            session_ttl: settings.session_ttl(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxResponse {
    #[serde(rename = "sandboxID")]
    sandbox_id: String,
    #[serde(default)]
    envd_access_token: Option<String>,
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    async fn create_session(&self, credential: &str) -> Result<Arc<dyn RemoteSession>> {
        let url = format!("{}/sandboxes", self.api_url);
        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", credential)
            .json(&json!({
                "templateID": self.template,
                "timeout": self.session_ttl.as_secs(),
            }))
            .send()
            .await
            .map_err(|e| NotebookError::SessionInit(format!("Failed to create sandbox: {}", e)))?;

        let resp = error_for_status(resp)
            .await
            .map_err(|msg| NotebookError::SessionInit(format!("Failed to create sandbox: {}", msg)))?;

        let created: CreateSandboxResponse = resp.json().await.map_err(|e| {
            NotebookError::SessionInit(format!("Unexpected create response: {}", e))
        })?;

        info!(
            "[E2B] Created sandbox {} from template {}",
            created.sandbox_id, self.template
        );

        Ok(Arc::new(E2bSession {
            http: self.http.clone(),
            api_url: self.api_url.clone(),
            api_key: credential.to_string(),
            domain: self.domain.clone(),
            sandbox_id: created.sandbox_id,
            access_token: created.envd_access_token,
        }))
    }

    fn name(&self) -> &str {
        "e2b"
    }
}

/// One remote E2B sandbox
pub struct E2bSession {
    http: Client,
    api_url: String,
    api_key: String,
    domain: String,
    sandbox_id: String,
    access_token: Option<String>,
}

impl E2bSession {
    fn host_url(&self, port: u16, path: &str) -> String {
        format!("https://{}-{}.{}{}", port, self.sandbox_id, self.domain, path)
    }

    fn with_access_token(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.header("X-Access-Token", token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteSession for E2bSession {
    fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn set_timeout(&self, ttl: Duration) -> Result<()> {
        let url = format!("{}/sandboxes/{}/timeout", self.api_url, self.sandbox_id);
        let resp = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(&json!({ "timeout": ttl.as_secs() }))
            .send()
            .await?;

        error_for_status(resp)
            .await
            .map_err(|msg| NotebookError::SessionInit(format!("Failed to set timeout: {}", msg)))?;
        Ok(())
    }

    async fn run_code(&self, code: &str) -> Result<RawExecution> {
        let url = self.host_url(EXECUTION_PORT, "/execute");
        let resp = self
            .with_access_token(self.http.post(&url))
            .json(&json!({ "code": code }))
            .send()
            .await?;

        let resp = error_for_status(resp).await.map_err(NotebookError::Execution)?;
        let accumulator = accumulate_stream(resp.bytes_stream()).await?;

        if !accumulator.finished() {
            warn!(
                "[E2B] Execution stream for {} ended without end_of_execution",
                self.sandbox_id
            );
        }
        Ok(accumulator.finish())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let url = self.host_url(FILESYSTEM_PORT, "/files");
        let form = Form::new().part(
            "file",
            Part::text(content.to_string()).file_name(path.to_string()),
        );
        let resp = self
            .with_access_token(self.http.post(&url))
            .query(&[("path", path), ("username", SESSION_USER)])
            .multipart(form)
            .send()
            .await?;

        error_for_status(resp)
            .await
            .map_err(|msg| NotebookError::Staging(format!("{}: {}", path, msg)))?;
        debug!("[E2B] Wrote {} ({} bytes)", path, content.len());
        Ok(())
    }
}

/// Turn a non-2xx response into "status - body"
async fn error_for_status(resp: Response) -> std::result::Result<Response, String> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(format!("{} - {}", status, body.trim()))
}

/// Folds the NDJSON execution stream into a [`RawExecution`]
#[derive(Debug, Default)]
pub struct ExecutionAccumulator {
    execution: RawExecution,
    finished: bool,
}

impl ExecutionAccumulator {
    /// Consume one line of the stream; malformed lines are skipped
    pub fn push_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let record: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                warn!("[E2B] Skipping malformed execution record: {}", e);
                return;
            }
        };

        let kind = str_field(&record, "type");
        match kind.as_str() {
            "stdout" => self.execution.logs.stdout.push(str_field(&record, "text")),
            "stderr" => self.execution.logs.stderr.push(str_field(&record, "text")),
            "error" => {
                self.execution.error = Some(ExecutionErrorInfo {
                    name: str_field(&record, "name"),
                    value: str_field(&record, "value"),
                    traceback: str_field(&record, "traceback"),
                })
            }
            "number_of_executions" => {
                self.execution.execution_count =
                    record.get("execution_count").and_then(Value::as_u64);
            }
            "end_of_execution" => self.finished = true,
            "result" => self.execution.results.push(RawResult::from_wire(record)),
            other => debug!("[E2B] Ignoring record type {:?}", other),
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    pub fn finish(self) -> RawExecution {
        self.execution
    }
}

/// Split a byte stream into lines and fold them into an accumulator.
///
/// Lines are decoded only once complete, so records and multibyte
/// characters may be split across chunks.
pub async fn accumulate_stream<S, B, E>(stream: S) -> Result<ExecutionAccumulator>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    NotebookError: From<E>,
{
    let mut stream = std::pin::pin!(stream);
    let mut accumulator = ExecutionAccumulator::default();
    let mut buf: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        buf.extend_from_slice(chunk?.as_ref());
        while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            accumulator.push_line(&String::from_utf8_lossy(&line));
        }
    }
    if !buf.is_empty() {
        accumulator.push_line(&String::from_utf8_lossy(&buf));
    }
    Ok(accumulator)
}

fn str_field(record: &Value, key: &str) -> String {
    record
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accumulate(lines: &[&str]) -> ExecutionAccumulator {
        let mut acc = ExecutionAccumulator::default();
        for line in lines {
            acc.push_line(line);
        }
        acc
    }

    #[test]
    fn test_accumulates_stream() {
        let acc = accumulate(&[
            r#"{"type": "number_of_executions", "execution_count": 3}"#,
            r#"{"type": "stdout", "text": "hello\n"}"#,
            r#"{"type": "stderr", "text": "warning\n"}"#,
            r#"{"type": "result", "text": "2", "is_main_result": true}"#,
            r#"{"type": "end_of_execution"}"#,
        ]);
        assert!(acc.finished());

        let execution = acc.finish();
        assert_eq!(execution.logs.stdout, vec!["hello\n"]);
        assert_eq!(execution.logs.stderr, vec!["warning\n"]);
        assert_eq!(execution.execution_count, Some(3));
        assert_eq!(execution.text(), Some("2"));
        assert!(execution.error.is_none());
    }

    #[test]
    fn test_error_record() {
        let execution = accumulate(&[
            r#"{"type": "error", "name": "ZeroDivisionError", "value": "division by zero", "traceback": "Traceback...\nZeroDivisionError: division by zero"}"#,
        ])
        .finish();

        let error = execution.error.unwrap();
        assert_eq!(error.name, "ZeroDivisionError");
        assert!(error.traceback.ends_with("division by zero"));
    }

    #[test]
    fn test_skips_garbage() {
        let acc = accumulate(&[
            "",
            "not json",
            r#"{"type": "heartbeat"}"#,
            r#"{"type": "result", "html": "<b>x</b>"}"#,
        ]);
        assert!(!acc.finished());

        let execution = acc.finish();
        assert_eq!(execution.results.len(), 1);
        assert_eq!(execution.results[0].html.as_deref(), Some("<b>x</b>"));
    }

    #[test]
    fn test_odd_chart_keeps_result() {
        let execution = accumulate(&[
            r#"{"type": "result", "png": "AAAA", "chart": {"title": "untyped"}}"#,
            r#"{"type": "result", "chart": "not an object"}"#,
            r#"{"type": "result", "text": "last", "is_main_result": true}"#,
        ])
        .finish();

        assert_eq!(execution.results.len(), 3);
        assert_eq!(execution.results[0].png.as_deref(), Some("AAAA"));
        assert_eq!(execution.results[1].chart, Some(json!("not an object")));
        assert_eq!(execution.text(), Some("last"));
    }

    #[tokio::test]
    async fn test_records_split_across_chunks() {
        let chunks: Vec<std::result::Result<Vec<u8>, NotebookError>> = vec![
            Ok(br#"{"type": "stdout", "te"#.to_vec()),
            Ok(b"xt\": \"one\\n\"}\n{\"type\": \"result\", \"text\": \"".to_vec()),
            Ok(b"done\", \"is_main_result\": true}\n".to_vec()),
            Ok(br#"{"type": "end_of_execution"}"#.to_vec()),
        ];

        let acc = accumulate_stream(futures::stream::iter(chunks)).await.unwrap();
        assert!(acc.finished());
        let execution = acc.finish();
        assert_eq!(execution.logs.stdout, vec!["one\n"]);
        assert_eq!(execution.text(), Some("done"));
    }

    #[tokio::test]
    async fn test_multibyte_char_split_across_chunks() {
        let line = "{\"type\": \"stdout\", \"text\": \"café ☕\"}\n".as_bytes();
        let cut = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let chunks: Vec<std::result::Result<Vec<u8>, NotebookError>> =
            vec![Ok(line[..cut].to_vec()), Ok(line[cut..].to_vec())];

        let execution = accumulate_stream(futures::stream::iter(chunks))
            .await
            .unwrap()
            .finish();
        assert_eq!(execution.logs.stdout, vec!["café ☕"]);
    }

    #[tokio::test]
    async fn test_stream_error_propagates() {
        let chunks: Vec<std::result::Result<Vec<u8>, NotebookError>> = vec![
            Ok(b"{\"type\": \"stdout\", \"text\": \"a\"}\n".to_vec()),
            Err(NotebookError::Execution("connection reset".to_string())),
        ];
        let err = accumulate_stream(futures::stream::iter(chunks)).await.unwrap_err();
        assert!(matches!(err, NotebookError::Execution(_)));
    }

    #[test]
    fn test_host_url() {
        let session = E2bSession {
            http: Client::new(),
            api_url: "https://api.e2b.dev".to_string(),
            api_key: "key".to_string(),
            domain: "e2b.app".to_string(),
            sandbox_id: "abc123".to_string(),
            access_token: None,
        };
        assert_eq!(
            session.host_url(EXECUTION_PORT, "/execute"),
            "https://49999-abc123.e2b.app/execute"
        );
        assert_eq!(session.id(), "abc123");
    }
}
