use pynotebook::{NormalizedResult, NotebookConfig, NotebookService, StagedFile};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Default)]
struct WorkerConfig {
    config_path: Option<PathBuf>,
    model: Option<String>,
    template: Option<String>,
}

impl WorkerConfig {
    fn from_env_and_args() -> Self {
        let args: Vec<String> = std::env::args().collect();
        let mut cfg = Self {
            config_path: std::env::var("PYNOTEBOOK_CONFIG").ok().map(PathBuf::from),
            ..Default::default()
        };

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(v) = args.get(i + 1) {
                        cfg.config_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--model" => {
                    if let Some(v) = args.get(i + 1) {
                        cfg.model = Some(v.clone());
                    }
                    i += 2;
                }
                "--template" => {
                    if let Some(v) = args.get(i + 1) {
                        cfg.template = Some(v.clone());
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }
        cfg
    }

    fn notebook_config(&self) -> pynotebook::Result<NotebookConfig> {
        let mut config = match &self.config_path {
            Some(path) => NotebookConfig::from_file(path)?,
            None => NotebookConfig::from_env(),
        };
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(template) = &self.template {
            config.sandbox.template = template.clone();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries JSON-RPC, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "pynotebook_worker=info,pynotebook=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = WorkerConfig::from_env_and_args();
    let config = cfg.notebook_config()?;
    tracing::info!(
        "pynotebook-worker starting (template={}, model={}, expiry={})",
        config.sandbox.template,
        config.llm.model,
        config.sandbox.expiry_policy.description()
    );
    let service = NotebookService::from_config(&config)?;

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        let method = parsed
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();

        if let Some(resp) = handle_message(&service, parsed).await {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }

        if method == "shutdown" || method == "exit" {
            break;
        }
    }

    tracing::info!("pynotebook-worker stopped");
    Ok(())
}

#[derive(Debug, Deserialize)]
struct RunParams {
    code: String,
}

#[derive(Debug, Deserialize)]
struct RunAllParams {
    codes: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GenerateParams {
    prompt: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FileParam {
    Inline(StagedFile),
    Local { path: PathBuf },
}

#[derive(Debug, Deserialize)]
struct GenerateWithFilesParams {
    prompt: String,
    #[serde(default)]
    files: Vec<FileParam>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeParams {
    output: String,
    #[serde(default)]
    results: Vec<NormalizedResult>,
}

#[derive(Debug, Deserialize)]
struct FixParams {
    code: String,
    error: String,
}

fn parse_params<T: DeserializeOwned>(params: &Value) -> std::result::Result<T, Value> {
    serde_json::from_value(params.clone())
        .map_err(|e| json!({ "code": -32602, "message": format!("Invalid params: {}", e) }))
}

fn to_result<T: serde::Serialize>(value: &T) -> std::result::Result<Value, Value> {
    serde_json::to_value(value).map_err(|e| json!({ "code": -32603, "message": e.to_string() }))
}

async fn handle_message(service: &NotebookService, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id and get no reply
    if id.is_none() {
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "serverInfo": {
                "name": "pynotebook-worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "methods": [
                "notebook/run",
                "notebook/runAll",
                "notebook/generateCode",
                "notebook/generateCodeWithFiles",
                "notebook/analyzeOutput",
                "notebook/fixCode",
                "notebook/timeRemaining",
                "notebook/status"
            ]
        })),
        "notebook/run" => match parse_params::<RunParams>(&params) {
            Ok(p) => to_result(&service.run(&p.code).await),
            Err(e) => Err(e),
        },
        "notebook/runAll" => match parse_params::<RunAllParams>(&params) {
            Ok(p) => to_result(&service.run_all(&p.codes).await),
            Err(e) => Err(e),
        },
        "notebook/generateCode" => match parse_params::<GenerateParams>(&params) {
            Ok(p) => to_result(&service.generate_code(&p.prompt).await),
            Err(e) => Err(e),
        },
        "notebook/generateCodeWithFiles" => {
            match parse_params::<GenerateWithFilesParams>(&params) {
                Ok(p) => generate_with_files(service, p).await,
                Err(e) => Err(e),
            }
        }
        "notebook/analyzeOutput" => match parse_params::<AnalyzeParams>(&params) {
            Ok(p) => to_result(&service.analyze_output(&p.output, &p.results).await),
            Err(e) => Err(e),
        },
        "notebook/fixCode" => match parse_params::<FixParams>(&params) {
            Ok(p) => to_result(&service.fix_code(&p.code, &p.error).await),
            Err(e) => Err(e),
        },
        "notebook/timeRemaining" => to_result(&service.time_remaining()),
        "notebook/status" => to_result(&service.status()),
        "shutdown" => Ok(Value::Null),
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

async fn generate_with_files(
    service: &NotebookService,
    params: GenerateWithFilesParams,
) -> std::result::Result<Value, Value> {
    let mut files = Vec::with_capacity(params.files.len());
    for file in params.files {
        match file {
            FileParam::Inline(staged) => files.push(staged),
            FileParam::Local { path } => match StagedFile::from_path(&path).await {
                Ok(staged) => files.push(staged),
                Err(e) => {
                    tracing::warn!("could not read {}: {}", path.display(), e);
                    return Ok(json!({ "success": false, "error": e.to_string() }));
                }
            },
        }
    }
    to_result(
        &service
            .generate_code_with_files(&params.prompt, files)
            .await,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> NotebookService {
        NotebookService::from_config(&NotebookConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let resp = handle_message(&service(), json!({"jsonrpc": "2.0", "method": "nope", "id": 7}))
            .await
            .unwrap();
        assert_eq!(resp["error"]["code"], -32601);
        assert_eq!(resp["id"], 7);
    }

    #[tokio::test]
    async fn test_missing_params() {
        let resp = handle_message(
            &service(),
            json!({"jsonrpc": "2.0", "method": "notebook/run", "id": 1, "params": {}}),
        )
        .await
        .unwrap();
        assert_eq!(resp["error"]["code"], -32602);
    }

    #[tokio::test]
    async fn test_notifications_get_no_reply() {
        let resp = handle_message(&service(), json!({"jsonrpc": "2.0", "method": "exit"})).await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn test_time_remaining_before_first_run() {
        let resp = handle_message(
            &service(),
            json!({"jsonrpc": "2.0", "method": "notebook/timeRemaining", "id": 2}),
        )
        .await
        .unwrap();
        assert_eq!(resp["result"], json!({"success": true, "remainingMs": 0}));
    }

    #[test]
    fn test_file_params() {
        let params: GenerateWithFilesParams = serde_json::from_value(json!({
            "prompt": "plot",
            "files": [{"name": "a.csv", "content": "x\n1"}, {"path": "/tmp/b.csv"}]
        }))
        .unwrap();
        assert!(matches!(&params.files[0], FileParam::Inline(f) if f.name == "a.csv"));
        assert!(matches!(&params.files[1], FileParam::Local { .. }));
    }
}
