use crate::{
    assistant::CodeAssistant,
    auth::CredentialSource,
    config::NotebookConfig,
    e2b::E2bProvider,
    engine::SandboxProvider,
    errors::Result,
    executor::{ExecutionOutcome, ExecutionPipeline},
    llm::{LlmClient, TextGenerator},
    normalize::NormalizedResult,
    session::{SessionManager, SessionStatus},
    staging::{truncate_tabular, FileStager, StagedFile},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

pub const GENERATE_FAILED: &str = "Failed to generate code";
pub const ANALYZE_FAILED: &str = "Failed to analyze output";
pub const FIX_FAILED: &str = "Failed to fix code";

pub type RunResponse = ExecutionOutcome;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CodeResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CodeResponse {
    fn ok(code: String) -> Self {
        Self {
            success: true,
            code: Some(code),
            error: None,
        }
    }

    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            code: None,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnalysisResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimeRemainingResponse {
    pub success: bool,
    pub remaining_ms: u64,
}

/// Everything the notebook UI can ask for.
///
/// Every operation answers with a `success` flag; errors never escape as
/// `Err`.
pub struct NotebookService {
    sessions: Arc<SessionManager>,
    pipeline: ExecutionPipeline,
    stager: FileStager,
    assistant: CodeAssistant,
    tabular_line_limit: Option<usize>,
}

impl NotebookService {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        credential: CredentialSource,
        generator: Arc<dyn TextGenerator>,
        config: &NotebookConfig,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(provider, credential, &config.sandbox));
        Self {
            pipeline: ExecutionPipeline::new(sessions.clone(), config.run_all_pause()),
            stager: FileStager::new(sessions.clone()),
            assistant: CodeAssistant::new(generator),
            sessions,
            tabular_line_limit: config.staging.tabular_line_limit,
        }
    }

    /// Wire the E2B sandbox service and the configured chat model
    pub fn from_config(config: &NotebookConfig) -> Result<Self> {
        let provider = Arc::new(E2bProvider::new(&config.sandbox)?);
        let generator = Arc::new(LlmClient::from_settings(&config.llm)?);
        info!(
            "[SERVICE] Using template {} and model {}",
            config.sandbox.template,
            generator.model()
        );
        Ok(Self::new(
            provider,
            CredentialSource::Environment,
            generator,
            config,
        ))
    }

    pub async fn run(&self, code: &str) -> RunResponse {
        self.pipeline.run(code).await
    }

    pub async fn run_all(&self, codes: &[String]) -> Vec<RunResponse> {
        self.pipeline.run_all(codes).await
    }

    pub async fn stage_files(&self, files: Vec<StagedFile>) -> StageResponse {
        match self.stage(files).await {
            Ok(names) => StageResponse {
                success: true,
                files: Some(names),
                error: None,
            },
            Err(e) => StageResponse {
                success: false,
                files: None,
                error: Some(e.to_string()),
            },
        }
    }

    pub async fn generate_code(&self, prompt: &str) -> CodeResponse {
        match self.assistant.generate_code(prompt).await {
            Ok(code) => CodeResponse::ok(code),
            Err(e) => {
                error!("[SERVICE] Code generation error: {}", e);
                CodeResponse::failed(GENERATE_FAILED)
            }
        }
    }

    /// Stage `files`, then generate code that reads them
    pub async fn generate_code_with_files(
        &self,
        prompt: &str,
        files: Vec<StagedFile>,
    ) -> CodeResponse {
        let result = async {
            let names = self.stage(files).await?;
            self.assistant.generate_code_with_files(prompt, &names).await
        }
        .await;

        match result {
            Ok(code) => CodeResponse::ok(code),
            Err(e) => {
                error!("[SERVICE] Code generation error: {}", e);
                CodeResponse::failed(e.to_string())
            }
        }
    }

    pub async fn analyze_output(
        &self,
        output: &str,
        results: &[NormalizedResult],
    ) -> AnalysisResponse {
        match self.assistant.analyze_output(output, results).await {
            Ok(analysis) => AnalysisResponse {
                success: true,
                analysis: Some(analysis),
                error: None,
            },
            Err(e) => {
                error!("[SERVICE] Analysis error: {}", e);
                AnalysisResponse {
                    success: false,
                    analysis: None,
                    error: Some(ANALYZE_FAILED.to_string()),
                }
            }
        }
    }

    pub async fn fix_code(&self, code: &str, error: &str) -> CodeResponse {
        match self.assistant.fix_code(code, error).await {
            Ok(code) => CodeResponse::ok(code),
            Err(e) => {
                error!("[SERVICE] Fix error: {}", e);
                CodeResponse::failed(FIX_FAILED)
            }
        }
    }

    pub fn time_remaining(&self) -> TimeRemainingResponse {
        TimeRemainingResponse {
            success: true,
            remaining_ms: self.sessions.time_remaining().as_millis() as u64,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.sessions.status()
    }

    async fn stage(&self, files: Vec<StagedFile>) -> Result<Vec<String>> {
        let files: Vec<StagedFile> = match self.tabular_line_limit {
            Some(limit) => files
                .into_iter()
                .map(|f| truncate_tabular(f, limit))
                .collect(),
            None => files,
        };
        self.stager.stage_files(&files).await
    }
}
