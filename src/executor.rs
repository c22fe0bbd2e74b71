use crate::{
    engine::RawExecution,
    errors::{NotebookError, Result},
    normalize::{normalize_all, NormalizedResult},
    session::SessionManager,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Placeholder output when an execution printed and returned nothing
pub const NO_OUTPUT: &str = "No output";
/// Error text used when a failure carries no message of its own
pub const UNKNOWN_ERROR: &str = "An unknown error occurred";

/// Result of one code submission.
///
/// `results` is `None` when a successful run produced no display items and
/// an empty list when the run failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<NormalizedResult>>,
    /// The code raised and the remote side reported a traceback
    #[serde(default)]
    pub raised: bool,
}

impl ExecutionOutcome {
    pub fn failure(message: impl Into<String>) -> Self {
        let message = message.into();
        let error = if message.trim().is_empty() {
            UNKNOWN_ERROR.to_string()
        } else {
            message
        };
        Self {
            success: false,
            output: None,
            error: Some(error),
            results: Some(Vec::new()),
            raised: false,
        }
    }

    fn from_execution(execution: &RawExecution, results: Vec<NormalizedResult>) -> Self {
        let traceback = execution
            .error
            .as_ref()
            .map(|e| e.traceback.as_str())
            .filter(|t| !t.is_empty());

        // A traceback outranks anything printed before the raise
        let stdout = execution.logs.stdout.concat();
        let output = execution
            .text()
            .filter(|t| !t.is_empty())
            .or(traceback)
            .or_else(|| Some(stdout.as_str()).filter(|s| !s.is_empty()))
            .unwrap_or(NO_OUTPUT)
            .to_string();

        Self {
            success: true,
            output: Some(output),
            error: None,
            results: if results.is_empty() { None } else { Some(results) },
            raised: execution.error.is_some(),
        }
    }

    /// Whether a fix suggestion should be offered for this outcome
    pub fn needs_fix(&self) -> bool {
        if !self.success || self.raised {
            return true;
        }
        self.output
            .as_deref()
            .map(|o| {
                let lower = o.to_lowercase();
                lower.contains("error") || lower.contains("exception")
            })
            .unwrap_or(false)
    }

    /// Text to feed into a fix request
    pub fn error_text(&self) -> &str {
        self.error
            .as_deref()
            .or(self.output.as_deref())
            .unwrap_or(UNKNOWN_ERROR)
    }
}

/// Submits code to the managed session and normalizes what comes back
pub struct ExecutionPipeline {
    sessions: Arc<SessionManager>,
    run_all_pause: Duration,
}

impl ExecutionPipeline {
    pub fn new(sessions: Arc<SessionManager>, run_all_pause: Duration) -> Self {
        Self {
            sessions,
            run_all_pause,
        }
    }

    /// Run one piece of code. Every failure is folded into the outcome.
    pub async fn run(&self, code: &str) -> ExecutionOutcome {
        let execution_id = Uuid::new_v4();
        debug!("[EXEC] {} submitting {} bytes", execution_id, code.len());

        match self.try_run(code).await {
            Ok(outcome) => {
                info!(
                    "[EXEC] {} finished (raised: {}, results: {})",
                    execution_id,
                    outcome.raised,
                    outcome.results.as_ref().map_or(0, Vec::len)
                );
                outcome
            }
            Err(e) => {
                warn!("[EXEC] {} failed: {}", execution_id, e);
                ExecutionOutcome::failure(e.to_string())
            }
        }
    }

    /// Run cells top to bottom, one round trip at a time.
    ///
    /// A failing cell does not stop the ones after it.
    pub async fn run_all<S: AsRef<str>>(&self, codes: &[S]) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::with_capacity(codes.len());
        for (i, code) in codes.iter().enumerate() {
            if i > 0 && !self.run_all_pause.is_zero() {
                tokio::time::sleep(self.run_all_pause).await;
            }
            outcomes.push(self.run(code.as_ref()).await);
        }
        outcomes
    }

    async fn try_run(&self, code: &str) -> Result<ExecutionOutcome> {
        let handle = self.sessions.ensure_session().await?;
        let execution = handle.session.run_code(code).await.map_err(|e| match e {
            NotebookError::Execution(_) => e,
            other => NotebookError::Execution(other.to_string()),
        })?;
        let results = normalize_all(&execution.results)?;
        Ok(ExecutionOutcome::from_execution(&execution, results))
    }
}
