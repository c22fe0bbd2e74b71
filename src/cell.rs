use crate::{
    errors::{NotebookError, Result},
    executor::ExecutionOutcome,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CellStatus {
    #[default]
    Idle,
    Executing,
    Succeeded,
    Failed,
}

/// One notebook code cell and its last execution.
///
/// Code written by the assistant carries `ai_generated` and must be
/// confirmed with [`Cell::confirm_review`] before it may run. Editing the
/// source by hand takes ownership of it and lifts the gate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Cell {
    pub id: String,
    pub source: String,
    pub status: CellStatus,
    pub ai_generated: bool,
    pub review_confirmed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ExecutionOutcome>,
}

impl Default for Cell {
    fn default() -> Self {
        Self::new(String::new())
    }
}

impl Cell {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: source.into(),
            status: CellStatus::Idle,
            ai_generated: false,
            review_confirmed: false,
            outcome: None,
        }
    }

    /// Replace the source with a user edit
    pub fn edit_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.ai_generated = false;
        self.review_confirmed = false;
    }

    /// Replace the source with assistant output that still needs review
    pub fn set_generated_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        self.ai_generated = true;
        self.review_confirmed = false;
    }

    pub fn confirm_review(&mut self) {
        self.review_confirmed = true;
    }

    pub fn needs_review(&self) -> bool {
        self.ai_generated && !self.review_confirmed
    }

    /// Enter `Executing`. Allowed from every state once review is settled.
    pub fn begin_execution(&mut self) -> Result<()> {
        if self.needs_review() {
            return Err(NotebookError::ReviewRequired);
        }
        self.status = CellStatus::Executing;
        Ok(())
    }

    pub fn complete(&mut self, outcome: ExecutionOutcome) {
        self.status = if outcome.success {
            CellStatus::Succeeded
        } else {
            CellStatus::Failed
        };
        self.outcome = Some(outcome);
    }

    pub fn is_executing(&self) -> bool {
        self.status == CellStatus::Executing
    }
}
