//! Backend for a Python notebook that runs cells in a remote E2B-style
//! sandbox, with optional AI help for writing, fixing and explaining code.
//!
//! # Example
//! ```no_run
//! use pynotebook::{NotebookConfig, NotebookService};
//!
//! # async fn demo() -> pynotebook::Result<()> {
//! let service = NotebookService::from_config(&NotebookConfig::from_env())?;
//! let outcome = service.run("import math\nmath.pi").await;
//! println!("{:?}", outcome.output);
//! # Ok(())
//! # }
//! ```

pub mod assistant;
pub mod auth;
pub mod cell;
pub mod config;
pub mod e2b;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod llm;
pub mod normalize;
pub mod service;
pub mod session;
pub mod staging;

#[cfg(test)]
mod testing;

pub use assistant::{extract_code, CodeAssistant};
pub use auth::CredentialSource;
pub use cell::{Cell, CellStatus};
pub use config::{ExpiryPolicy, NotebookConfig};
pub use engine::{RawExecution, RawResult, RemoteSession, SandboxProvider};
pub use errors::{NotebookError, Result};
pub use executor::{ExecutionOutcome, ExecutionPipeline};
pub use llm::{ChatMessage, LlmClient, TextGenerator};
pub use normalize::{normalize, NormalizedResult};
pub use service::{
    AnalysisResponse, CodeResponse, NotebookService, RunResponse, StageResponse,
    TimeRemainingResponse,
};
pub use session::{SessionHandle, SessionManager, SessionStatus};
pub use staging::{FileStager, StagedFile};
