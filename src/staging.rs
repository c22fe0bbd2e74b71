use crate::{
    errors::{NotebookError, Result},
    session::SessionManager,
};
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

const TABULAR_MIME: &str = "text/csv";

/// A user-provided text file bound for the session's working directory
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StagedFile {
    pub name: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl StagedFile {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
            mime_type: None,
        }
    }

    /// Read a local text file, naming it after its final path component
    pub async fn from_path(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                NotebookError::Staging(format!("Not a file path: {}", path.display()))
            })?
            .to_string();
        let content = tokio::fs::read_to_string(path).await?;
        Ok(Self::new(name, content))
    }

    pub fn is_tabular(&self) -> bool {
        self.mime_type.as_deref() == Some(TABULAR_MIME)
            || self.name.to_ascii_lowercase().ends_with(".csv")
    }
}

/// Keep the first `max_lines` lines of a tabular file.
///
/// Other files, and a limit of zero, pass through untouched.
pub fn truncate_tabular(file: StagedFile, max_lines: usize) -> StagedFile {
    if max_lines == 0 || !file.is_tabular() {
        return file;
    }
    let content = file
        .content
        .split('\n')
        .take(max_lines)
        .collect::<Vec<_>>()
        .join("\n");
    StagedFile { content, ..file }
}

/// Writes files into the managed session
pub struct FileStager {
    sessions: Arc<SessionManager>,
}

impl FileStager {
    pub fn new(sessions: Arc<SessionManager>) -> Self {
        Self { sessions }
    }

    /// Write every file concurrently and return their names in input order.
    ///
    /// Any failed write fails the whole call. Writes that already landed are
    /// not rolled back.
    pub async fn stage_files(&self, files: &[StagedFile]) -> Result<Vec<String>> {
        let handle = self.sessions.ensure_session().await?;
        let session = handle.session;

        let writes = files.iter().map(|file| {
            let session = session.clone();
            async move {
                session
                    .write_file(&file.name, &file.content)
                    .await
                    .map_err(|e| match e {
                        NotebookError::Staging(_) => e,
                        other => NotebookError::Staging(format!("{}: {}", file.name, other)),
                    })?;
                Ok::<_, NotebookError>(file.name.clone())
            }
        });

        match try_join_all(writes).await {
            Ok(names) => {
                info!(
                    "[STAGING] Wrote {} file(s) to session {}",
                    names.len(),
                    session.id()
                );
                Ok(names)
            }
            Err(e) => {
                warn!("[STAGING] {}", e);
                Err(e)
            }
        }
    }
}
