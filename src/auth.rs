use crate::errors::{NotebookError, Result};
use std::fs;
use std::path::{Path, PathBuf};

const API_KEY_ENV: &str = "E2B_API_KEY";

/// Where the sandbox service credential comes from
#[derive(Debug, Clone)]
pub enum CredentialSource {
    /// Read `E2B_API_KEY`, then `~/.e2b/api_key`, at session creation time
    Environment,
    /// A key supplied by the embedding application
    Static(String),
}

impl CredentialSource {
    pub fn resolve(&self) -> Result<String> {
        match self {
            CredentialSource::Static(key) if !key.trim().is_empty() => Ok(key.trim().to_string()),
            CredentialSource::Static(_) => Err(NotebookError::SessionInit(
                "Sandbox API key is empty".to_string(),
            )),
            CredentialSource::Environment => get_api_key(),
        }
    }
}

/// Get the sandbox service API key
pub fn get_api_key() -> Result<String> {
    if let Ok(key) = std::env::var(API_KEY_ENV) {
        let key = key.trim();
        if !key.is_empty() {
            return Ok(key.to_string());
        }
    }

    let key_path = get_api_key_path();
    if !key_path.exists() {
        return Err(NotebookError::SessionInit(format!(
            "{} is not set and {} does not exist",
            API_KEY_ENV,
            key_path.display()
        )));
    }

    read_key_file(&key_path)
}

fn read_key_file(path: &Path) -> Result<String> {
    let key = fs::read_to_string(path)
        .map_err(|e| NotebookError::SessionInit(format!("Failed to read API key: {}", e)))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(NotebookError::SessionInit(format!(
            "API key file {} is empty",
            path.display()
        )));
    }
    Ok(key.to_string())
}

/// Get the path to the API key file
fn get_api_key_path() -> PathBuf {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string());

    PathBuf::from(home).join(".e2b").join("api_key")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_credential() {
        let source = CredentialSource::Static("  e2b_123  ".to_string());
        assert_eq!(source.resolve().unwrap(), "e2b_123");

        let empty = CredentialSource::Static("   ".to_string());
        assert!(matches!(
            empty.resolve(),
            Err(NotebookError::SessionInit(_))
        ));
    }

    #[test]
    fn test_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("api_key");

        fs::write(&path, "  \n").unwrap();
        assert!(matches!(
            read_key_file(&path),
            Err(NotebookError::SessionInit(msg)) if msg.contains("empty")
        ));

        fs::write(&path, "e2b_abc\n").unwrap();
        assert_eq!(read_key_file(&path).unwrap(), "e2b_abc");

        assert!(matches!(
            read_key_file(&dir.path().join("missing")),
            Err(NotebookError::SessionInit(_))
        ));
    }
}
