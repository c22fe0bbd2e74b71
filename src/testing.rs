//! In-memory collaborators for unit tests.

use crate::{
    engine::{RawExecution, RawResult, RemoteSession, SandboxProvider},
    errors::{NotebookError, Result},
    llm::{ChatMessage, TextGenerator},
};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct MockSession {
    id: String,
    pub timeout: Mutex<Option<Duration>>,
    pub runs: Mutex<Vec<String>>,
    pub files: Mutex<Vec<(String, String)>>,
    responses: Mutex<VecDeque<Result<RawExecution>>>,
    failing_files: Mutex<HashSet<String>>,
    pub fail_timeout: AtomicBool,
}

impl MockSession {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            timeout: Mutex::new(None),
            runs: Mutex::new(Vec::new()),
            files: Mutex::new(Vec::new()),
            responses: Mutex::new(VecDeque::new()),
            failing_files: Mutex::new(HashSet::new()),
            fail_timeout: AtomicBool::new(false),
        }
    }

    /// Queue the outcome of the next `run_code` call
    pub fn push_response(&self, response: Result<RawExecution>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn fail_file(&self, name: &str) {
        self.failing_files.lock().unwrap().insert(name.to_string());
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_timeout(&self, ttl: Duration) -> Result<()> {
        if self.fail_timeout.load(Ordering::SeqCst) {
            return Err(NotebookError::SessionInit("timeout rejected".to_string()));
        }
        *self.timeout.lock().unwrap() = Some(ttl);
        Ok(())
    }

    async fn run_code(&self, code: &str) -> Result<RawExecution> {
        self.runs.lock().unwrap().push(code.to_string());
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(RawExecution::default()))
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        tokio::task::yield_now().await;
        if self.failing_files.lock().unwrap().contains(path) {
            return Err(NotebookError::Staging(format!("{}: disk full", path)));
        }
        self.files
            .lock()
            .unwrap()
            .push((path.to_string(), content.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockProvider {
    pub created: AtomicUsize,
    pub fail_create: AtomicBool,
    pub fail_timeout: AtomicBool,
    pub create_delay: Option<Duration>,
    pub sessions: Mutex<Vec<Arc<MockSession>>>,
    pub credentials: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            create_delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn last_session(&self) -> Option<Arc<MockSession>> {
        self.sessions.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    async fn create_session(&self, credential: &str) -> Result<Arc<dyn RemoteSession>> {
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(NotebookError::SessionInit("service unavailable".to_string()));
        }
        self.credentials.lock().unwrap().push(credential.to_string());

        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let session = Arc::new(MockSession::new(&format!("mock-{}", n)));
        session
            .fail_timeout
            .store(self.fail_timeout.load(Ordering::SeqCst), Ordering::SeqCst);
        self.sessions.lock().unwrap().push(session.clone());
        Ok(session)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

/// Records every conversation and answers from a queue
#[derive(Default)]
pub struct MockGenerator {
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    responses: Mutex<VecDeque<Result<String>>>,
}

impl MockGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: Result<String>) {
        self.responses.lock().unwrap().push_back(response);
    }

    pub fn last_request(&self) -> Option<Vec<ChatMessage>> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String> {
        self.requests.lock().unwrap().push(messages);
        let next = self.responses.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(NotebookError::Generation("no response queued".to_string())))
    }
}

/// Execution whose main result carries `text`
pub fn execution_with_text(text: &str) -> RawExecution {
    RawExecution {
        results: vec![RawResult {
            text: Some(text.to_string()),
            is_main_result: true,
            ..Default::default()
        }],
        ..Default::default()
    }
}
