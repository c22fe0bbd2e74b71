use crate::{
    auth::CredentialSource,
    config::{ExpiryPolicy, SandboxSettings},
    engine::{RemoteSession, SandboxProvider},
    errors::{NotebookError, Result},
};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// The live session together with its local creation time
#[derive(Clone)]
pub struct SessionHandle {
    pub session: Arc<dyn RemoteSession>,
    pub created_at: Instant,
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.session.id())
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Snapshot of the session for display
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionStatus {
    pub session_id: Option<String>,
    pub age_ms: u64,
    pub remaining_ms: u64,
    pub expired: bool,
}

/// Owns at most one remote session for the lifetime of the manager.
///
/// The session is created lazily by the first caller of
/// [`SessionManager::ensure_session`] and reused afterwards. Creation is
/// serialized: concurrent first callers wait for a single creation and all
/// receive the same handle.
pub struct SessionManager {
    provider: Arc<dyn SandboxProvider>,
    credential: CredentialSource,
    ttl: Duration,
    expiry_policy: ExpiryPolicy,
    current: RwLock<Option<SessionHandle>>,
    init_lock: Mutex<()>,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        credential: CredentialSource,
        settings: &SandboxSettings,
    ) -> Self {
        Self {
            provider,
            credential,
            ttl: settings.session_ttl(),
            expiry_policy: settings.expiry_policy,
            current: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Return the live session, creating it on first use
    pub async fn ensure_session(&self) -> Result<SessionHandle> {
        if let Some(handle) = self.current() {
            return self.check_expiry(handle);
        }

        let _guard = self.init_lock.lock().await;
        // Another caller may have finished creating while we waited
        if let Some(handle) = self.current() {
            return self.check_expiry(handle);
        }

        let credential = self.credential.resolve()?;
        let session = self
            .provider
            .create_session(&credential)
            .await
            .map_err(into_session_init)?;
        // The lifetime already went out with the create request, so a rejected
        // update still leaves a usable session
        if let Err(e) = session.set_timeout(self.ttl).await {
            warn!(
                "[SESSION] Failed to set lifetime on session {}: {}",
                session.id(),
                e
            );
        }

        let handle = SessionHandle {
            session,
            created_at: Instant::now(),
        };
        info!(
            "[SESSION] Created {} session {} (ttl {}s, {})",
            self.provider.name(),
            handle.session.id(),
            self.ttl.as_secs(),
            self.expiry_policy.description()
        );

        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Some(handle.clone());
        Ok(handle)
    }

    /// The live session, if one was created
    pub fn current(&self) -> Option<SessionHandle> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Advisory lifetime left: `max(0, ttl - age)`, zero without a session
    pub fn time_remaining(&self) -> Duration {
        match self.current() {
            Some(handle) => self.ttl.saturating_sub(handle.created_at.elapsed()),
            None => Duration::ZERO,
        }
    }

    pub fn status(&self) -> SessionStatus {
        match self.current() {
            Some(handle) => {
                let age = handle.created_at.elapsed();
                let remaining = self.ttl.saturating_sub(age);
                SessionStatus {
                    session_id: Some(handle.session.id().to_string()),
                    age_ms: age.as_millis() as u64,
                    remaining_ms: remaining.as_millis() as u64,
                    expired: remaining.is_zero(),
                }
            }
            None => SessionStatus {
                session_id: None,
                age_ms: 0,
                remaining_ms: 0,
                expired: false,
            },
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn check_expiry(&self, handle: SessionHandle) -> Result<SessionHandle> {
        if self.expiry_policy == ExpiryPolicy::Enforced && handle.created_at.elapsed() >= self.ttl {
            warn!("[SESSION] Session {} has expired", handle.session.id());
            return Err(NotebookError::SessionExpired);
        }
        Ok(handle)
    }
}

fn into_session_init(e: NotebookError) -> NotebookError {
    match e {
        NotebookError::SessionInit(_) => e,
        other => NotebookError::SessionInit(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;
    use std::sync::atomic::Ordering;
    use tokio_test::{assert_err, assert_ok};

    const HOUR: Duration = Duration::from_secs(3600);

    fn manager(provider: Arc<MockProvider>, policy: ExpiryPolicy) -> SessionManager {
        let settings = SandboxSettings {
            expiry_policy: policy,
            ..Default::default()
        };
        SessionManager::new(
            provider,
            CredentialSource::Static("e2b_test".to_string()),
            &settings,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_reused() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider.clone(), ExpiryPolicy::Advisory);

        let first = manager.ensure_session().await.unwrap();
        tokio::time::advance(Duration::from_secs(5)).await;
        let second = manager.ensure_session().await.unwrap();

        assert_eq!(first.session.id(), second.session.id());
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
        assert_eq!(provider.credentials.lock().unwrap().as_slice(), ["e2b_test"]);

        let session = provider.last_session().unwrap();
        assert_eq!(*session.timeout.lock().unwrap(), Some(HOUR));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_remaining() {
        let provider = Arc::new(MockProvider::new());
        let manager = manager(provider, ExpiryPolicy::Advisory);
        assert_eq!(manager.time_remaining(), Duration::ZERO);
        assert_eq!(manager.status().session_id, None);

        manager.ensure_session().await.unwrap();
        assert_eq!(manager.time_remaining(), HOUR);

        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(manager.time_remaining(), Duration::from_secs(3000));

        tokio::time::advance(HOUR).await;
        assert_eq!(manager.time_remaining(), Duration::ZERO);
        assert!(manager.status().expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_calls_share_one_creation() {
        let provider = Arc::new(MockProvider::with_delay(Duration::from_millis(50)));
        let manager = manager(provider.clone(), ExpiryPolicy::Advisory);

        let (a, b, c) = tokio::join!(
            manager.ensure_session(),
            manager.ensure_session(),
            manager.ensure_session()
        );

        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
        let id = a.unwrap().session.id().to_string();
        assert_eq!(b.unwrap().session.id(), id);
        assert_eq!(c.unwrap().session.id(), id);
    }

    #[tokio::test]
    async fn test_failed_creation_is_retried() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_create.store(true, Ordering::SeqCst);
        let manager = manager(provider.clone(), ExpiryPolicy::Advisory);

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, NotebookError::SessionInit(_)));
        assert!(manager.current().is_none());
        assert_eq!(manager.time_remaining(), Duration::ZERO);

        provider.fail_create.store(false, Ordering::SeqCst);
        assert_ok!(manager.ensure_session().await);
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_timeout_keeps_session() {
        let provider = Arc::new(MockProvider::new());
        provider.fail_timeout.store(true, Ordering::SeqCst);
        let manager = manager(provider.clone(), ExpiryPolicy::Advisory);

        let first = assert_ok!(manager.ensure_session().await);
        assert!(manager.current().is_some());

        let second = assert_ok!(manager.ensure_session().await);
        assert_eq!(first.session.id(), second.session.id());
        assert_eq!(provider.created.load(Ordering::SeqCst), 1);
        assert_eq!(*provider.last_session().unwrap().timeout.lock().unwrap(), None);
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let provider = Arc::new(MockProvider::new());
        let manager = SessionManager::new(
            provider.clone(),
            CredentialSource::Static(String::new()),
            &SandboxSettings::default(),
        );

        let err = manager.ensure_session().await.unwrap_err();
        assert!(matches!(err, NotebookError::SessionInit(_)));
        assert_eq!(provider.created.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_policies() {
        let advisory = manager(Arc::new(MockProvider::new()), ExpiryPolicy::Advisory);
        let enforced = manager(Arc::new(MockProvider::new()), ExpiryPolicy::Enforced);
        advisory.ensure_session().await.unwrap();
        enforced.ensure_session().await.unwrap();

        tokio::time::advance(HOUR + Duration::from_secs(1)).await;

        assert_ok!(advisory.ensure_session().await);
        let err = assert_err!(enforced.ensure_session().await);
        assert!(matches!(err, NotebookError::SessionExpired));
    }
}
