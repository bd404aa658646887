//! # Credentials
//!
//! Bearer credentials for the remote API.
//!
//! ## Refresh Coalescing
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  Concurrent 401s → one refresh                          │
//! │                                                                         │
//! │  caller A ──► lock ──► inner.refresh() ──► store outcome, gen += 1     │
//! │  caller B ──► lock (waits) ─────────────────────► gen moved? reuse     │
//! │  caller C ──► lock (waits) ─────────────────────► gen moved? reuse     │
//! │                                                                         │
//! │  A caller that saw generation N before waiting and finds N+1 after     │
//! │  acquiring the lock takes the stored outcome instead of refreshing.    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Auth Provider Trait
// =============================================================================

/// Source of the bearer credential.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The credential to send, or `None` when the user is signed out.
    async fn current_credential(&self) -> Option<String>;

    /// Obtains a fresh credential after the remote API rejected the current one.
    async fn refresh(&self) -> SyncResult<()>;
}

// =============================================================================
// Shared Refresh
// =============================================================================

/// Wraps a provider so that concurrent refreshes collapse into one call.
pub struct SharedRefresh {
    inner: Arc<dyn AuthProvider>,
    /// Outcome of the last completed refresh.
    gate: Mutex<Option<Result<(), String>>>,
    generation: AtomicU64,
}

impl SharedRefresh {
    pub fn new(inner: Arc<dyn AuthProvider>) -> Self {
        SharedRefresh {
            inner,
            gate: Mutex::new(None),
            generation: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl AuthProvider for SharedRefresh {
    async fn current_credential(&self) -> Option<String> {
        self.inner.current_credential().await
    }

    async fn refresh(&self) -> SyncResult<()> {
        let seen = self.generation.load(Ordering::Acquire);
        let mut last = self.gate.lock().await;

        if self.generation.load(Ordering::Acquire) != seen {
            debug!("Reusing credential refresh completed while waiting");
            return match last.as_ref() {
                Some(Ok(())) => Ok(()),
                Some(Err(message)) => Err(SyncError::RefreshFailed(message.clone())),
                None => Err(SyncError::Internal("refresh outcome missing".into())),
            };
        }

        let outcome = self.inner.refresh().await;
        match &outcome {
            Ok(()) => info!("Credential refreshed"),
            Err(e) => warn!(error = %e, "Credential refresh failed"),
        }

        *last = Some(outcome.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        self.generation.fetch_add(1, Ordering::Release);

        outcome
    }
}

// =============================================================================
// Static Token
// =============================================================================

/// A credential set by the host application. It cannot refresh itself, so a
/// rejected token pauses the queue until [`StaticTokenAuth::set_token`] is
/// called and the engine is told about it.
#[derive(Debug, Default)]
pub struct StaticTokenAuth {
    token: RwLock<Option<String>>,
}

impl StaticTokenAuth {
    pub fn new(token: Option<String>) -> Self {
        StaticTokenAuth {
            token: RwLock::new(token),
        }
    }

    /// Replaces the token. `None` signs out.
    pub async fn set_token(&self, token: Option<String>) {
        *self.token.write().await = token;
    }
}

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn current_credential(&self) -> Option<String> {
        self.token.read().await.clone()
    }

    async fn refresh(&self) -> SyncResult<()> {
        Err(SyncError::RefreshFailed(
            "static token cannot be refreshed".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct SlowRefresh {
        calls: AtomicUsize,
        succeed: bool,
    }

    #[async_trait]
    impl AuthProvider for SlowRefresh {
        async fn current_credential(&self) -> Option<String> {
            Some("token".into())
        }

        async fn refresh(&self) -> SyncResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.succeed {
                Ok(())
            } else {
                Err(SyncError::RefreshFailed("revoked".into()))
            }
        }
    }

    fn shared(succeed: bool) -> (Arc<SlowRefresh>, SharedRefresh) {
        let inner = Arc::new(SlowRefresh {
            calls: AtomicUsize::new(0),
            succeed,
        });
        let shared = SharedRefresh::new(inner.clone());
        (inner, shared)
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_coalesce() {
        let (inner, shared) = shared(true);

        let (a, b, c) = tokio::join!(shared.refresh(), shared.refresh(), shared.refresh());

        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_coalesced_failure_is_shared() {
        let (inner, shared) = shared(false);

        let (a, b) = tokio::join!(shared.refresh(), shared.refresh());

        assert!(matches!(a, Err(SyncError::RefreshFailed(_))));
        assert!(matches!(b, Err(SyncError::RefreshFailed(_))));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sequential_refreshes_each_run() {
        let (inner, shared) = shared(true);

        shared.refresh().await.unwrap();
        shared.refresh().await.unwrap();

        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_static_token() {
        let auth = StaticTokenAuth::new(None);
        assert_eq!(auth.current_credential().await, None);

        auth.set_token(Some("abc".into())).await;
        assert_eq!(auth.current_credential().await.as_deref(), Some("abc"));
        assert!(auth.refresh().await.is_err());
    }
}
