//! Hosted sessions as scoped resources.
//!
//! Some model services group related turns under a server-side session
//! (a "thread"). Such a session must be deleted on every exit path of the
//! work that used it, or it lingers on the service holding document content.
//!
//! * [`SessionGuard::acquire`] creates the session.
//! * [`SessionGuard::release`] deletes it and reports the outcome.
//! * Dropping an unreleased guard (panic, cancelled future, early return)
//!   spawns the delete on the current tokio runtime. This is best-effort: a
//!   runtime that shuts down right after the drop cancels the delete.
//! * [`with_session`] wraps a unit of work in a guard and awaits the delete
//!   whatever the work returns. Prefer it (or an explicit
//!   [`SessionGuard::release`] on every path) over relying on `Drop`.
//!
//! The extraction pipeline only ever *borrows* a [`SessionHandle`] for the
//! duration of one call; it never owns or outlives the session.

use crate::error::ExtractError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Opaque identifier of a hosted session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A service able to create and delete hosted sessions.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn create_session(&self) -> Result<SessionHandle, ExtractError>;

    /// Delete a session. Deleting an already-deleted session should succeed.
    async fn delete_session(&self, session: &SessionHandle) -> Result<(), ExtractError>;
}

/// Owns one hosted session until it is released or dropped.
pub struct SessionGuard {
    provider: Arc<dyn SessionProvider>,
    handle: SessionHandle,
    released: bool,
}

impl SessionGuard {
    /// Create a session on `provider`.
    pub async fn acquire(provider: Arc<dyn SessionProvider>) -> Result<Self, ExtractError> {
        let handle = provider.create_session().await?;
        debug!("Acquired {} session {}", provider.name(), handle);
        Ok(Self {
            provider,
            handle,
            released: false,
        })
    }

    pub fn handle(&self) -> &SessionHandle {
        &self.handle
    }

    /// Delete the session now.
    ///
    /// If this future is itself dropped before the delete finishes, the
    /// guard's `Drop` spawns the delete again, best-effort.
    pub async fn release(mut self) -> Result<(), ExtractError> {
        let result = self.provider.delete_session(&self.handle).await;
        self.released = true;
        match &result {
            Ok(()) => debug!("Released {} session {}", self.provider.name(), self.handle),
            Err(e) => warn!(
                "Failed to delete {} session {}: {}",
                self.provider.name(),
                self.handle,
                e
            ),
        }
        result
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let provider = Arc::clone(&self.provider);
        let handle = self.handle.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!("Session {} dropped unreleased; scheduling delete", handle);
                rt.spawn(async move {
                    if let Err(e) = provider.delete_session(&handle).await {
                        warn!("Deferred delete of session {} failed: {}", handle, e);
                    }
                });
            }
            Err(_) => warn!(
                "Session {} on {} leaked: dropped outside a tokio runtime",
                handle,
                provider.name()
            ),
        }
    }
}

/// Run `work` inside a freshly acquired session, then delete the session.
///
/// The delete is awaited before returning, whether `work` produces a success
/// or a failure value, so it completes even if the runtime shuts down right
/// after. A panic or cancellation falls back to the guard's best-effort
/// `Drop`. A failed delete is logged and does not replace the work's output.
///
/// # Errors
/// Only session creation failures are returned.
pub async fn with_session<F, Fut, T>(
    provider: Arc<dyn SessionProvider>,
    work: F,
) -> Result<T, ExtractError>
where
    F: FnOnce(SessionHandle) -> Fut,
    Fut: Future<Output = T>,
{
    let guard = SessionGuard::acquire(provider).await?;
    let output = work(guard.handle().clone()).await;
    let _ = guard.release().await;
    Ok(output)
}
