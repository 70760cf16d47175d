//! Detection of session-invalidating responses.
//!
//! A 401/403 on an ordinary call means the session is gone. The gate invokes
//! the registered logout handler at most once per invalidation episode. The
//! session is marked invalid on the first failure; the handler latch trips
//! only when a handler actually ran, so a handler registered mid-episode
//! still fires on the next failure. Both stay set until the authentication
//! feature reports a successful re-login through [`AuthGate::reset`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use http::StatusCode;

use crate::classify::{json_message, status_text};
use crate::error::{ApiError, ClientError};

struct LogoutHandler(Box<dyn Fn() + Send + Sync>);

#[derive(Default)]
pub struct AuthGate {
    handler: ArcSwapOption<LogoutHandler>,
    invalidated: AtomicBool,
    notified: AtomicBool,
}

impl std::fmt::Debug for AuthGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGate")
            .field("handler_registered", &self.handler.load().is_some())
            .field("invalidated", &self.invalidated.load(Ordering::Acquire))
            .field("notified", &self.notified.load(Ordering::Acquire))
            .finish()
    }
}

impl AuthGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the logout handler.
    pub fn set_handler<F>(&self, handler: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.handler.store(Some(Arc::new(LogoutHandler(Box::new(handler)))));
    }

    pub fn clear_handler(&self) {
        self.handler.store(None);
    }

    /// Re-arm the latch after a successful re-authentication.
    pub fn reset(&self) {
        self.notified.store(false, Ordering::Release);
        if self.invalidated.swap(false, Ordering::AcqRel) {
            tracing::debug!("session restored; logout latch re-armed");
        }
    }

    #[must_use]
    pub fn is_session_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Returns the authentication error for an auth-failure response, firing
    /// the logout side effect, or `None` when the response is not one (or the
    /// caller opted out of auth handling).
    pub(crate) fn inspect(
        &self,
        status: StatusCode,
        body: &[u8],
        skip_auth_check: bool,
    ) -> Option<ClientError> {
        if skip_auth_check || !is_auth_failure(status) {
            return None;
        }

        let message = json_message(&String::from_utf8_lossy(body)).unwrap_or_else(|| status_text(status));
        self.invalidate_session(status);
        Some(ClientError::Authentication(ApiError::new(message, status)))
    }

    fn invalidate_session(&self, status: StatusCode) {
        let first = !self.invalidated.swap(true, Ordering::AcqRel);
        let Some(handler) = self.handler.load_full() else {
            if first {
                tracing::warn!(status = status.as_u16(), "session invalidated but no logout handler is registered");
            } else {
                tracing::debug!(status = status.as_u16(), "session still invalidated; no logout handler is registered");
            }
            return;
        };
        if self.notified.swap(true, Ordering::AcqRel) {
            tracing::debug!(status = status.as_u16(), "session already invalidated; logout handler not re-invoked");
            return;
        }
        tracing::info!(status = status.as_u16(), "session invalidated; invoking logout handler");
        (handler.0)();
    }
}

fn is_auth_failure(status: StatusCode) -> bool {
    status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tracing_test::traced_test;

    fn counting_gate() -> (AuthGate, Arc<AtomicUsize>) {
        let gate = AuthGate::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        gate.set_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (gate, calls)
    }

    #[test]
    fn test_unauthorized_invokes_handler_once() {
        let (gate, calls) = counting_gate();
        let err = gate
            .inspect(StatusCode::UNAUTHORIZED, br#"{"message":"Session expired"}"#, false)
            .unwrap();
        assert!(err.is_authentication());
        assert_eq!(err.api_error().unwrap().message, "Session expired");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_skip_auth_check_has_no_side_effect() {
        let (gate, calls) = counting_gate();
        assert!(gate.inspect(StatusCode::FORBIDDEN, b"", true).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!gate.is_session_invalidated());
    }

    #[test]
    fn test_non_auth_status_passes_through() {
        let (gate, calls) = counting_gate();
        assert!(gate.inspect(StatusCode::NOT_FOUND, b"", false).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_latch_fires_once_per_episode() {
        let (gate, calls) = counting_gate();
        for _ in 0..3 {
            let err = gate.inspect(StatusCode::FORBIDDEN, b"", false).unwrap();
            assert_eq!(err.api_error().unwrap().message, "Forbidden");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.reset();
        gate.inspect(StatusCode::UNAUTHORIZED, b"", false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_replaced_handler_is_used() {
        let (gate, first) = counting_gate();
        let second = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&second);
        gate.set_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        gate.inspect(StatusCode::UNAUTHORIZED, b"", false).unwrap();
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_missing_handler_is_logged() {
        let gate = AuthGate::new();
        let err = gate.inspect(StatusCode::UNAUTHORIZED, b"", false).unwrap();
        assert!(err.is_authentication());
        assert!(logs_contain("no logout handler is registered"));
    }

    #[test]
    fn test_handler_registered_mid_episode_still_fires() {
        let gate = AuthGate::new();
        gate.inspect(StatusCode::UNAUTHORIZED, b"", false).unwrap();
        assert!(gate.is_session_invalidated());

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        gate.set_handler(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        gate.inspect(StatusCode::UNAUTHORIZED, b"", false).unwrap();
        gate.inspect(StatusCode::FORBIDDEN, b"", false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        gate.reset();
        assert!(!gate.is_session_invalidated());
        gate.inspect(StatusCode::UNAUTHORIZED, b"", false).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
