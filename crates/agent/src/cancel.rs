//! Cooperative cancellation for agent turns.
//!
//! The SSE bridge holds a [`CancelGuard`]; when the client disconnects
//! the response stream is dropped, the guard fires, and the agent loop
//! observes the token at its next suspension point.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cancellation token checked by the agent loop.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// A guard that cancels this token when dropped.
    pub fn drop_guard(&self) -> CancelGuard {
        CancelGuard {
            token: self.clone(),
            disarmed: false,
        }
    }
}

pub struct CancelGuard {
    token: CancelToken,
    disarmed: bool,
}

impl CancelGuard {
    /// Let the token survive this guard (turn finished normally).
    pub fn disarm(mut self) {
        self.disarmed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.disarmed {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_lifecycle() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn guard_cancels_on_drop() {
        let token = CancelToken::new();
        {
            let _guard = token.drop_guard();
        }
        assert!(token.is_cancelled());
    }

    #[test]
    fn disarmed_guard_does_not_cancel() {
        let token = CancelToken::new();
        let guard = token.drop_guard();
        guard.disarm();
        assert!(!token.is_cancelled());
    }
}
