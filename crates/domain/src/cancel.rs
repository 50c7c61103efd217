use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Why a run (or a single provider call) was canceled. Set once; never
/// reset — cancellation is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// Explicit user action.
    Canceled,
    /// Wall-time cap or idle timeout elapsed.
    TimedOut,
    /// The client disconnected.
    Disconnected,
}

/// A cheap, clonable cancellation flag shared between the turn controller
/// and whatever is currently suspended on its behalf (a provider stream
/// read, a tool dispatch, a backoff sleep).
#[derive(Debug, Clone)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    reason: Arc<parking_lot::Mutex<Option<CancelReason>>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            reason: Arc::new(parking_lot::Mutex::new(None)),
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn reason(&self) -> Option<CancelReason> {
        *self.reason.lock()
    }

    /// Cancel with `reason`. A reason set by an earlier call is never
    /// overwritten — the first cancellation wins.
    pub fn cancel(&self, reason: CancelReason) {
        let mut guard = self.reason.lock();
        if guard.is_none() {
            *guard = Some(reason);
        }
        self.flag.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_canceled() {
        let token = CancelToken::new();
        assert!(!token.is_canceled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn cancel_sets_flag_and_reason() {
        let token = CancelToken::new();
        token.cancel(CancelReason::TimedOut);
        assert!(token.is_canceled());
        assert_eq!(token.reason(), Some(CancelReason::TimedOut));
    }

    #[test]
    fn first_cancel_reason_wins() {
        let token = CancelToken::new();
        token.cancel(CancelReason::Canceled);
        token.cancel(CancelReason::TimedOut);
        assert_eq!(token.reason(), Some(CancelReason::Canceled));
    }

    #[test]
    fn clone_shares_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel(CancelReason::Disconnected);
        assert!(token.is_canceled());
    }
}
