//! Completion tokens linking `io_uring` CQEs back to suspended fibers.

use parking_lot::Mutex;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

/// Distinguishes fiber completions from typed operation pointers in CQE
/// `user_data`. ASCII `"FIBERCOM"`.
pub const FIBER_COMPLETION_MAGIC: u64 = 0x4649424552434F4D;

#[derive(Debug, Default)]
struct TokenState {
    result: Option<i32>,
    waker: Option<Waker>,
}

/// A completion slot for one in-flight operation. The submitting fiber holds
/// one reference; a second is leaked into the SQE `user_data` and reclaimed
/// by the completion handler, so the token outlives the fiber even if it is
/// dropped mid-flight.
#[derive(Debug)]
pub struct CompletionToken {
    magic: u64,
    state: Mutex<TokenState>,
}

impl Default for CompletionToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionToken {
    /// Creates a fresh, incomplete token.
    pub fn new() -> Self {
        Self { magic: FIBER_COMPLETION_MAGIC, state: Mutex::new(TokenState::default()) }
    }

    /// Converts a token reference into a `user_data` value for an SQE,
    /// leaking one strong count to the kernel side.
    pub fn into_user_data(token: &Arc<Self>) -> u64 {
        Arc::into_raw(Arc::clone(token)) as u64
    }

    /// Reclaims the token from CQE `user_data` and signals `result` on it,
    /// waking the parked fiber. Returns `false` (and leaves the pointer
    /// untouched) if the user_data does not carry the fiber magic.
    ///
    /// # Safety
    /// `user_data` must be a value produced by [Self::into_user_data] that
    /// has not been completed yet.
    pub unsafe fn complete(user_data: u64, result: i32) -> bool {
        let ptr = user_data as *const Self;
        if ptr.is_null() || (*ptr).magic != FIBER_COMPLETION_MAGIC {
            return false;
        }
        let token = Arc::from_raw(ptr);
        let waker = {
            let mut state = token.state.lock();
            state.result = Some(result);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    /// The operation result, once completed.
    pub fn result(&self) -> Option<i32> {
        self.state.lock().result
    }

    /// Returns a future that resolves when the token is signalled.
    pub fn wait(self: &Arc<Self>) -> TokenFuture {
        TokenFuture { token: Arc::clone(self) }
    }
}

/// Future side of a [CompletionToken]; resolves to the CQE result.
#[derive(Debug)]
pub struct TokenFuture {
    token: Arc<CompletionToken>,
}

impl Future for TokenFuture {
    type Output = i32;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.token.state.lock();
        if let Some(result) = state.result {
            return Poll::Ready(result);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_signals_result() {
        let token = Arc::new(CompletionToken::new());
        let user_data = CompletionToken::into_user_data(&token);
        assert!(unsafe { CompletionToken::complete(user_data, 4096) });
        assert_eq!(token.result(), Some(4096));
    }

    #[test]
    fn test_magic_mismatch_rejected() {
        let bogus = Box::leak(Box::new(0u64)) as *const u64 as u64;
        assert!(!unsafe { CompletionToken::complete(bogus, 0) });
    }
}
