//! Cooperative cancellation
//!
//! Long-running operations (fetches, scans, manager passes) take a
//! [`CancelToken`] and call [`CancelToken::checkpoint`] at blocking-operation
//! boundaries. Cancelling the token makes every checkpoint return an error,
//! unwinding the operation promptly without poisoning shared state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Error returned from a checkpoint after the token was cancelled
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("operation cancelled")]
pub struct Cancelled;

/// Cloneable cancellation flag
///
/// Clones share the flag; cancelling any clone cancels them all.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_propagates_to_clones() {
        let t = CancelToken::new();
        let u = t.clone();
        assert!(t.checkpoint().is_ok());
        u.cancel();
        assert!(t.is_cancelled());
        assert!(t.checkpoint().is_err());
    }
}
