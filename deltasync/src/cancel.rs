//! Cooperative cancellation flag shared across a revision session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cancellation signal checked cooperatively by every worker in a
/// session.
///
/// Cloning shares the underlying flag; tripping it is sticky for the
/// lifetime of the session. Workers abort their own unit of work when
/// they observe it; nothing is ever terminated forcefully.
#[derive(Clone, Debug, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    /// Create a fresh, untripped flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
