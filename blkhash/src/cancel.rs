//! Cooperative cancellation (spec.md §5, §9: "a single shared atomic
//! cancellation flag observable by the driver and workers").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A cheaply-cloneable flag checked between extents and on queue
/// operations. Setting it does not itself stop anything; callers must
/// check [`CancellationToken::is_cancelled`] at their own suspension
/// points and unwind with [`crate::Error::Cancelled`].
#[derive(Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Convenience for drivers: return `Err(Cancelled)` if the flag is set.
    pub fn check(&self) -> crate::Result<()> {
        if self.is_cancelled() {
            Err(crate::Error::Cancelled)
        } else {
            Ok(())
        }
    }
}
