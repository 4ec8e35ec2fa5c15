//! Cooperative cancellation for long-running feed operations.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};

/// Clonable handle over a shared cancellation flag.
///
/// Consumers only observe the flag; signalling goes through the
/// [`CancellationController`] that issued the token.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true once cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Process-wide, reusable source of cancellation signals.
///
/// Holds exactly one active token at a time. `cancel` signals the current
/// token (idempotently); `reset` replaces it with a fresh, uncancelled one
/// while prior holders of the old token stay cancelled. All three
/// operations are safe to call concurrently from multiple threads.
#[derive(Debug, Default)]
pub struct CancellationController {
    current: RwLock<CancellationToken>,
}

impl CancellationController {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current token. Stable until the next `reset`.
    pub fn token(&self) -> CancellationToken {
        self.current.read().expect("cancellation lock poisoned").clone()
    }

    /// Signals the current token. Idempotent if already cancelled.
    pub fn cancel(&self) {
        self.current.read().expect("cancellation lock poisoned").cancel();
    }

    /// Replaces the current token with a fresh, uncancelled one.
    ///
    /// Operations still holding the old token remain cancelled; a reset
    /// never retroactively un-cancels them.
    pub fn reset(&self) -> CancellationToken {
        let fresh = CancellationToken::new();
        let mut current = self.current.write().expect("cancellation lock poisoned");
        *current = fresh.clone();
        fresh
    }
}
