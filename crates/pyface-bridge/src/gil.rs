//! Runtime Lifecycle and Global Execution Lock
//!
//! The foreign runtime is a single process-wide instance. It is
//! initialised once before any bridge call, torn down once at process
//! exit, and every call into it happens while holding one global lock.
//!
//! ## Pieces
//!
//! - **RuntimeLifecycle**: `Uninitialized -> Initialized -> Finalized`
//! - **GilGuard**: RAII guard for the global execution lock, re-entrant
//!   on the owning thread
//! - **GilStats**: acquisition counters for debugging
//!
//! The lock is the bridge's own; a backend whose interpreter has a lock
//! of its own (CPython's GIL) takes that one inside this one.

use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use tracing::{debug, info};

use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// Lifecycle
// ============================================================================

/// Lifecycle state of a foreign runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Not yet initialised
    Uninitialized,
    /// Running; bridge calls are allowed
    Initialized,
    /// Torn down; nothing may run any more
    Finalized,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Uninitialized => write!(f, "Uninitialized"),
            LifecycleState::Initialized => write!(f, "Initialized"),
            LifecycleState::Finalized => write!(f, "Finalized"),
        }
    }
}

/// Init-once / teardown-once state for a foreign runtime.
///
/// The process-wide instance sits behind [`initialize_runtime`] and
/// [`finalize_runtime`]; separate instances exist so backends and tests
/// can exercise the contract in isolation.
#[derive(Debug)]
pub struct RuntimeLifecycle {
    state: Mutex<LifecycleState>,
}

impl RuntimeLifecycle {
    /// Create a lifecycle in the `Uninitialized` state
    pub const fn new() -> Self {
        Self {
            state: parking_lot::const_mutex(LifecycleState::Uninitialized),
        }
    }

    /// Current state
    pub fn state(&self) -> LifecycleState {
        *self.state.lock()
    }

    /// Run `init` if and only if this is the first initialisation.
    ///
    /// Returns `true` when `init` ran. A failing `init` leaves the
    /// runtime uninitialised so the caller may try again.
    pub fn initialize<F>(&self, init: F) -> BridgeResult<bool>
    where
        F: FnOnce() -> BridgeResult<()>,
    {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Uninitialized => {
                init()?;
                *state = LifecycleState::Initialized;
                info!("foreign runtime initialized");
                Ok(true)
            }
            LifecycleState::Initialized => Ok(false),
            LifecycleState::Finalized => Err(BridgeError::RuntimeFinalized),
        }
    }

    /// Run `teardown` exactly once.
    ///
    /// Returns `true` when `teardown` ran; a runtime that never started
    /// or is already finalised is left alone.
    pub fn finalize<F>(&self, teardown: F) -> BridgeResult<bool>
    where
        F: FnOnce() -> BridgeResult<()>,
    {
        let mut state = self.state.lock();
        match *state {
            LifecycleState::Initialized => {
                // Marked finalized even if teardown fails: a half torn down
                // interpreter must not be re-entered.
                *state = LifecycleState::Finalized;
                info!("foreign runtime finalized");
                teardown().map(|_| true)
            }
            LifecycleState::Uninitialized | LifecycleState::Finalized => Ok(false),
        }
    }

    /// Fail unless the runtime is running
    pub fn ensure_running(&self) -> BridgeResult<()> {
        match self.state() {
            LifecycleState::Initialized => Ok(()),
            LifecycleState::Uninitialized => Err(BridgeError::RuntimeNotInitialized),
            LifecycleState::Finalized => Err(BridgeError::RuntimeFinalized),
        }
    }
}

impl Default for RuntimeLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

static LIFECYCLE: RuntimeLifecycle = RuntimeLifecycle::new();

/// Initialise the process-wide runtime with no backend-specific work.
pub fn initialize_runtime() -> BridgeResult<bool> {
    LIFECYCLE.initialize(|| Ok(()))
}

/// Initialise the process-wide runtime, running `init` the first time only.
pub fn initialize_runtime_with<F>(init: F) -> BridgeResult<bool>
where
    F: FnOnce() -> BridgeResult<()>,
{
    LIFECYCLE.initialize(init)
}

/// Tear the process-wide runtime down. Takes the execution lock so no
/// invocation is in flight while it happens.
pub fn finalize_runtime() -> BridgeResult<bool> {
    let _lock = RUNTIME_LOCK.lock();
    LIFECYCLE.finalize(|| Ok(()))
}

/// State of the process-wide runtime
pub fn runtime_state() -> LifecycleState {
    LIFECYCLE.state()
}

/// Check if the process-wide runtime is running
pub fn is_runtime_initialized() -> bool {
    LIFECYCLE.state() == LifecycleState::Initialized
}

// ============================================================================
// Lock State Tracking
// ============================================================================

/// The global execution lock
static RUNTIME_LOCK: ReentrantMutex<()> = parking_lot::const_reentrant_mutex(());

/// Counter for lock acquisitions (for debugging)
static GIL_ACQUIRE_COUNT: AtomicU64 = AtomicU64::new(0);

thread_local! {
    /// Thread-local lock hold count
    static GIL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// State of the execution lock for the current thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GilState {
    /// Lock is not held by this thread
    NotHeld,
    /// Lock is held by this thread
    Held,
}

impl GilState {
    /// Get the current lock state for this thread
    pub fn current() -> Self {
        if Self::depth() > 0 {
            GilState::Held
        } else {
            GilState::NotHeld
        }
    }

    /// Check if the lock is currently held by this thread
    pub fn is_held() -> bool {
        Self::depth() > 0
    }

    /// Get the current nesting depth
    pub fn depth() -> usize {
        GIL_DEPTH.with(|depth| depth.get())
    }
}

impl fmt::Display for GilState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GilState::NotHeld => write!(f, "NotHeld"),
            GilState::Held => write!(f, "Held"),
        }
    }
}

// ============================================================================
// GilGuard - RAII Lock Acquisition
// ============================================================================

/// RAII guard for the global execution lock.
///
/// Blocks until the lock is free, releases when dropped. A thread that
/// already holds the lock re-enters without blocking.
///
/// # Example
///
/// ```ignore
/// let _gil = GilGuard::acquire()?;
/// // encode, invoke, decode
/// // lock is released when _gil is dropped
/// ```
pub struct GilGuard {
    guard: ReentrantMutexGuard<'static, ()>,
    nested: bool,
}

impl GilGuard {
    /// Acquire the lock on the process-wide runtime.
    pub fn acquire() -> BridgeResult<Self> {
        LIFECYCLE.ensure_running()?;

        let nested = GilState::is_held();
        let guard = RUNTIME_LOCK.lock();

        let depth = GIL_DEPTH.with(|depth| {
            depth.set(depth.get() + 1);
            depth.get()
        });
        GIL_ACQUIRE_COUNT.fetch_add(1, Ordering::Relaxed);
        debug!(depth, "execution lock acquired");

        Ok(Self { guard, nested })
    }

    /// Get the current lock state
    pub fn state(&self) -> GilState {
        GilState::current()
    }

    /// Check if this is a nested acquisition
    pub fn is_nested(&self) -> bool {
        self.nested
    }

    /// Temporarily release this level of the lock for native work.
    ///
    /// Outer guards on the same thread keep the lock held.
    pub fn allow_threads<F, T>(&mut self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        GIL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
        let result = ReentrantMutexGuard::unlocked(&mut self.guard, f);
        GIL_DEPTH.with(|depth| depth.set(depth.get() + 1));
        result
    }
}

impl fmt::Debug for GilGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GilGuard")
            .field("nested", &self.nested)
            .finish()
    }
}

impl Drop for GilGuard {
    fn drop(&mut self) {
        GIL_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

// ============================================================================
// Debug Utilities
// ============================================================================

/// Get statistics about lock usage (for debugging).
pub fn gil_stats() -> GilStats {
    GilStats {
        total_acquires: GIL_ACQUIRE_COUNT.load(Ordering::Relaxed),
        current_depth: GilState::depth(),
        is_held: GilState::is_held(),
    }
}

/// Lock usage statistics.
#[derive(Debug, Clone)]
pub struct GilStats {
    /// Total number of lock acquisitions
    pub total_acquires: u64,
    /// Current nesting depth on this thread
    pub current_depth: usize,
    /// Whether this thread holds the lock
    pub is_held: bool,
}

impl fmt::Display for GilStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lock stats: acquires={}, depth={}, held={}",
            self.total_acquires, self.current_depth, self.is_held
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lifecycle_init_once() {
        let lifecycle = RuntimeLifecycle::new();
        let runs = AtomicUsize::new(0);

        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert!(lifecycle
            .initialize(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap());
        assert!(!lifecycle
            .initialize(|| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(lifecycle.state(), LifecycleState::Initialized);
        assert!(lifecycle.ensure_running().is_ok());
    }

    #[test]
    fn test_lifecycle_teardown_once() {
        let lifecycle = RuntimeLifecycle::new();
        assert!(!lifecycle.finalize(|| Ok(())).unwrap());

        lifecycle.initialize(|| Ok(())).unwrap();
        assert!(lifecycle.finalize(|| Ok(())).unwrap());
        assert!(!lifecycle.finalize(|| Ok(())).unwrap());

        assert_eq!(lifecycle.state(), LifecycleState::Finalized);
        assert_eq!(
            lifecycle.ensure_running(),
            Err(BridgeError::RuntimeFinalized)
        );
        assert_eq!(
            lifecycle.initialize(|| Ok(())),
            Err(BridgeError::RuntimeFinalized)
        );
    }

    #[test]
    fn test_lifecycle_failed_init_can_retry() {
        let lifecycle = RuntimeLifecycle::new();
        let result = lifecycle.initialize(|| Err(BridgeError::config("no interpreter")));
        assert!(result.is_err());
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
        assert_eq!(
            lifecycle.ensure_running(),
            Err(BridgeError::RuntimeNotInitialized)
        );

        assert!(lifecycle.initialize(|| Ok(())).unwrap());
    }

    #[test]
    fn test_gil_guard_basic() {
        initialize_runtime().unwrap();

        assert!(!GilState::is_held());
        {
            let gil = GilGuard::acquire().unwrap();
            assert!(!gil.is_nested());
            assert_eq!(gil.state(), GilState::Held);
            assert_eq!(GilState::depth(), 1);
        }
        assert!(!GilState::is_held());
        assert_eq!(GilState::depth(), 0);
    }

    #[test]
    fn test_gil_guard_nested() {
        initialize_runtime().unwrap();

        let gil1 = GilGuard::acquire().unwrap();
        assert!(!gil1.is_nested());
        {
            let gil2 = GilGuard::acquire().unwrap();
            assert!(gil2.is_nested());
            assert_eq!(GilState::depth(), 2);
        }
        assert_eq!(GilState::depth(), 1);
        drop(gil1);
        assert_eq!(GilState::depth(), 0);
    }

    #[test]
    fn test_allow_threads_restores_depth() {
        initialize_runtime().unwrap();

        let mut gil = GilGuard::acquire().unwrap();
        let inner_depth = gil.allow_threads(GilState::depth);
        assert_eq!(inner_depth, 0);
        assert_eq!(GilState::depth(), 1);
    }

    #[test]
    fn test_lock_serializes_threads() {
        initialize_runtime().unwrap();

        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..50 {
                        let _gil = GilGuard::acquire().unwrap();
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_gil_stats() {
        initialize_runtime().unwrap();

        let before = gil_stats();
        {
            let _gil = GilGuard::acquire().unwrap();
            let held = gil_stats();
            assert!(held.is_held);
            assert_eq!(held.current_depth, 1);
            assert!(held.total_acquires > before.total_acquires);
        }
        let after = gil_stats();
        assert!(!after.is_held);
        assert!(after.to_string().starts_with("lock stats:"));
    }
}
