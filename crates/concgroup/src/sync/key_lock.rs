//! Exclusive lock guarding one group key
//!
//! A [`KeyLock`] never parks a thread. A unit that finds its key busy leaves
//! a continuation in the lock's FIFO wait queue, and the unit releasing the
//! key hands ownership straight to the first waiter. A backlog on one key
//! therefore costs one queue entry per unit, not one blocked thread.

use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Unique identifier for a KeyLock
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyLockId(u64);

static NEXT_KEY_LOCK_ID: AtomicU64 = AtomicU64::new(1);

impl KeyLockId {
    fn next() -> Self {
        KeyLockId(NEXT_KEY_LOCK_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn as_u64(self) -> u64 {
        self.0
    }
}

/// Continuation run once the lock has been handed to a waiter
pub type Waiter = Box<dyn FnOnce(KeyGuard) + Send + 'static>;

struct LockState {
    /// Whether some guard currently owns the lock
    held: bool,

    /// FIFO queue of units waiting for the key
    waiters: VecDeque<Waiter>,
}

/// Non-reentrant lock shared by every unit submitted under one key
pub struct KeyLock {
    id: KeyLockId,
    key: String,
    state: Mutex<LockState>,
}

impl KeyLock {
    /// Create a lock for `key` with a fresh ID
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self {
            id: KeyLockId::next(),
            key: key.into(),
            state: Mutex::new(LockState {
                held: false,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Get the lock ID
    pub fn id(&self) -> KeyLockId {
        self.id
    }

    /// The key this lock guards
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Take the lock only if it is free right now
    pub fn try_lock(self: &Arc<Self>) -> Option<KeyGuard> {
        let mut state = self.state.lock();
        if state.held {
            return None;
        }
        state.held = true;
        Some(KeyGuard::new(Arc::clone(self)))
    }

    /// Run `then` with the lock held
    ///
    /// If the lock is free, `then` runs immediately on the calling thread.
    /// Otherwise it is queued and runs on whichever thread releases the lock
    /// to it. Never blocks.
    pub fn acquire(self: &Arc<Self>, then: Waiter) {
        let mut state = self.state.lock();
        if state.held {
            state.waiters.push_back(then);
            tracing::trace!(key = %self.key, waiting = state.waiters.len(), "unit queued on busy key");
            return;
        }
        state.held = true;
        drop(state);

        tracing::trace!(key = %self.key, "key lock acquired");
        then(KeyGuard::new(Arc::clone(self)));
    }

    /// Check if some unit currently holds the lock
    pub fn is_locked(&self) -> bool {
        self.state.lock().held
    }

    /// Get number of units queued for the lock
    pub fn waiting_count(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Pass ownership to the next waiter, or mark the lock free
    fn release(self: &Arc<Self>) {
        let mut state = self.state.lock();
        match state.waiters.pop_front() {
            Some(next) => {
                drop(state);
                tracing::trace!(key = %self.key, "key lock handed to next waiter");
                let guard = KeyGuard::new(Arc::clone(self));
                run_handoff(Box::new(move || next(guard)));
            }
            None => {
                state.held = false;
                tracing::trace!(key = %self.key, "key lock released");
            }
        }
    }
}

impl std::fmt::Debug for KeyLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("KeyLock")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("locked", &state.held)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

/// Owned RAII guard for a KeyLock
///
/// Dropping it, including during unwinding, releases the lock or hands it to
/// the next queued unit.
pub struct KeyGuard {
    lock: Arc<KeyLock>,
}

impl KeyGuard {
    fn new(lock: Arc<KeyLock>) -> Self {
        Self { lock }
    }

    /// Get the lock this guard holds
    pub fn lock(&self) -> &Arc<KeyLock> {
        &self.lock
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}

type Handoff = Box<dyn FnOnce()>;

thread_local! {
    /// Handoffs queued while another handoff is running on this thread
    static PENDING_HANDOFFS: RefCell<Option<VecDeque<Handoff>>> = const { RefCell::new(None) };
}

/// Run a handoff now, or after the handoff already running on this thread
///
/// A handoff can release further locks (for example when a worker thread
/// fails to start and drops its guards), which would otherwise recurse once
/// per queued unit.
fn run_handoff(handoff: Handoff) {
    let first = PENDING_HANDOFFS.with(|pending| {
        let mut pending = pending.borrow_mut();
        match pending.as_mut() {
            Some(queue) => {
                queue.push_back(handoff);
                None
            }
            None => {
                *pending = Some(VecDeque::new());
                Some(handoff)
            }
        }
    });

    let Some(mut current) = first else {
        return;
    };
    let _reset = ResetOnUnwind;
    loop {
        current();
        let next = PENDING_HANDOFFS.with(|pending| {
            let mut pending = pending.borrow_mut();
            let next = pending.as_mut().and_then(VecDeque::pop_front);
            if next.is_none() {
                *pending = None;
            }
            next
        });
        match next {
            Some(handoff) => current = handoff,
            None => break,
        }
    }
}

/// Clears this thread's handoff queue if a handoff panics, so later
/// releases on the thread are not queued behind a dead loop
struct ResetOnUnwind;

impl Drop for ResetOnUnwind {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let abandoned = PENDING_HANDOFFS.with(|pending| pending.borrow_mut().take());
            // Dropping the handoffs releases their guards afresh
            drop(abandoned);
        }
    }
}
