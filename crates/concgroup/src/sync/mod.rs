//! Per-key locking
//!
//! Every group key maps to one [`KeyLock`] held in a [`KeyRegistry`]. Units
//! submitted under a key take its lock for the whole time their work runs. A
//! unit whose key is busy waits in the lock's queue, not on a thread.

mod key_lock;
mod registry;

pub use key_lock::{KeyGuard, KeyLock, KeyLockId, Waiter};
pub use registry::KeyRegistry;
