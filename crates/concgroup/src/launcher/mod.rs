//! Parallel task launcher
//!
//! A [`Launcher`] runs jobs in parallel, enforces an admission ceiling, and
//! reports the first failure when joined. [`Group`](crate::Group) only ever
//! talks to this trait, so keyed exclusion works the same on top of any
//! implementation. [`ThreadLauncher`] is the default one.
//!
//! A [`Job`] carries the key locks its work needs. A launcher asks for them
//! with [`Job::when_ready`] and only puts the job on a thread once they are
//! held, so units queued behind a busy key cost no threads.

mod thread;

pub use thread::ThreadLauncher;

use crate::config::Limit;
use crate::error::GroupResult;
use crate::multi::MultiKeyGuard;
use crate::sync::KeyLock;
use std::sync::Arc;

/// Boxed body of a unit of work
pub type Work<E> = Box<dyn FnOnce() -> Result<(), E> + Send + 'static>;

/// A unit of work as seen by a launcher, with the key locks it must hold
pub struct Job<E> {
    work: Work<E>,

    /// Locks in canonical order
    keys: Vec<Arc<KeyLock>>,
}

impl<E: 'static> Job<E> {
    /// A job that needs no key
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        Self::keyed(Vec::new(), work)
    }

    /// A job that must hold every lock of `keys` while it runs
    ///
    /// `keys` must be sorted and duplicate-free, as returned by
    /// [`KeyRegistry::locks_for`](crate::sync::KeyRegistry::locks_for).
    pub fn keyed<F>(keys: Vec<Arc<KeyLock>>, work: F) -> Self
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        Self {
            work: Box::new(work),
            keys,
        }
    }

    /// Number of key locks the job needs
    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    /// Acquire the job's keys, then hand it to `start`
    ///
    /// Never blocks. If a key is busy, the job waits in that key's queue and
    /// `start` later runs on the thread that releases the key to it.
    pub fn when_ready<F>(self, start: F)
    where
        F: FnOnce(ReadyJob<E>) + Send + 'static,
    {
        let Job { work, keys } = self;
        MultiKeyGuard::acquire(keys, move |guard| start(ReadyJob { work, guard }));
    }
}

impl<E> std::fmt::Debug for Job<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("keys", &self.keys.iter().map(|lock| lock.key()).collect::<Vec<_>>())
            .finish()
    }
}

/// A job whose key locks are held
///
/// Dropping it without running releases the keys.
pub struct ReadyJob<E> {
    work: Work<E>,
    guard: MultiKeyGuard,
}

impl<E> ReadyJob<E> {
    /// Run the work, releasing the keys when it returns or unwinds
    pub fn run(self) -> Result<(), E> {
        let ReadyJob { work, guard } = self;
        let _guard = guard;
        work()
    }
}

/// Runs jobs in parallel and aggregates the first failure
pub trait Launcher<E>: Send + Sync {
    /// Admit `job`, blocking the caller while the ceiling is exhausted
    fn submit(&self, job: Job<E>);

    /// Admit `job` only if the ceiling allows it right now.
    ///
    /// A rejected job is dropped without running.
    fn try_submit(&self, job: Job<E>) -> bool;

    /// Change the ceiling for future admissions
    fn set_limit(&self, limit: Limit);

    /// Block until every admitted job has finished, then report the first
    /// failure
    fn join(&self) -> GroupResult<E>;
}
