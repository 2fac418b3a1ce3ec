//! Keyed task group
//!
//! [`Group`] pairs every submitted unit with the key locks it needs and hands
//! the resulting [`Job`] to a [`Launcher`]. Units sharing a key never
//! overlap, units with disjoint keys run in parallel, and [`Group::wait`]
//! reports the first failure.

use crate::config::{GroupConfig, Limit};
use crate::context::Context;
use crate::error::{BoxError, GroupResult};
use crate::launcher::{Job, Launcher, ThreadLauncher};
use crate::multi::KeySet;
use crate::sync::KeyRegistry;
use std::sync::Arc;

/// A collection of units of work serialized per key
///
/// All methods take `&self`, so a group can be shared behind an `Arc` and
/// fed from several threads, or from inside its own units.
pub struct Group<E = BoxError> {
    registry: KeyRegistry,
    launcher: Arc<dyn Launcher<E>>,
}

impl<E: Send + Sync + 'static> Group<E> {
    /// Create an unbounded group
    pub fn new() -> Self {
        Self::with_config(GroupConfig::default())
    }

    /// Create a group with its own thread launcher configured by `config`
    pub fn with_config(config: GroupConfig) -> Self {
        Self::with_launcher(Arc::new(ThreadLauncher::with_config(&config)))
    }

    /// Create a group and a context derived from `parent`
    ///
    /// The derived context is cancelled the first time a unit fails or the
    /// first time [`wait`](Self::wait) returns, whichever comes first, and
    /// whenever `parent` is cancelled.
    pub fn with_context(parent: &Context) -> (Self, Context) {
        Self::with_context_and_config(parent, GroupConfig::default())
    }

    /// [`with_context`](Self::with_context) with an explicit configuration
    pub fn with_context_and_config(parent: &Context, config: GroupConfig) -> (Self, Context) {
        let ctx = parent.child();
        let launcher = ThreadLauncher::with_cancellation(&config, ctx.clone());
        (Self::with_launcher(Arc::new(launcher)), ctx)
    }

    /// Create a group on top of any launcher
    pub fn with_launcher(launcher: Arc<dyn Launcher<E>>) -> Self {
        Self {
            registry: KeyRegistry::new(),
            launcher,
        }
    }

    /// Run `work` once no other unit holds `key`
    ///
    /// Blocks the caller only while the group's limit is exhausted. A unit
    /// whose key is busy waits in the key's queue without a thread.
    pub fn go<F>(&self, key: &str, work: F)
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let lock = self.registry.lock_for(key);
        tracing::trace!(key, queued = lock.waiting_count(), "submitting unit");
        self.launcher.submit(Job::keyed(vec![lock], work));
    }

    /// Like [`go`](Self::go), but returns `false` without running `work` if
    /// the group's limit is currently exhausted
    ///
    /// Admission does not wait for the key: an accepted unit may still queue
    /// on its key before running.
    pub fn try_go<F>(&self, key: &str, work: F) -> bool
    where
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let lock = self.registry.lock_for(key);
        let accepted = self.launcher.try_submit(Job::keyed(vec![lock], work));
        if !accepted {
            tracing::debug!(key, "unit rejected by limit");
        }
        accepted
    }

    /// Run `work` once it holds every key in `keys`
    ///
    /// Keys are locked in sorted order with duplicates removed, whatever
    /// order the caller gives, so overlapping multi-key units cannot deadlock.
    /// An empty key list runs `work` without any key lock.
    pub fn go_multi<I, K, F>(&self, keys: I, work: F)
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let keys = KeySet::new(keys);
        let locks = self.registry.locks_for(&keys);
        tracing::trace!(keys = ?keys.as_slice(), "submitting multi-key unit");
        self.launcher.submit(Job::keyed(locks, work));
    }

    /// Like [`go_multi`](Self::go_multi), but returns `false` without running
    /// `work` if the group's limit is currently exhausted
    pub fn try_go_multi<I, K, F>(&self, keys: I, work: F) -> bool
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
        F: FnOnce() -> Result<(), E> + Send + 'static,
    {
        let keys = KeySet::new(keys);
        let locks = self.registry.locks_for(&keys);
        let accepted = self.launcher.try_submit(Job::keyed(locks, work));
        if !accepted {
            tracing::debug!(keys = ?keys.as_slice(), "multi-key unit rejected by limit");
        }
        accepted
    }

    /// Limit the number of units running at once, across all keys
    ///
    /// Negative integers mean no limit; `0` admits nothing until raised.
    /// Units already running are never interrupted.
    pub fn set_limit(&self, limit: impl Into<Limit>) {
        self.launcher.set_limit(limit.into());
    }

    /// Block until every submitted unit has finished and return the first
    /// failure
    ///
    /// Calling it again returns the same result. The group stays usable
    /// afterward, but a recorded failure is never cleared.
    pub fn wait(&self) -> GroupResult<E> {
        self.launcher.join()
    }

    /// The group's key registry
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }
}

impl<E: Send + Sync + 'static> Default for Group<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> std::fmt::Debug for Group<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GroupError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, PartialEq, Eq, thiserror::Error)]
    enum CheckError {
        #[error("key {0} was not held")]
        NotHeld(String),
        #[error("sentinel")]
        Sentinel,
    }

    /// Runs jobs on whichever thread makes their keys available; records
    /// what it saw
    #[derive(Default)]
    struct InlineLauncher {
        limit: Mutex<Limit>,
        submitted: AtomicUsize,
        rejected: AtomicUsize,
        first_error: Arc<Mutex<Option<GroupError<CheckError>>>>,
    }

    impl InlineLauncher {
        fn run(&self, job: Job<CheckError>) {
            self.submitted.fetch_add(1, Ordering::SeqCst);
            let first_error = Arc::clone(&self.first_error);
            job.when_ready(move |ready| {
                if let Err(err) = ready.run() {
                    first_error.lock().get_or_insert_with(|| GroupError::task(err));
                }
            });
        }
    }

    impl Launcher<CheckError> for InlineLauncher {
        fn submit(&self, job: Job<CheckError>) {
            self.run(job);
        }

        fn try_submit(&self, job: Job<CheckError>) -> bool {
            if !self.limit.lock().admits(0) {
                self.rejected.fetch_add(1, Ordering::SeqCst);
                return false;
            }
            self.run(job);
            true
        }

        fn set_limit(&self, limit: Limit) {
            *self.limit.lock() = limit;
        }

        fn join(&self) -> GroupResult<CheckError> {
            match self.first_error.lock().clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    fn inline_group() -> (Group<CheckError>, Arc<InlineLauncher>) {
        let launcher = Arc::new(InlineLauncher::default());
        let group = Group::with_launcher(launcher.clone() as Arc<dyn Launcher<CheckError>>);
        (group, launcher)
    }

    /// Fails unless the registry's lock for `key` is held while the unit runs
    fn expect_held(
        group: &Group<CheckError>,
        key: &str,
    ) -> impl FnOnce() -> Result<(), CheckError> + Send + 'static {
        let lock = group.registry().lock_for(key);
        let key = key.to_string();
        move || {
            if lock.is_locked() {
                Ok(())
            } else {
                Err(CheckError::NotHeld(key))
            }
        }
    }

    #[test]
    fn test_go_holds_key_lock() {
        let (group, launcher) = inline_group();
        group.go("alpha", expect_held(&group, "alpha"));
        assert!(group.wait().is_ok());
        assert_eq!(launcher.submitted.load(Ordering::SeqCst), 1);
        assert!(!group.registry().get("alpha").unwrap().is_locked());
    }

    #[test]
    fn test_go_multi_holds_every_key() {
        let (group, _launcher) = inline_group();
        let held_x = expect_held(&group, "x");
        let held_y = expect_held(&group, "y");
        group.go_multi(["y", "x", "y"], move || {
            held_x()?;
            held_y()
        });
        assert!(group.wait().is_ok());
        assert_eq!(group.registry().keys(), vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn test_go_multi_empty_keys() {
        let (group, launcher) = inline_group();
        group.go_multi(Vec::<String>::new(), || Ok(()));
        assert!(group.wait().is_ok());
        assert_eq!(launcher.submitted.load(Ordering::SeqCst), 1);
        assert!(group.registry().is_empty());
    }

    #[test]
    fn test_single_and_multi_share_locks() {
        let (group, _launcher) = inline_group();
        let single = group.registry().lock_for("shared");
        group.go_multi(["other", "shared"], || Ok(()));
        assert!(Arc::ptr_eq(&single, &group.registry().get("shared").unwrap()));
        assert_eq!(group.registry().len(), 2);
    }

    #[test]
    fn test_try_go_forwards_rejection() {
        let (group, launcher) = inline_group();
        group.set_limit(0);
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        assert!(!group.try_go("k", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        let counter = Arc::clone(&ran);
        assert!(!group.try_go_multi(["k", "j"], move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(launcher.rejected.load(Ordering::SeqCst), 2);

        group.set_limit(-1);
        assert!(group.try_go("k", || Ok(())));
        assert!(group.try_go_multi(["k", "j"], || Ok(())));
        assert!(group.wait().is_ok());
    }

    #[test]
    fn test_error_forwarded_from_launcher() {
        let (group, _launcher) = inline_group();
        group.go("a", || Ok(()));
        group.go("b", || Err(CheckError::Sentinel));
        let err = group.wait().unwrap_err();
        assert_eq!(err.task_error(), Some(&CheckError::Sentinel));
    }

    #[test]
    fn test_unit_can_submit_to_its_own_group() {
        let group: Arc<Group> = Arc::new(Group::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_group = Arc::clone(&group);
        let inner_hits = Arc::clone(&hits);
        group.go("outer", move || {
            let hits = Arc::clone(&inner_hits);
            inner_group.go("inner", move || {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });
            inner_hits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // The nested unit is submitted before the outer one finishes
        assert!(group.wait().is_ok());
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
