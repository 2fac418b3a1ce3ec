//! Launcher that gives every ready job its own OS thread
//!
//! A job is admitted first and only gets a thread once its key locks are
//! held. Jobs queued behind a busy key sit in that key's wait queue.

use crate::config::{GroupConfig, Limit};
use crate::context::{CancelCause, Context};
use crate::error::{GroupError, GroupResult};
use crate::launcher::{Job, Launcher, ReadyJob};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

/// Bookkeeping guarded by the launcher mutex
struct State<E> {
    /// Jobs admitted and not yet finished
    active: usize,

    /// Admitted jobs that hold their keys and were handed to a thread
    running: usize,

    /// Current admission ceiling
    limit: Limit,

    /// First failure observed, kept until the launcher is dropped
    first_error: Option<GroupError<E>>,

    /// Sequence number for the next worker thread name
    next_seq: u64,
}

struct Shared<E> {
    state: Mutex<State<E>>,

    /// Signalled when a slot frees up or the limit changes
    admission: Condvar,

    /// Signalled when `active` drops to zero
    idle: Condvar,

    /// Cancelled on first failure and when joined
    cancel: Option<Context>,

    thread_name_prefix: String,
    stack_size: Option<usize>,
}

impl<E: Send + Sync + 'static> Shared<E> {
    /// Put a job whose keys are held on its own thread
    fn spawn(self: &Arc<Self>, ready: ReadyJob<E>) {
        let seq = {
            let mut state = self.state.lock();
            state.running += 1;
            let seq = state.next_seq;
            state.next_seq += 1;
            seq
        };

        let mut builder = thread::Builder::new().name(format!("{}-{}", self.thread_name_prefix, seq));
        if let Some(bytes) = self.stack_size {
            builder = builder.stack_size(bytes);
        }

        let shared = Arc::clone(self);
        let spawned = builder.spawn(move || {
            let outcome = run_job(ready);
            shared.finish(outcome);
        });

        // On failure the closure, and with it the job's key guards, is
        // already dropped
        if let Err(err) = spawned {
            tracing::debug!(seq, error = %err, "failed to spawn worker thread");
            self.finish(Err(GroupError::spawn_failed(err.to_string())));
        }
    }
}

impl<E> Shared<E> {
    /// Record a finished job and wake whoever is waiting on it
    fn finish(&self, outcome: GroupResult<E>) {
        let mut state = self.state.lock();
        state.active -= 1;
        state.running -= 1;

        let mut cancel_now = false;
        if let Err(err) = outcome {
            if state.first_error.is_none() {
                tracing::debug!(error_kind = error_kind(&err), "first unit failure recorded");
                state.first_error = Some(err);
                cancel_now = true;
            } else {
                tracing::trace!(error_kind = error_kind(&err), "discarding later unit failure");
            }
        }

        self.admission.notify_all();
        if state.active == 0 {
            self.idle.notify_all();
        }
        drop(state);

        if cancel_now {
            if let Some(ctx) = &self.cancel {
                ctx.cancel_with(CancelCause::TaskFailed);
            }
        }
    }
}

fn error_kind<E>(err: &GroupError<E>) -> &'static str {
    match err {
        GroupError::Task(_) => "task",
        GroupError::Panicked { .. } => "panic",
        GroupError::Spawn { .. } => "spawn",
    }
}

/// Run a job, turning an error return or a panic into a group error
///
/// The job's keys are released before this returns, unwinding included.
fn run_job<E>(ready: ReadyJob<E>) -> GroupResult<E> {
    match panic::catch_unwind(AssertUnwindSafe(|| ready.run())) {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(GroupError::task(err)),
        Err(payload) => Err(GroupError::from_panic(&*payload)),
    }
}

/// Thread-per-job launcher with first-error aggregation
///
/// Each admitted job runs on a freshly spawned, named thread once its key
/// locks are held; until then it costs no thread. While the
/// ceiling is exhausted, [`submit`](Launcher::submit) blocks the caller and
/// [`try_submit`](Launcher::try_submit) returns `false`. Panics inside a job
/// are caught and reported as [`GroupError::Panicked`].
pub struct ThreadLauncher<E> {
    shared: Arc<Shared<E>>,
}

impl<E: Send + Sync + 'static> ThreadLauncher<E> {
    /// Create an unbounded launcher with default settings
    pub fn new() -> Self {
        Self::with_config(&GroupConfig::default())
    }

    /// Create a launcher from a group configuration
    pub fn with_config(config: &GroupConfig) -> Self {
        Self::build(config, None)
    }

    /// Create a launcher that cancels `ctx` on the first failure and when
    /// joined
    pub fn with_cancellation(config: &GroupConfig, ctx: Context) -> Self {
        Self::build(config, Some(ctx))
    }

    fn build(config: &GroupConfig, cancel: Option<Context>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    active: 0,
                    running: 0,
                    limit: config.limit,
                    first_error: None,
                    next_seq: 0,
                }),
                admission: Condvar::new(),
                idle: Condvar::new(),
                cancel,
                thread_name_prefix: config.thread_name_prefix.clone(),
                stack_size: config.stack_size,
            }),
        }
    }

    /// Current admission ceiling
    pub fn limit(&self) -> Limit {
        self.shared.state.lock().limit
    }

    /// Number of jobs admitted and not yet finished
    pub fn active(&self) -> usize {
        self.shared.state.lock().active
    }

    /// Number of admitted jobs that hold their keys and own a thread
    pub fn running(&self) -> usize {
        self.shared.state.lock().running
    }

    /// Claim a slot for `job`, then spawn it once its keys are held. Caller
    /// holds `state`.
    fn start(&self, mut state: parking_lot::MutexGuard<'_, State<E>>, job: Job<E>) {
        state.active += 1;
        tracing::trace!(active = state.active, keys = job.key_count(), "job admitted");
        drop(state);

        let shared = Arc::clone(&self.shared);
        job.when_ready(move |ready| shared.spawn(ready));
    }
}

impl<E: Send + Sync + 'static> Default for ThreadLauncher<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Send + Sync + 'static> Launcher<E> for ThreadLauncher<E> {
    fn submit(&self, job: Job<E>) {
        let mut state = self.shared.state.lock();
        while !state.limit.admits(state.active) {
            self.shared.admission.wait(&mut state);
        }
        self.start(state, job);
    }

    fn try_submit(&self, job: Job<E>) -> bool {
        let state = self.shared.state.lock();
        if !state.limit.admits(state.active) {
            return false;
        }
        self.start(state, job);
        true
    }

    fn set_limit(&self, limit: Limit) {
        let mut state = self.shared.state.lock();
        if state.active > 0 {
            tracing::trace!(active = state.active, ?limit, "limit changed with units running");
        }
        state.limit = limit;
        self.shared.admission.notify_all();
    }

    fn join(&self) -> GroupResult<E> {
        let mut state = self.shared.state.lock();
        while state.active > 0 {
            self.shared.idle.wait(&mut state);
        }
        let result = match &state.first_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        };
        drop(state);

        if let Some(ctx) = &self.shared.cancel {
            ctx.cancel_with(CancelCause::Finished);
        }
        result
    }
}
