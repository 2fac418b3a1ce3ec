//! Cancellation context shared between a group and its units
//!
//! A [`Context`] is a cloneable, one-shot cancellation signal built on
//! [`CancellationToken`]. Groups built with
//! [`Group::with_context`](crate::Group::with_context) cancel their derived
//! context when a unit fails or when the group is joined. Units that want to
//! stop early poll [`Context::is_cancelled`] themselves; nothing is ever
//! interrupted.

use parking_lot::Mutex;
use std::future::Future;
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll, Wake, Waker};
use std::thread::{self, Thread};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Why a context was cancelled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// `cancel()` was called directly
    Cancelled,

    /// A unit of the owning group failed
    TaskFailed,

    /// The owning group was joined
    Finished,

    /// The parent context was cancelled
    Parent,
}

/// Cancellation signal propagated from parent to children
#[derive(Clone)]
pub struct Context {
    token: CancellationToken,

    /// Cause given to this context itself; unset when cancelled by a parent
    cause: Arc<Mutex<Option<CancelCause>>>,
}

impl Context {
    /// A root context that is only cancelled explicitly
    pub fn background() -> Self {
        Self::from_token(CancellationToken::new())
    }

    fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            cause: Arc::new(Mutex::new(None)),
        }
    }

    /// Derive a child that is cancelled whenever this context is
    pub fn child(&self) -> Self {
        Self::from_token(self.token.child_token())
    }

    /// Cancel this context and all of its children
    pub fn cancel(&self) {
        self.cancel_with(CancelCause::Cancelled);
    }

    /// Cancel with a specific cause. Only the first cause is kept.
    pub(crate) fn cancel_with(&self, cause: CancelCause) {
        {
            let mut own = self.cause.lock();
            if own.is_some() || self.token.is_cancelled() {
                return;
            }
            *own = Some(cause);
        }
        tracing::trace!(?cause, "context cancelled");
        self.token.cancel();
    }

    /// Check whether the context has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cause of cancellation, if cancelled
    pub fn cause(&self) -> Option<CancelCause> {
        if !self.token.is_cancelled() {
            return None;
        }
        Some(self.cause.lock().unwrap_or(CancelCause::Parent))
    }

    /// The underlying token, for units that `select!` on cancellation
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Block until the context is cancelled
    pub fn wait(&self) -> CancelCause {
        self.park_until_cancelled(None);
        self.cause().unwrap_or(CancelCause::Parent)
    }

    /// Block until the context is cancelled or `timeout` elapses.
    ///
    /// Returns `true` if the context was cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.park_until_cancelled(Some(Instant::now() + timeout))
    }

    /// Poll the token's cancellation future, parking between wakeups
    fn park_until_cancelled(&self, deadline: Option<Instant>) -> bool {
        let mut cancelled = pin!(self.token.cancelled());
        let waker = Waker::from(Arc::new(ThreadWaker(thread::current())));
        let mut cx = TaskContext::from_waker(&waker);

        loop {
            if let Poll::Ready(()) = cancelled.as_mut().poll(&mut cx) {
                return true;
            }
            match deadline {
                None => thread::park(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return self.token.is_cancelled();
                    }
                    thread::park_timeout(deadline - now);
                }
            }
        }
    }
}

/// Waker that unparks the thread blocked in `wait`
struct ThreadWaker(Thread);

impl Wake for ThreadWaker {
    fn wake(self: Arc<Self>) {
        self.wake_by_ref();
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.unpark();
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("cause", &self.cause())
            .finish()
    }
}
