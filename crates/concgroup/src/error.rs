//! Error types reported by a [`Group`](crate::Group) when it is joined

use std::any::Any;
use std::sync::Arc;

/// Boxed error used when a group is not given a concrete error type
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The first failure observed across all units of a group
///
/// Only one failure is ever reported per group. Later failures are dropped.
/// Task errors are kept behind an `Arc` so that joining the same group more
/// than once hands back the same error.
#[derive(Debug, thiserror::Error)]
pub enum GroupError<E> {
    /// A unit of work returned an error
    #[error("task failed: {0}")]
    Task(Arc<E>),

    /// A unit of work panicked
    #[error("task panicked: {message}")]
    Panicked { message: String },

    /// The launcher could not start a thread for a unit of work
    #[error("failed to spawn worker thread: {reason}")]
    Spawn { reason: String },
}

/// Result of joining a group
pub type GroupResult<E> = Result<(), GroupError<E>>;

impl<E> GroupError<E> {
    /// Wrap an error returned by a unit of work
    pub fn task(error: E) -> Self {
        GroupError::Task(Arc::new(error))
    }

    /// Build a panic error from a payload caught by `catch_unwind`
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        GroupError::Panicked { message }
    }

    /// Build a spawn failure error
    pub fn spawn_failed<S: Into<String>>(reason: S) -> Self {
        GroupError::Spawn {
            reason: reason.into(),
        }
    }

    /// The error returned by the failing unit, if the failure was a task error
    pub fn task_error(&self) -> Option<&E> {
        match self {
            GroupError::Task(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Check if a unit panicked
    pub fn is_panic(&self) -> bool {
        matches!(self, GroupError::Panicked { .. })
    }

    /// Check if a worker thread could not be started
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, GroupError::Spawn { .. })
    }
}

// Derived Clone would require `E: Clone`.
impl<E> Clone for GroupError<E> {
    fn clone(&self) -> Self {
        match self {
            GroupError::Task(err) => GroupError::Task(Arc::clone(err)),
            GroupError::Panicked { message } => GroupError::Panicked {
                message: message.clone(),
            },
            GroupError::Spawn { reason } => GroupError::Spawn {
                reason: reason.clone(),
            },
        }
    }
}
