//! concgroup - keyed task groups
//!
//! A [`Group`] runs units of work in parallel, like an error group, with one
//! extra rule: units submitted under the same key never run at the same
//! time. They are serialized roughly in submission order while units with
//! other keys keep running in parallel.
//!
//! # Overview
//!
//! - [`Group::go`] / [`Group::try_go`] submit a unit under one key
//! - [`Group::go_multi`] / [`Group::try_go_multi`] submit a unit that must
//!   hold several keys at once; keys are always locked in sorted order so
//!   overlapping multi-key units cannot deadlock
//! - [`Group::set_limit`] caps how many units run at once across all keys
//! - [`Group::wait`] blocks until everything finished and returns the first
//!   failure (error return or panic)
//! - [`Group::with_context`] also hands back a [`Context`] that is cancelled
//!   on the first failure
//!
//! # Example
//!
//! ```rust
//! use concgroup::Group;
//!
//! let group: Group = Group::new();
//! let hosts = [("go.dev", "/"), ("go.dev", "/dl/"), ("google.com", "/")];
//!
//! for (host, path) in hosts {
//!     // Requests to one host run one at a time, hosts run in parallel
//!     group.go(host, move || {
//!         println!("fetching {host}{path}");
//!         Ok(())
//!     });
//! }
//!
//! group.wait()?;
//! # Ok::<(), concgroup::GroupError<concgroup::BoxError>>(())
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod launcher;
pub mod multi;
pub mod sync;

pub use config::{GroupConfig, Limit};
pub use context::{CancelCause, Context};
pub use error::{BoxError, GroupError, GroupResult};
pub use group::Group;
pub use launcher::{Job, Launcher, ReadyJob, ThreadLauncher, Work};
pub use multi::{KeySet, MultiKeyGuard};
pub use sync::{KeyGuard, KeyLock, KeyLockId, KeyRegistry, Waiter};
