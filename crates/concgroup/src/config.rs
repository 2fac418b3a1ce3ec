//! Group configuration and admission limits

/// Maximum number of units a group runs at once, across all keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Limit {
    /// No ceiling
    #[default]
    Unbounded,

    /// At most this many units admitted at once.
    ///
    /// `Max(0)` admits nothing: `try_go` is always rejected and `go` blocks
    /// until the limit is raised.
    Max(usize),
}

impl Limit {
    /// One slot per logical CPU
    pub fn available_parallelism() -> Self {
        Limit::Max(num_cpus::get())
    }

    /// The ceiling, or `None` when unbounded
    pub fn get(self) -> Option<usize> {
        match self {
            Limit::Unbounded => None,
            Limit::Max(max) => Some(max),
        }
    }

    /// Whether one more unit may be admitted while `active` units are running
    pub fn admits(self, active: usize) -> bool {
        match self {
            Limit::Unbounded => true,
            Limit::Max(max) => active < max,
        }
    }
}

impl From<usize> for Limit {
    fn from(value: usize) -> Self {
        Limit::Max(value)
    }
}

impl From<Option<usize>> for Limit {
    fn from(value: Option<usize>) -> Self {
        value.map(Limit::Max).unwrap_or(Limit::Unbounded)
    }
}

/// Negative values mean "no limit".
impl From<isize> for Limit {
    fn from(value: isize) -> Self {
        usize::try_from(value)
            .map(Limit::Max)
            .unwrap_or(Limit::Unbounded)
    }
}

impl From<i64> for Limit {
    fn from(value: i64) -> Self {
        usize::try_from(value)
            .map(Limit::Max)
            .unwrap_or(Limit::Unbounded)
    }
}

impl From<i32> for Limit {
    fn from(value: i32) -> Self {
        usize::try_from(value)
            .map(Limit::Max)
            .unwrap_or(Limit::Unbounded)
    }
}

/// Settings applied when a group builds its own launcher
#[derive(Debug, Clone)]
pub struct GroupConfig {
    /// Initial admission ceiling
    pub limit: Limit,

    /// Worker threads are named `<prefix>-<sequence>`
    pub thread_name_prefix: String,

    /// Stack size for worker threads (None = platform default)
    pub stack_size: Option<usize>,
}

impl GroupConfig {
    pub const DEFAULT_THREAD_NAME_PREFIX: &'static str = "concgroup-worker";

    /// Set the initial admission ceiling
    pub fn with_limit(mut self, limit: impl Into<Limit>) -> Self {
        self.limit = limit.into();
        self
    }

    /// Set the worker thread name prefix
    pub fn with_thread_name_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set the worker thread stack size in bytes
    pub fn with_stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            limit: Limit::Unbounded,
            thread_name_prefix: Self::DEFAULT_THREAD_NAME_PREFIX.to_string(),
            stack_size: None,
        }
    }
}
