use std::fmt::{self, Debug, Formatter};

use crate::Key;

/// A unit of work handed to an [`Executor`].
///
/// Compile tasks are type-erased so that one executor can serve registries
/// with different backends.
pub trait Task: Send {
    /// The key of the entry this task compiles.
    fn key(&self) -> Key;

    /// Run the task to completion.
    fn run(self: Box<Self>);
}

/// What an executor did with a submitted task.
#[must_use]
pub enum Submit {
    /// The executor took the task and will run it on its own resources.
    Consumed,
    /// The executor handed the task back. The registry runs it on the
    /// calling thread.
    Declined(Box<dyn Task>),
}

impl Debug for Submit {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Consumed => f.pad("Consumed"),
            Self::Declined(task) => f.debug_tuple("Declined").field(&task.key()).finish(),
        }
    }
}

/// Decides where compile tasks run.
///
/// Executors are attached to a [`Registry`](crate::Registry) as a stack; the
/// most recently attached one receives all tasks created by cache misses.
/// `submit` is never called while the registry lock is held.
pub trait Executor: Send + Sync {
    /// Take a task or hand it back.
    fn submit(&self, task: Box<dyn Task>) -> Submit;
}

/// An executor that declines every task, forcing synchronous compilation.
#[derive(Debug, Default, Copy, Clone)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn submit(&self, task: Box<dyn Task>) -> Submit {
        Submit::Declined(task)
    }
}

#[cfg(feature = "rayon")]
pub use self::pool::{PoolConfig, RayonExecutor};

#[cfg(feature = "rayon")]
mod pool {
    use std::fmt::{self, Debug, Formatter};

    use tracing::trace;

    use super::{Executor, Submit, Task};

    /// How to build the thread pool of a [`RayonExecutor`].
    #[derive(Debug, Default, Clone)]
    pub struct PoolConfig {
        /// The number of worker threads. Zero picks rayon's default.
        pub threads: usize,
        /// A prefix for worker thread names.
        pub thread_name: Option<String>,
    }

    /// An executor that compiles on a dedicated rayon thread pool.
    pub struct RayonExecutor {
        pool: rayon::ThreadPool,
    }

    impl RayonExecutor {
        /// Build the pool.
        pub fn new(config: PoolConfig) -> Result<Self, rayon::ThreadPoolBuildError> {
            let mut builder = rayon::ThreadPoolBuilder::new().num_threads(config.threads);
            if let Some(name) = config.thread_name {
                builder = builder.thread_name(move |i| format!("{name}-{i}"));
            }
            Ok(Self { pool: builder.build()? })
        }

        /// The number of worker threads.
        pub fn threads(&self) -> usize {
            self.pool.current_num_threads()
        }
    }

    impl Executor for RayonExecutor {
        fn submit(&self, task: Box<dyn Task>) -> Submit {
            trace!(key = ?task.key(), "compile task scheduled");
            self.pool.spawn(move || task.run());
            Submit::Consumed
        }
    }

    impl Debug for RayonExecutor {
        fn fmt(&self, f: &mut Formatter) -> fmt::Result {
            f.debug_struct("RayonExecutor").field("threads", &self.threads()).finish()
        }
    }
}
