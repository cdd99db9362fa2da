//! A process-wide cache for expensive compilations.
//!
//! A [`Registry`] turns a function definition and its pass parameters into a
//! compiled artifact through a [`Backend`]. Concurrent requests for the same
//! [`Key`] share one compilation, and every requester gets a [`Token`] that
//! keeps the artifact cached. When the last token on an entry is dropped, the
//! entry is evicted.
//!
//! Where compilation runs is decided by the [`Executor`] on top of the
//! registry's binding stack. Without one, `compile` runs the backend on the
//! calling thread and returns only when the artifact is ready.
//!
//! ```ignore
//! let registry = Registry::new(MyBackend::default());
//! let _binding = registry.bind(Arc::new(RayonExecutor::new(PoolConfig::default())?));
//!
//! let token = registry.compile(Arc::new(function), params);
//! let artifact = token.wait_for_result()?;
//! ```

mod backend;
mod entry;
mod error;
mod executor;
mod key;
mod passthroughhasher;
mod registry;
mod task;
mod token;

#[cfg(feature = "testing")]
pub mod testing;

pub use crate::backend::{Backend, FnBackend};
pub use crate::error::CompileError;
pub use crate::executor::{Executor, InlineExecutor, Submit, Task};
#[cfg(feature = "rayon")]
pub use crate::executor::{PoolConfig, RayonExecutor};
pub use crate::key::Key;
pub use crate::registry::{ExecutorBinding, GlobalRegistry, Registry, Stats};
pub use crate::token::Token;
