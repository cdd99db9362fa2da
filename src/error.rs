use std::any::Any;

/// Why a cached entry holds no artifact.
///
/// Failure is terminal: once an entry has failed, every waiter on it observes
/// the same error until the entry is evicted. A later `compile` for the same
/// key after eviction starts over.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum CompileError<E> {
    /// The backend returned an error.
    #[error("compilation failed: {0}")]
    Backend(E),
    /// The backend panicked.
    #[error("compilation panicked: {0}")]
    Panicked(String),
    /// The compile task was dropped by its executor without running.
    #[error("compile task was dropped before it ran")]
    Abandoned,
}

impl<E> CompileError<E> {
    /// The backend's error, if it returned one.
    pub fn backend(&self) -> Option<&E> {
        match self {
            Self::Backend(err) => Some(err),
            Self::Panicked(_) | Self::Abandoned => None,
        }
    }

    /// Build a `Panicked` error from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast_ref::<&'static str>() {
                Some(message) => (*message).to_string(),
                None => "unknown panic payload".to_string(),
            },
        };
        Self::Panicked(message)
    }
}
