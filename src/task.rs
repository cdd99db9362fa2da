use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::executor::Task;
use crate::{Backend, CompileError, Key, Token};

/// Compiles one entry and publishes the outcome into it.
///
/// The task owns its own token, so the entry stays cached until the task is
/// done even if every caller drops theirs.
pub(crate) struct CompileTask<B: Backend> {
    function: Arc<B::Function>,
    params: B::Params,
    token: Token<B>,
}

impl<B: Backend> CompileTask<B> {
    pub fn new(function: Arc<B::Function>, params: B::Params, token: Token<B>) -> Self {
        Self { function, params, token }
    }
}

impl<B: Backend> Task for CompileTask<B> {
    fn key(&self) -> Key {
        self.token.key()
    }

    fn run(self: Box<Self>) {
        let key = self.token.key();
        let start = Instant::now();

        // The backend runs without the registry lock.
        let backend = self.token.backend();
        let outcome = match panic::catch_unwind(AssertUnwindSafe(|| {
            backend.compile(&self.function, &self.params)
        })) {
            Ok(Ok(artifact)) => Ok(artifact),
            Ok(Err(err)) => Err(CompileError::Backend(err)),
            Err(payload) => Err(CompileError::from_panic(payload)),
        };

        match &outcome {
            Ok(_) => debug!(?key, elapsed = ?start.elapsed(), "compiled"),
            Err(CompileError::Backend(_)) => warn!(?key, "compilation failed"),
            Err(CompileError::Panicked(message)) => {
                warn!(?key, %message, "compilation panicked")
            }
            Err(CompileError::Abandoned) => {}
        }

        self.token.publish(outcome);
    }
}

impl<B: Backend> Drop for CompileTask<B> {
    fn drop(&mut self) {
        // An executor dropped the task without running it. Fail the entry so
        // that waiters do not block forever.
        if !self.token.is_ready() {
            warn!(key = ?self.token.key(), "compile task abandoned");
            self.token.publish(Err(CompileError::Abandoned));
        }
    }
}
