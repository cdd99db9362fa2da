use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

use crate::entry::{Outcome, Slot};
use crate::registry::Shared;
use crate::{Backend, CompileError, Key};

/// An owning reference on one cached entry.
///
/// A token keeps its entry, and with it the compiled artifact, in the cache.
/// Dropping the last token on an entry evicts it. Tokens cannot be cloned: to
/// get another reference, ask the registry again.
pub struct Token<B: Backend> {
    shared: Arc<Shared<B>>,
    id: usize,
    key: Key,
    slot: Arc<Slot<B::Artifact, B::Error>>,
}

impl<B: Backend> Token<B> {
    /// Mint a token. The caller must already have counted the reference.
    pub(crate) fn new(
        shared: Arc<Shared<B>>,
        id: usize,
        key: Key,
        slot: Arc<Slot<B::Artifact, B::Error>>,
    ) -> Self {
        Self { shared, id, key, slot }
    }

    /// The key of the entry this token references.
    pub fn key(&self) -> Key {
        self.key
    }

    /// Whether both tokens reference the same entry.
    pub fn same_entry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    /// Whether compilation has finished, successfully or not.
    pub fn is_ready(&self) -> bool {
        !self.slot.is_pending()
    }

    /// The compilation outcome, if it is already available.
    pub fn try_result(&self) -> Option<Result<&B::Artifact, &CompileError<B::Error>>> {
        self.slot.get().map(Result::as_ref)
    }

    /// Block until compilation has finished and return its outcome.
    ///
    /// Every token on the same entry observes the same artifact. The
    /// reference stays valid for as long as this token lives.
    pub fn wait_for_result(&self) -> Result<&B::Artifact, &CompileError<B::Error>> {
        if let Some(outcome) = self.slot.get() {
            return outcome.as_ref();
        }

        let mut state = self.shared.state.lock();
        loop {
            if let Some(outcome) = self.slot.get() {
                return outcome.as_ref();
            }
            self.slot.ready.wait(&mut state);
        }
    }

    /// Publish the compilation outcome for this token's entry.
    pub(crate) fn publish(&self, outcome: Outcome<B::Artifact, B::Error>) {
        let _state = self.shared.state.lock();
        self.slot.publish(self.key, outcome);
    }

    /// The backend of the registry this token belongs to.
    pub(crate) fn backend(&self) -> &B {
        &self.shared.backend
    }
}

impl<B: Backend> Drop for Token<B> {
    fn drop(&mut self) {
        self.shared.release(self.id);
    }
}

impl<B: Backend> Debug for Token<B> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Token")
            .field("key", &self.key)
            .field("ready", &self.is_ready())
            .finish()
    }
}
