use std::sync::{Arc, OnceLock};

use parking_lot::Condvar;

use crate::{CompileError, Key};

/// The result a compile task publishes into an entry.
pub(crate) type Outcome<A, E> = Result<A, CompileError<E>>;

/// A per-key record in the registry's arena.
///
/// Lives in the table exactly as long as `refs > 0`. Every mutation happens
/// under the registry lock.
pub(crate) struct Entry<A, E> {
    /// The key this entry is indexed under.
    pub key: Key,
    /// How many tokens reference this entry, including the one held by an
    /// in-flight compile task.
    pub refs: usize,
    /// Where the compile task publishes its outcome.
    pub slot: Arc<Slot<A, E>>,
}

/// The completion state of an entry, shared with every token on it.
///
/// Tokens keep their own handle to the slot so that a published outcome can
/// be read without taking the registry lock and stays valid for as long as the
/// token lives.
pub(crate) struct Slot<A, E> {
    /// Empty while pending. Set exactly once, under the registry lock.
    outcome: OnceLock<Outcome<A, E>>,
    /// Signalled when `outcome` is set. Only ever waited on together with the
    /// registry lock.
    pub ready: Condvar,
}

impl<A, E> Slot<A, E> {
    /// Create a pending slot.
    pub fn new() -> Self {
        Self { outcome: OnceLock::new(), ready: Condvar::new() }
    }

    /// The outcome, if it has been published.
    #[inline]
    pub fn get(&self) -> Option<&Outcome<A, E>> {
        self.outcome.get()
    }

    /// Whether the slot is still pending.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.outcome.get().is_none()
    }

    /// Store the outcome and wake all waiters.
    ///
    /// The caller must hold the registry lock so that no waiter can check the
    /// slot and go to sleep between the store and the notification.
    pub fn publish(&self, key: Key, outcome: Outcome<A, E>) {
        if self.outcome.set(outcome).is_err() {
            panic!("compile-cache: entry {key:?} was completed twice");
        }
        self.ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_transitions_once() {
        let slot = Slot::<u32, ()>::new();
        assert!(slot.is_pending());
        slot.publish(Key::from_raw(1), Ok(7));
        assert!(!slot.is_pending());
        assert_eq!(slot.get(), Some(&Ok(7)));
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn test_slot_rejects_second_publish() {
        let slot = Slot::<u32, ()>::new();
        slot.publish(Key::from_raw(1), Ok(7));
        slot.publish(Key::from_raw(1), Ok(8));
    }
}
