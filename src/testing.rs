//! Per-thread observations of the last `compile` call.

use std::cell::Cell;

/// What the last `compile` on a thread did.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum Outcome {
    /// Nothing was compiled on this thread yet.
    #[default]
    None,
    /// The key was already cached.
    Hit,
    /// The key was missing and the task ran on the calling thread.
    InlineMiss,
    /// The key was missing and an executor took the task.
    ScheduledMiss,
}

thread_local! {
    static LAST: Cell<Outcome> = const { Cell::new(Outcome::None) };
}

/// What this thread's last `compile` call did.
pub fn last_outcome() -> Outcome {
    LAST.with(Cell::get)
}

/// Whether this thread's last `compile` call was a cache hit.
pub fn last_was_hit() -> bool {
    last_outcome() == Outcome::Hit
}

/// Whether this thread's last `compile` call compiled on the calling thread.
pub fn last_ran_inline() -> bool {
    last_outcome() == Outcome::InlineMiss
}

pub(crate) fn register_hit() {
    LAST.with(|cell| cell.set(Outcome::Hit))
}

pub(crate) fn register_miss(inline: bool) {
    let outcome = if inline { Outcome::InlineMiss } else { Outcome::ScheduledMiss };
    LAST.with(|cell| cell.set(outcome))
}
