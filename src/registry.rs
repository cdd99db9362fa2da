use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use parking_lot::Mutex;
use slab::Slab;
use tracing::{debug, trace};

use crate::entry::{Entry, Slot};
use crate::executor::{Executor, Submit, Task};
use crate::passthroughhasher::KeyMap;
use crate::task::CompileTask;
use crate::{Backend, Token};

/// A cache that deduplicates compilations and coalesces concurrent requests
/// for the same artifact.
///
/// Each distinct key is compiled at most once for as long as any [`Token`]
/// on it is alive. The entry is evicted the moment its last token is dropped,
/// so a later request for the same key compiles afresh.
///
/// Cloning a registry yields another handle to the same cache.
pub struct Registry<B: Backend>(Arc<Shared<B>>);

/// State shared between a registry, its tokens and its compile tasks.
pub(crate) struct Shared<B: Backend> {
    /// The compilation backend.
    pub backend: B,
    /// The single lock guarding all bookkeeping.
    pub state: Mutex<State<B>>,
}

/// Everything that is guarded by the registry lock.
pub(crate) struct State<B: Backend> {
    /// Maps from keys to entries in the arena.
    index: KeyMap<usize>,
    /// The live entries.
    entries: Slab<Entry<B::Artifact, B::Error>>,
    /// The executor binding stack. The last binding is the current one.
    bindings: Vec<Binding>,
    /// The last issued binding tag.
    tag: u64,
}

/// An attached executor.
struct Binding {
    tag: u64,
    executor: Arc<dyn Executor>,
}

impl<B: Backend> Registry<B> {
    /// Create an empty registry around a backend.
    pub fn new(backend: B) -> Self {
        Self(Arc::new(Shared {
            backend,
            state: Mutex::new(State {
                index: KeyMap::default(),
                entries: Slab::new(),
                bindings: Vec::new(),
                tag: 0,
            }),
        }))
    }

    /// The backend this registry compiles with.
    pub fn backend(&self) -> &B {
        &self.0.backend
    }

    /// Request the artifact for a function and its parameters.
    ///
    /// On a hit this returns a token on the existing entry, which may still
    /// be pending. On a miss a compile task is created and handed to the
    /// current executor. Without an executor, or when the executor declines,
    /// the task runs on the calling thread before this returns.
    ///
    /// Use [`Token::wait_for_result`] to obtain the artifact.
    pub fn compile(&self, function: Arc<B::Function>, params: B::Params) -> Token<B> {
        let key = self.0.backend.key(&function, &params);

        let (token, task_token, executor) = {
            let mut guard = self.0.state.lock();
            let state = &mut *guard;

            if let Some(&id) = state.index.get(&key) {
                let entry = &mut state.entries[id];
                entry.refs += 1;
                let token = Token::new(self.0.clone(), id, key, entry.slot.clone());
                drop(guard);

                trace!(?key, "compile cache hit");

                #[cfg(feature = "testing")]
                crate::testing::register_hit();

                return token;
            }

            // One reference for the caller and one for the compile task.
            let slot = Arc::new(Slot::new());
            let id = state.entries.insert(Entry { key, refs: 2, slot: slot.clone() });
            if state.index.insert(key, id).is_some() {
                panic!("compile-cache: key {key:?} was inserted twice");
            }

            let executor = state.bindings.last().map(|binding| binding.executor.clone());
            (
                Token::new(self.0.clone(), id, key, slot.clone()),
                Token::new(self.0.clone(), id, key, slot),
                executor,
            )
        };

        debug!(?key, "compile cache miss");

        let task: Box<dyn Task> = Box::new(CompileTask::new(function, params, task_token));
        let declined = match executor {
            Some(executor) => match executor.submit(task) {
                Submit::Consumed => None,
                Submit::Declined(task) => Some(task),
            },
            None => Some(task),
        };

        #[cfg(feature = "testing")]
        crate::testing::register_miss(declined.is_some());

        if let Some(task) = declined {
            task.run();
        }

        token
    }

    /// Push an executor onto the binding stack, making it the current one.
    ///
    /// Returns a tag that identifies the binding for [`detach`](Self::detach).
    /// Tags increase strictly.
    pub fn attach(&self, executor: Arc<dyn Executor>) -> u64 {
        let mut state = self.0.state.lock();
        state.tag += 1;
        let tag = state.tag;
        state.bindings.push(Binding { tag, executor });
        drop(state);
        debug!(tag, "executor attached");
        tag
    }

    /// Remove the binding with the given tag, wherever it is in the stack.
    ///
    /// Returns whether a binding was removed. Unknown tags are ignored.
    pub fn detach(&self, tag: u64) -> bool {
        let mut state = self.0.state.lock();
        let before = state.bindings.len();
        state.bindings.retain(|binding| binding.tag != tag);
        let removed = state.bindings.len() < before;
        drop(state);
        if removed {
            debug!(tag, "executor detached");
        }
        removed
    }

    /// Attach an executor for as long as the returned binding lives.
    pub fn bind(&self, executor: Arc<dyn Executor>) -> ExecutorBinding<B> {
        let tag = self.attach(executor);
        ExecutorBinding { registry: self.clone(), tag }
    }

    /// The number of attached executors.
    pub fn num_bound(&self) -> usize {
        self.0.state.lock().bindings.len()
    }

    /// The number of cached entries, pending or not.
    pub fn num_cached(&self) -> usize {
        self.0.state.lock().entries.len()
    }

    /// The number of references held across all entries.
    pub fn count_refs(&self) -> usize {
        self.0.state.lock().entries.iter().map(|(_, entry)| entry.refs).sum()
    }

    /// The number of entries whose compilation has not finished yet.
    pub fn count_pending(&self) -> usize {
        self.0
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.slot.is_pending())
            .count()
    }

    /// A consistent snapshot of all counters.
    pub fn stats(&self) -> Stats {
        let state = self.0.state.lock();
        let mut stats = Stats {
            cached: state.entries.len(),
            bound: state.bindings.len(),
            ..Stats::default()
        };
        for (_, entry) in &state.entries {
            stats.refs += entry.refs;
            if entry.slot.is_pending() {
                stats.pending += 1;
            }
        }
        stats
    }
}

impl<B: Backend> Shared<B> {
    /// Drop one reference on an entry, evicting it if it was the last.
    pub(crate) fn release(&self, id: usize) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(entry) = state.entries.get_mut(id) else {
            panic!("compile-cache: released a token on a missing entry");
        };

        entry.refs -= 1;
        if entry.refs > 0 {
            trace!(key = ?entry.key, refs = entry.refs, "token released");
            return;
        }

        let entry = state.entries.remove(id);
        if state.index.remove(&entry.key) != Some(id) {
            panic!("compile-cache: entry {:?} is not indexed", entry.key);
        }
        drop(guard);
        debug!(key = ?entry.key, "compile cache entry evicted");
    }
}

impl<B: Backend> Clone for Registry<B> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<B: Backend> Debug for Registry<B> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_tuple("Registry").field(&self.stats()).finish()
    }
}

/// Counters describing a registry at one point in time.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Stats {
    /// Cached entries, pending or not.
    pub cached: usize,
    /// References held across all entries.
    pub refs: usize,
    /// Entries whose compilation has not finished.
    pub pending: usize,
    /// Attached executors.
    pub bound: usize,
}

/// Keeps an executor attached to a registry. Detaches it on drop.
#[must_use = "the executor is detached as soon as the binding is dropped"]
pub struct ExecutorBinding<B: Backend> {
    registry: Registry<B>,
    tag: u64,
}

impl<B: Backend> ExecutorBinding<B> {
    /// The tag the executor was attached under.
    pub fn tag(&self) -> u64 {
        self.tag
    }
}

impl<B: Backend> Drop for ExecutorBinding<B> {
    fn drop(&mut self) {
        self.registry.detach(self.tag);
    }
}

impl<B: Backend> Debug for ExecutorBinding<B> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("ExecutorBinding").field("tag", &self.tag).finish()
    }
}

/// A process-wide registry that is created on first use.
///
/// ```ignore
/// static CACHE: GlobalRegistry<MyBackend> =
///     GlobalRegistry::new(|| Registry::new(MyBackend::default()));
///
/// let token = CACHE.compile(function, params);
/// ```
pub struct GlobalRegistry<B: Backend>(LazyLock<Registry<B>>);

impl<B: Backend> GlobalRegistry<B> {
    /// Create a lazily initialized registry.
    ///
    /// Takes a function pointer rather than a value so that it can be used in
    /// a `static`.
    pub const fn new(init: fn() -> Registry<B>) -> Self {
        Self(LazyLock::new(init))
    }
}

impl<B: Backend> Deref for GlobalRegistry<B> {
    type Target = Registry<B>;

    fn deref(&self) -> &Registry<B> {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use quickcheck::{Arbitrary, Gen};

    use super::*;
    use crate::{FnBackend, InlineExecutor};

    type CompileFn =
        Box<dyn Fn(&&'static str, &u8) -> Result<String, Infallible> + Send + Sync>;
    type Counting = FnBackend<&'static str, u8, String, Infallible, CompileFn>;

    fn counting(calls: Arc<AtomicUsize>) -> Registry<Counting> {
        let compile: CompileFn = Box::new(move |function: &&'static str, level: &u8| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{function}@O{level}"))
        });
        Registry::new(FnBackend::new(compile))
    }

    #[test]
    fn test_hit_shares_entry() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting(calls.clone());
        let function = Arc::new("add");

        let a = registry.compile(function.clone(), 2);
        let b = registry.compile(function.clone(), 2);
        assert!(a.same_entry(&b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.stats(), Stats { cached: 1, refs: 2, pending: 0, bound: 0 });

        let c = registry.compile(function, 3);
        assert!(!a.same_entry(&c));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.num_cached(), 2);
    }

    #[test]
    fn test_release_evicts_last() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting(calls.clone());
        let function = Arc::new("mul");

        let a = registry.compile(function.clone(), 0);
        let b = registry.compile(function.clone(), 0);
        drop(a);
        assert_eq!(registry.num_cached(), 1);
        assert_eq!(registry.count_refs(), 1);
        assert_eq!(b.wait_for_result(), Ok(&"mul@O0".to_string()));
        drop(b);
        assert_eq!(registry.num_cached(), 0);
        assert_eq!(registry.count_refs(), 0);

        let c = registry.compile(function, 0);
        assert!(c.is_ready());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_declining_executor_compiles_inline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting(calls.clone());
        let _binding = registry.bind(Arc::new(InlineExecutor));

        let token = registry.compile(Arc::new("neg"), 1);
        assert!(token.is_ready());
        assert_eq!(registry.count_pending(), 0);
        assert_eq!(registry.count_refs(), 1);
    }

    #[test]
    fn test_binding_detaches_on_drop() {
        let registry = counting(Arc::new(AtomicUsize::new(0)));
        let outer = registry.bind(Arc::new(InlineExecutor));
        let inner = registry.bind(Arc::new(InlineExecutor));
        assert!(inner.tag() > outer.tag());
        assert_eq!(registry.num_bound(), 2);
        drop(outer);
        assert_eq!(registry.num_bound(), 1);
        let tag = inner.tag();
        drop(inner);
        assert_eq!(registry.num_bound(), 0);
        assert!(!registry.detach(tag));
    }

    #[derive(Debug, Clone)]
    enum StackOp {
        Attach,
        Detach(usize),
    }

    impl Arbitrary for StackOp {
        fn arbitrary(g: &mut Gen) -> Self {
            match g.choose(&[0, 1]) {
                Some(0) => Self::Attach,
                _ => Self::Detach(Arbitrary::arbitrary(g)),
            }
        }
    }

    #[quickcheck_macros::quickcheck]
    fn test_binding_stack_quickcheck(ops: Vec<StackOp>) {
        let registry = counting(Arc::new(AtomicUsize::new(0)));
        let mut live = Vec::<u64>::new();
        let mut issued = HashSet::new();
        let mut last = 0;

        for op in ops {
            match op {
                StackOp::Attach => {
                    let tag = registry.attach(Arc::new(InlineExecutor));
                    assert!(tag > last);
                    assert!(issued.insert(tag));
                    last = tag;
                    live.push(tag);
                }
                StackOp::Detach(i) if !live.is_empty() => {
                    let tag = live.remove(i % live.len());
                    assert!(registry.detach(tag));
                    assert!(!registry.detach(tag));
                }
                StackOp::Detach(_) => assert!(!registry.detach(last + 1)),
            }

            assert_eq!(registry.num_bound(), live.len());
            let state = registry.0.state.lock();
            let tags: Vec<u64> = state.bindings.iter().map(|binding| binding.tag).collect();
            assert_eq!(tags, live);
        }
    }

    #[quickcheck_macros::quickcheck]
    fn test_refcount_quickcheck(ops: Vec<(bool, u8)>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = counting(calls.clone());
        let function = Arc::new("f");
        let mut tokens = Vec::new();
        let mut expected_calls = 0;

        for (acquire, level) in ops {
            let level = level % 4;
            if acquire {
                let fresh = !tokens.iter().any(|(l, _)| *l == level);
                tokens.push((level, registry.compile(function.clone(), level)));
                if fresh {
                    expected_calls += 1;
                }
            } else if !tokens.is_empty() {
                tokens.remove(level as usize % tokens.len());
            }

            let distinct: HashSet<u8> = tokens.iter().map(|(l, _)| *l).collect();
            assert_eq!(registry.count_refs(), tokens.len());
            assert_eq!(registry.num_cached(), distinct.len());
            assert_eq!(registry.count_pending(), 0);
            assert_eq!(calls.load(Ordering::SeqCst), expected_calls);
        }

        drop(tokens);
        assert_eq!(registry.num_cached(), 0);
    }
}
