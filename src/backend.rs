use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;
use std::marker::PhantomData;

use crate::Key;

/// The compilation backend a [`Registry`](crate::Registry) deduplicates.
///
/// Compilation is assumed to be expensive and CPU-bound. The registry never
/// calls [`compile`](Self::compile) while holding its lock, and calls it at
/// most once per cached entry.
pub trait Backend: Send + Sync + 'static {
    /// The abstract function definition.
    type Function: Hash + Send + Sync + 'static;
    /// Optimization and pass parameters.
    type Params: Hash + Send + Sync + 'static;
    /// The executable artifact produced by compilation.
    type Artifact: Send + Sync + 'static;
    /// Why a compilation failed.
    type Error: Send + Sync + 'static;

    /// Derive the cache identity of a function and its parameters.
    ///
    /// Must be deterministic. Inputs that map to the same key share one
    /// artifact, so this should only collide for inputs that compile to
    /// interchangeable artifacts.
    fn key(&self, function: &Self::Function, params: &Self::Params) -> Key {
        Key::derive(function, params)
    }

    /// Compile a function with the given parameters.
    fn compile(
        &self,
        function: &Self::Function,
        params: &Self::Params,
    ) -> Result<Self::Artifact, Self::Error>;
}

/// A backend built from a compile closure.
pub struct FnBackend<F, P, A, E, C> {
    compile: C,
    marker: PhantomData<fn(&F, &P) -> Result<A, E>>,
}

impl<F, P, A, E, C> FnBackend<F, P, A, E, C>
where
    C: Fn(&F, &P) -> Result<A, E>,
{
    /// Wrap a compile closure.
    pub fn new(compile: C) -> Self {
        Self { compile, marker: PhantomData }
    }
}

impl<F, P, A, E, C> Backend for FnBackend<F, P, A, E, C>
where
    F: Hash + Send + Sync + 'static,
    P: Hash + Send + Sync + 'static,
    A: Send + Sync + 'static,
    E: Send + Sync + 'static,
    C: Fn(&F, &P) -> Result<A, E> + Send + Sync + 'static,
{
    type Function = F;
    type Params = P;
    type Artifact = A;
    type Error = E;

    fn compile(&self, function: &F, params: &P) -> Result<A, E> {
        (self.compile)(function, params)
    }
}

impl<F, P, A, E, C> Debug for FnBackend<F, P, A, E, C> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.pad("FnBackend(..)")
    }
}
