use std::fmt::{self, Debug, Formatter};
use std::hash::Hash;

use siphasher::sip128::{Hasher128, SipHasher13};

/// The identity of a cached artifact.
///
/// Keys are produced by [`Backend::key`](crate::Backend::key) from a function
/// definition and its pass parameters. The cache compares keys for equality
/// and never looks inside them. Two inputs that yield the same key share one
/// artifact, so derivation must be injective with respect to what the
/// backend would compile.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Key(u128);

impl Key {
    /// Wrap a precomputed 128-bit identity.
    #[inline]
    pub const fn from_raw(raw: u128) -> Self {
        Self(raw)
    }

    /// Derive a key by hashing a function definition and its parameters.
    #[inline]
    pub fn derive<F, P>(function: &F, params: &P) -> Self
    where
        F: Hash + ?Sized,
        P: Hash + ?Sized,
    {
        let mut state = SipHasher13::new();
        function.hash(&mut state);
        params.hash(&mut state);
        Self(state.finish128().as_u128())
    }

    /// The raw 128-bit identity.
    #[inline]
    pub const fn as_raw(self) -> u128 {
        self.0
    }
}

impl Debug for Key {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "Key({:032x})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_is_deterministic() {
        let a = Key::derive("fn(x) = x + 1", &(3u8, true));
        let b = Key::derive("fn(x) = x + 1", &(3u8, true));
        assert_eq!(a, b);
    }

    #[test]
    fn test_derive_separates_params() {
        let a = Key::derive("fn(x) = x + 1", &(3u8, true));
        let b = Key::derive("fn(x) = x + 1", &(3u8, false));
        let c = Key::derive("fn(x) = x + 2", &(3u8, true));
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_debug_is_hex() {
        let key = Key::from_raw(0xab);
        assert_eq!(format!("{key:?}"), format!("Key({:032x})", 0xab));
    }
}
