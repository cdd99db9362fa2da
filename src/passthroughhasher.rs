use std::collections::HashMap;
use std::hash::{BuildHasher, Hasher};

use crate::Key;

/// Hash map that re-uses a key's 128-bit identity as the hash value.
pub(crate) type KeyMap<Value> = HashMap<Key, Value, BuildPassthroughHasher>;

#[derive(Copy, Clone, Default)]
pub(crate) struct BuildPassthroughHasher;

#[derive(Default)]
pub(crate) struct PassthroughHasher {
    value: u64,
}

impl Hasher for PassthroughHasher {
    #[inline(always)]
    fn finish(&self) -> u64 {
        self.value
    }

    #[inline]
    fn write(&mut self, _bytes: &[u8]) {
        unimplemented!("keys only write a single u128")
    }

    #[inline]
    fn write_u128(&mut self, i: u128) {
        // Fold both halves into the table hash.
        self.value = (i as u64) ^ ((i >> 64) as u64);
    }
}

impl BuildHasher for BuildPassthroughHasher {
    type Hasher = PassthroughHasher;

    #[inline]
    fn build_hasher(&self) -> PassthroughHasher {
        PassthroughHasher::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_map_lookup() {
        let mut map = KeyMap::default();
        map.insert(Key::from_raw(1), "one");
        map.insert(Key::from_raw(1 << 64), "high");
        assert_eq!(map.get(&Key::from_raw(1)), Some(&"one"));
        assert_eq!(map.get(&Key::from_raw(1 << 64)), Some(&"high"));
        assert_eq!(map.get(&Key::from_raw(2)), None);
    }
}
