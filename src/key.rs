use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::hash::siphash;

/// The process-global trie behind [`default_cache_key`].
static DEFAULT_TRIE: Mutex<KeyTrie> = Mutex::new(KeyTrie::new());

/// The next key identity.
static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// Mint a fresh key identity.
fn mint() -> CacheKey {
    let id = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
    CacheKey(NonZeroU64::new(id).unwrap_or(NonZeroU64::MAX))
}

/// A stable identity for one sequence of key arguments.
///
/// Two sequences whose elements hash pairwise equal produce the same
/// identity for the lifetime of the process.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CacheKey(NonZeroU64);

/// Canonicalize a tuple of key arguments through the global trie.
pub fn default_cache_key<K: Keys>(keys: &K) -> CacheKey {
    DEFAULT_TRIE.lock().lookup(keys)
}

/// A trie that canonicalizes argument sequences into key identities.
///
/// Each level branches on the 128-bit hash of one element; the terminal node
/// mints an identity on first visit and returns the same identity on every
/// later visit. Only hashes are retained, so the trie never keeps argument
/// values alive.
pub struct KeyTrie {
    root: TrieNode,
}

struct TrieNode {
    key: Option<CacheKey>,
    children: Option<HashMap<u128, TrieNode>>,
}

impl KeyTrie {
    /// Create an empty trie.
    pub const fn new() -> Self {
        Self { root: TrieNode { key: None, children: None } }
    }

    /// Canonicalize a tuple of key arguments.
    pub fn lookup<K: Keys>(&mut self, keys: &K) -> CacheKey {
        let mut hashes = Vec::new();
        keys.write(&mut hashes);
        self.lookup_array(&hashes)
    }

    /// Canonicalize a pre-hashed element sequence.
    pub fn lookup_array(&mut self, hashes: &[u128]) -> CacheKey {
        let mut node = &mut self.root;
        for &hash in hashes {
            node = node
                .children
                .get_or_insert_with(HashMap::new)
                .entry(hash)
                .or_insert_with(|| TrieNode { key: None, children: None });
        }
        *node.key.get_or_insert_with(mint)
    }
}

impl Default for KeyTrie {
    fn default() -> Self {
        Self::new()
    }
}

/// A tuple of hashable key arguments.
pub trait Keys {
    /// Append the 128-bit hash of each element.
    fn write(&self, hashes: &mut Vec<u128>);
}

macro_rules! tuple_keys {
    ($($idx:tt: $letter:ident),*) => {
        #[allow(unused_variables)]
        impl<$($letter: Hash),*> Keys for ($($letter,)*) {
            fn write(&self, hashes: &mut Vec<u128>) {
                $(hashes.push(siphash(&self.$idx));)*
            }
        }
    };
}

tuple_keys! {}
tuple_keys! { 0: A }
tuple_keys! { 0: A, 1: B }
tuple_keys! { 0: A, 1: B, 2: C }
tuple_keys! { 0: A, 1: B, 2: C, 3: D }
tuple_keys! { 0: A, 1: B, 2: C, 3: D, 4: E }
tuple_keys! { 0: A, 1: B, 2: C, 3: D, 4: E, 5: F }
tuple_keys! { 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G }
tuple_keys! { 0: A, 1: B, 2: C, 3: D, 4: E, 5: F, 6: G, 7: H }
