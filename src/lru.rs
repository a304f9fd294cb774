use std::collections::HashMap;
use std::hash::Hash;

use slab::Slab;

/// A size-bounded map with least-recently-used eviction.
///
/// Lookups and insertions promote the touched key to most recently used.
/// Eviction happens only in [`clean`](Self::clean), so the map may
/// transiently exceed its capacity between clean points.
pub struct Lru<K, V> {
    max: usize,
    map: HashMap<K, usize>,
    nodes: Slab<Node<K, V>>,
    newest: Option<usize>,
    oldest: Option<usize>,
    dispose: Box<dyn Fn(K, V)>,
}

/// One slot in the recency list.
struct Node<K, V> {
    key: K,
    value: V,
    newer: Option<usize>,
    older: Option<usize>,
}

impl<K: Eq + Hash + Clone, V> Lru<K, V> {
    /// Create a container with the given capacity and disposer.
    ///
    /// The disposer runs synchronously, exactly once, for every entry
    /// removed by [`delete`](Self::delete) or [`clean`](Self::clean), before
    /// the key is detached from the map.
    pub fn new(max: usize, dispose: impl Fn(K, V) + 'static) -> Self {
        Self {
            max,
            map: HashMap::new(),
            nodes: Slab::new(),
            newest: None,
            oldest: None,
            dispose: Box::new(dispose),
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the container is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Whether the key is present, without promoting it.
    pub fn has(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    /// Retrieve the value for a key and promote it.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let index = *self.map.get(key)?;
        self.touch(index);
        Some(&self.nodes[index].value)
    }

    /// Insert or replace the value for a key and promote it.
    ///
    /// Returns the displaced value when the key was already present. The
    /// disposer does not run on it; the caller decides its fate.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        if let Some(&index) = self.map.get(&key) {
            self.touch(index);
            return Some(std::mem::replace(&mut self.nodes[index].value, value));
        }
        let index = self.nodes.insert(Node {
            key: key.clone(),
            value,
            newer: None,
            older: self.newest,
        });
        if let Some(head) = self.newest {
            self.nodes[head].newer = Some(index);
        }
        self.newest = Some(index);
        if self.oldest.is_none() {
            self.oldest = Some(index);
        }
        self.map.insert(key, index);
        None
    }

    /// Remove the entry for a key, running the disposer on it.
    pub fn delete(&mut self, key: &K) -> bool {
        match self.map.get(key).copied() {
            Some(index) => {
                let node = self.remove(index);
                (self.dispose)(node.key, node.value);
                self.map.remove(key);
                true
            }
            None => false,
        }
    }

    /// Evict least-recently-used entries until the capacity holds.
    pub fn clean(&mut self) {
        while self.map.len() > self.max {
            let Some(index) = self.oldest else { break };
            let node = self.remove(index);
            let key = node.key.clone();
            (self.dispose)(node.key, node.value);
            self.map.remove(&key);
        }
    }

    /// Unlink a node and take it out of the slab.
    fn remove(&mut self, index: usize) -> Node<K, V> {
        self.unlink(index);
        self.nodes.remove(index)
    }

    /// Move a node to the most recently used position.
    fn touch(&mut self, index: usize) {
        if self.newest == Some(index) {
            return;
        }
        self.unlink(index);
        let node = &mut self.nodes[index];
        node.older = self.newest;
        node.newer = None;
        if let Some(head) = self.newest {
            self.nodes[head].newer = Some(index);
        }
        self.newest = Some(index);
        if self.oldest.is_none() {
            self.oldest = Some(index);
        }
    }

    /// Detach a node from the recency list.
    fn unlink(&mut self, index: usize) {
        let (newer, older) = {
            let node = &mut self.nodes[index];
            (node.newer.take(), node.older.take())
        };
        match newer {
            Some(n) => self.nodes[n].older = older,
            None => self.newest = older,
        }
        match older {
            Some(o) => self.nodes[o].newer = newer,
            None => self.oldest = newer,
        }
    }
}
