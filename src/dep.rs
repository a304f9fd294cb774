use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use crate::entry::{
    current_parent, forget_child, remember_parent, set_dirty, Links, Node, NodeRef,
};
use crate::value::{SubscribeFn, Unsubscribe};

/// How a dep invalidates its dependents.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub enum DirtyMethod {
    /// Mark dependents dirty, leaving them cached.
    #[default]
    SetDirty,
    /// Sever dependents from the graph.
    Dispose,
    /// Evict dependents from their caches.
    Forget,
}

/// Configuration for [`Dep::with_options`].
pub struct DepOptions<K> {
    /// Establishes a change notification when a key becomes active. The
    /// returned unsubscribe is scoped to that key.
    pub subscribe: Option<SubscribeFn<K>>,
}

impl<K> Default for DepOptions<K> {
    fn default() -> Self {
        Self { subscribe: None }
    }
}

/// A keyed dependency leaf without a wrapped computation.
///
/// Entries that touch a key while recomputing depend on "the thing behind
/// that key"; dirtying the key invalidates all of them at once.
///
/// Cheap to clone; clones share the key table.
pub struct Dep<K> {
    inner: Rc<DepInner<K>>,
}

impl<K> Clone for Dep<K> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<K> fmt::Debug for Dep<K> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dep")
            .field("keys", &self.inner.by_key.borrow().len())
            .finish()
    }
}

struct DepInner<K> {
    by_key: RefCell<HashMap<K, Rc<DepSet>>>,
    subscribe: Option<SubscribeFn<K>>,
}

/// A degenerate graph node standing in for the thing behind one key.
///
/// Its observed value never changes. Invalidation disposes the whole set:
/// member entries are dirtied and severed, and the key's subscription is
/// released.
struct DepSet {
    links: Links,
    unsubscribe: RefCell<Option<Unsubscribe>>,
}

impl DepSet {
    fn new() -> Rc<Self> {
        Rc::new(Self { links: Links::new(false), unsubscribe: RefCell::new(None) })
    }
}

impl Node for DepSet {
    fn links(&self) -> &Links {
        &self.links
    }

    fn clear_value(&self) {}

    fn drop_subscription(&self) {
        let unsubscribe = self.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    fn snapshot(&self) -> Box<dyn Any> {
        Box::new(())
    }

    fn matches(&self, _: &dyn Any) -> bool {
        true
    }

    fn refresh(self: Rc<Self>) -> bool {
        true
    }

    fn dispose(self: Rc<Self>) {
        let node: NodeRef = self.clone();
        for parent in self.links.parent_nodes() {
            set_dirty(&parent);
            forget_child(&parent, &node);
        }
        self.links.clear_parents();
        self.drop_subscription();
    }

    fn forget(self: Rc<Self>) {}

    fn report_orphan(self: Rc<Self>) {}
}

impl<K: Eq + Hash + Clone + 'static> Dep<K> {
    /// Create a dep with the default options.
    pub fn new() -> Self {
        Self::with_options(DepOptions::default())
    }

    /// Create a dep.
    pub fn with_options(options: DepOptions<K>) -> Self {
        Self {
            inner: Rc::new(DepInner {
                by_key: RefCell::new(HashMap::new()),
                subscribe: options.subscribe,
            }),
        }
    }

    /// Record that the currently recomputing entry depends on `key`.
    ///
    /// Outside a recomputation this is a no-op.
    pub fn depend(&self, key: K) {
        if current_parent().is_none() {
            return;
        }
        let (set, created) = {
            let mut by_key = self.inner.by_key.borrow_mut();
            match by_key.get(&key) {
                Some(set) => (set.clone(), false),
                None => {
                    let set = DepSet::new();
                    by_key.insert(key.clone(), set.clone());
                    (set, true)
                }
            }
        };
        let node: NodeRef = set.clone();
        remember_parent(&node);
        if created {
            if let Some(subscribe) = &self.inner.subscribe {
                if let Ok(unsubscribe) = subscribe(&key) {
                    *set.unsubscribe.borrow_mut() = Some(unsubscribe);
                }
            }
        }
    }

    /// Invalidate every entry that depends on `key`.
    pub fn dirty(&self, key: &K) {
        self.dirty_with(key, DirtyMethod::SetDirty);
    }

    /// Invalidate with an explicit method.
    ///
    /// The key's set is discarded and disposed, which dirties its remaining
    /// members, severs its edges, and fires its unsubscribe. Subsequent
    /// reads re-register freshly.
    pub fn dirty_with(&self, key: &K, method: DirtyMethod) {
        let set = self.inner.by_key.borrow_mut().remove(key);
        let Some(set) = set else { return };
        match method {
            DirtyMethod::SetDirty => {}
            DirtyMethod::Dispose => {
                for parent in set.links().parent_nodes() {
                    parent.dispose();
                }
            }
            DirtyMethod::Forget => {
                for parent in set.links().parent_nodes() {
                    parent.forget();
                }
            }
        }
        set.dispose();
    }

    /// Number of active keys.
    pub fn key_count(&self) -> usize {
        self.inner.by_key.borrow().len()
    }
}

impl<K: Eq + Hash + Clone + 'static> Default for Dep<K> {
    fn default() -> Self {
        Self::new()
    }
}
