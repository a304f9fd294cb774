use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::{Rc, Weak};

use crate::slot::Slot;
use crate::value::{Error, SubscribeError, SubscribeFn, Unsubscribe, Value};

thread_local! {
    /// The node currently recomputing, visible to nested wrapper calls.
    pub(crate) static PARENT: Slot<NodeRef> = const { Slot::new() };
    /// Recycled dirty-children sets.
    static SET_POOL: RefCell<Vec<HashSet<NodeId>>> = const { RefCell::new(Vec::new()) };
}

/// Cap on the number of pooled dirty-children sets.
const POOL_TARGET_SIZE: usize = 100;

/// A shared handle to a graph node.
pub(crate) type NodeRef = Rc<dyn Node>;

/// The callable wrapped by an entry.
pub(crate) type EntryFn<A, T, E> = Rc<dyn Fn(&A) -> Result<T, Error<E>>>;

/// The node currently recomputing, if any.
pub(crate) fn current_parent() -> Option<NodeRef> {
    PARENT.with(|slot| slot.get_value())
}

/// Uniquely identifies a node within the thread's dependency graph.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct NodeId(u64);

impl NodeId {
    fn next() -> Self {
        thread_local! {
            static NEXT: Cell<u64> = const { Cell::new(0) };
        }
        NEXT.with(|cell| {
            let id = cell.get();
            cell.set(id + 1);
            NodeId(id)
        })
    }
}

/// A node in the dependency graph: a memoized entry or a dep leaf.
pub(crate) trait Node: 'static {
    /// The edge and dirtiness bookkeeping shared by all node kinds.
    fn links(&self) -> &Links;

    /// Discard the cached value when the node is marked dirty.
    fn clear_value(&self);

    /// Fire the pending unsubscribe, if any.
    fn drop_subscription(&self);

    /// A snapshot of the current value for later comparison.
    fn snapshot(&self) -> Box<dyn Any>;

    /// Whether the current value still matches an earlier snapshot.
    fn matches(&self, observed: &dyn Any) -> bool;

    /// Bring a might-be-dirty node up to date without registering a parent
    /// edge. Returns false when the refreshed value is an error.
    fn refresh(self: Rc<Self>) -> bool;

    /// Sever all edges, dirty all former parents, and fire unsubscribe.
    fn dispose(self: Rc<Self>);

    /// Remove the node from its owning cache, triggering dispose.
    fn forget(self: Rc<Self>);

    /// Drop the node if it is disposable and no parent observes it.
    fn report_orphan(self: Rc<Self>);
}

/// Edge and dirtiness bookkeeping shared by entries and dep sets.
///
/// Down-edges in `child_values` are strong, up-edges in `parents` are weak;
/// the graph is dismantled through the cache dispose path, which severs both
/// directions.
pub(crate) struct Links {
    id: NodeId,
    dirty: Cell<bool>,
    parents: RefCell<HashMap<NodeId, Weak<dyn Node>>>,
    child_values: RefCell<HashMap<NodeId, ChildSlot>>,
    dirty_children: RefCell<Option<HashSet<NodeId>>>,
}

/// A child edge together with the value observed through it.
///
/// `observed` is `None` while the child is registered but not yet observed.
struct ChildSlot {
    node: NodeRef,
    observed: Option<Box<dyn Any>>,
}

impl Links {
    pub fn new(dirty: bool) -> Self {
        Self {
            id: NodeId::next(),
            dirty: Cell::new(dirty),
            parents: RefCell::new(HashMap::new()),
            child_values: RefCell::new(HashMap::new()),
            dirty_children: RefCell::new(None),
        }
    }

    /// The still-live parents of this node.
    pub fn parent_nodes(&self) -> Vec<NodeRef> {
        self.parents.borrow().values().filter_map(Weak::upgrade).collect()
    }

    /// Whether any parent currently observes this node.
    pub fn has_parents(&self) -> bool {
        self.parents.borrow().values().any(|weak| weak.strong_count() > 0)
    }

    /// Drop all up-edges.
    pub fn clear_parents(&self) {
        self.parents.borrow_mut().clear();
    }
}

/// Whether a node is dirty or has a dirty descendant.
pub(crate) fn might_be_dirty(links: &Links) -> bool {
    links.dirty.get()
        || links.dirty_children.borrow().as_ref().is_some_and(|set| !set.is_empty())
}

/// Mark a node dirty and tell its parents.
pub(crate) fn set_dirty(node: &NodeRef) {
    let links = node.links();
    if links.dirty.get() {
        return;
    }
    links.dirty.set(true);
    node.clear_value();
    report_dirty(node);
    node.drop_subscription();
}

/// Clear the explicit dirty flag, telling parents when fully clean.
pub(crate) fn set_clean(node: &NodeRef) {
    node.links().dirty.set(false);
    if might_be_dirty(node.links()) {
        return;
    }
    report_clean(node);
}

/// Tell every parent that `child` might be dirty.
fn report_dirty(child: &NodeRef) {
    for parent in child.links().parent_nodes() {
        report_dirty_child(&parent, child);
    }
}

/// Tell every parent that `child` is clean again.
fn report_clean(child: &NodeRef) {
    for parent in child.links().parent_nodes() {
        report_clean_child(&parent, child);
    }
}

/// Record a might-be-dirty child, recursing upward on first notice.
///
/// A child already present in the parent's dirty set has sent its upward
/// message before, so the recursion terminates there.
fn report_dirty_child(parent: &NodeRef, child: &NodeRef) {
    let links = parent.links();
    debug_assert!(links.child_values.borrow().contains_key(&child.links().id));
    let inserted = {
        let mut dirty_children = links.dirty_children.borrow_mut();
        dirty_children.get_or_insert_with(take_pooled_set).insert(child.links().id)
    };
    if inserted {
        report_dirty(parent);
    }
}

/// Record a clean child, comparing its value to the last observation.
fn report_clean_child(parent: &NodeRef, child: &NodeRef) {
    debug_assert!(!child.links().dirty.get());
    let changed = {
        let mut child_values = parent.links().child_values.borrow_mut();
        let Some(slot) = child_values.get_mut(&child.links().id) else { return };
        if let Some(prev) = &slot.observed {
            !child.matches(prev.as_ref())
        } else {
            slot.observed = Some(child.snapshot());
            false
        }
    };
    if changed {
        set_dirty(parent);
    }
    remove_dirty_child(parent, child.links().id);
    if might_be_dirty(parent.links()) {
        return;
    }
    report_clean(parent);
}

/// Drop a child from the parent's dirty set, recycling emptied sets.
fn remove_dirty_child(parent: &NodeRef, child: NodeId) {
    let mut dirty_children = parent.links().dirty_children.borrow_mut();
    let emptied = match dirty_children.as_mut() {
        Some(set) => {
            set.remove(&child);
            set.is_empty()
        }
        None => false,
    };
    if emptied {
        if let Some(set) = dirty_children.take() {
            return_pooled_set(set);
        }
    }
}

/// Attach `child` to the currently recomputing node, if any.
pub(crate) fn remember_parent(child: &NodeRef) {
    let Some(parent) = current_parent() else { return };
    parent
        .links()
        .child_values
        .borrow_mut()
        .entry(child.links().id)
        .or_insert_with(|| ChildSlot { node: child.clone(), observed: None });
    child
        .links()
        .parents
        .borrow_mut()
        .insert(parent.links().id, Rc::downgrade(&parent));
    if might_be_dirty(child.links()) {
        report_dirty_child(&parent, child);
    } else {
        report_clean_child(&parent, child);
    }
}

/// Sever all child edges, returning the former children.
///
/// Run before a recomputation: the computation may consult a different set
/// of dependencies, and stale ones must not persist.
pub(crate) fn forget_children(parent: &NodeRef) -> Vec<NodeRef> {
    let parent_id = parent.links().id;
    let slots: Vec<ChildSlot> = {
        let mut child_values = parent.links().child_values.borrow_mut();
        child_values.drain().map(|(_, slot)| slot).collect()
    };
    let mut children = Vec::with_capacity(slots.len());
    for slot in slots {
        slot.node.links().parents.borrow_mut().remove(&parent_id);
        children.push(slot.node);
    }
    if let Some(set) = parent.links().dirty_children.borrow_mut().take() {
        return_pooled_set(set);
    }
    children
}

/// Sever one child edge in both directions.
pub(crate) fn forget_child(parent: &NodeRef, child: &NodeRef) {
    child.links().parents.borrow_mut().remove(&parent.links().id);
    parent.links().child_values.borrow_mut().remove(&child.links().id);
    remove_dirty_child(parent, child.links().id);
}

/// Evict a node that is disposable and no longer observed.
pub(crate) fn maybe_report_orphan(node: &NodeRef) {
    if !node.links().has_parents() {
        node.clone().report_orphan();
    }
}

fn take_pooled_set() -> HashSet<NodeId> {
    SET_POOL.with(|pool| pool.borrow_mut().pop()).unwrap_or_default()
}

fn return_pooled_set(mut set: HashSet<NodeId>) {
    set.clear();
    SET_POOL.with(|pool| {
        let mut pool = pool.borrow_mut();
        if pool.len() < POOL_TARGET_SIZE {
            pool.push(set);
        }
    });
}

/// A single memoized computation in the dependency graph.
///
/// Owns its function, its last arguments, its cached value, and its
/// subscription. All parent and child bookkeeping lives in [`Links`].
pub(crate) struct Entry<A, T, E> {
    links: Links,
    function: EntryFn<A, T, E>,
    args: RefCell<Option<A>>,
    value: RefCell<Value<T, E>>,
    recomputing: Cell<bool>,
    subscribe: Option<SubscribeFn<A>>,
    unsubscribe: RefCell<Option<Unsubscribe>>,
    /// Removes the entry from its owning cache.
    forget: RefCell<Option<Box<dyn Fn()>>>,
    disposable: bool,
}

impl<A, T, E> Entry<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    pub fn new(
        function: EntryFn<A, T, E>,
        subscribe: Option<SubscribeFn<A>>,
        disposable: bool,
    ) -> Rc<Self> {
        Rc::new(Self {
            links: Links::new(true),
            function,
            args: RefCell::new(None),
            value: RefCell::new(Value::Unknown),
            recomputing: Cell::new(false),
            subscribe,
            unsubscribe: RefCell::new(None),
            forget: RefCell::new(None),
            disposable,
        })
    }

    /// Install the upcall that evicts this entry from its cache.
    pub fn set_forget(&self, forget: impl Fn() + 'static) {
        *self.forget.borrow_mut() = Some(Box::new(forget));
    }

    fn as_node(self: &Rc<Self>) -> NodeRef {
        self.clone()
    }

    /// Return the cached value, recomputing as little as possible.
    ///
    /// Registers this entry as a child of the currently recomputing node
    /// and overwrites the stored arguments, so a later recomputation sees
    /// the latest ones even after a cache hit.
    pub fn recompute(self: &Rc<Self>, args: A) -> Result<T, Error<E>> {
        if self.recomputing.get() {
            return Err(Error::Recursive);
        }
        *self.args.borrow_mut() = Some(args);
        remember_parent(&self.as_node());
        self.recompute_if_dirty()
    }

    /// The cached value, when clean and successfully computed.
    ///
    /// Never recomputes and never registers a parent edge.
    pub fn peek(&self) -> Option<T> {
        if might_be_dirty(&self.links) {
            return None;
        }
        match &*self.value.borrow() {
            Value::Ok(value) => Some(value.clone()),
            _ => None,
        }
    }

    fn recompute_if_dirty(self: &Rc<Self>) -> Result<T, Error<E>> {
        if self.links.dirty.get() {
            return self.really_recompute();
        }
        for child in self.dirty_child_nodes() {
            if !child.refresh() {
                self.links.dirty.set(true);
            }
        }
        if self.links.dirty.get() {
            return self.really_recompute();
        }
        self.value.borrow().get()
    }

    /// The nodes currently recorded as dirty children.
    fn dirty_child_nodes(&self) -> Vec<NodeRef> {
        let dirty_children = self.links.dirty_children.borrow();
        let Some(set) = dirty_children.as_ref() else { return Vec::new() };
        let child_values = self.links.child_values.borrow();
        set.iter()
            .filter_map(|id| child_values.get(id))
            .map(|slot| slot.node.clone())
            .collect()
    }

    fn really_recompute(self: &Rc<Self>) -> Result<T, Error<E>> {
        if self.recomputing.get() {
            return Err(Error::Recursive);
        }
        let original_children = forget_children(&self.as_node());
        *self.value.borrow_mut() = Value::Unknown;
        let node = self.as_node();
        let result = {
            let _guard = RecomputeGuard::new(&self.recomputing);
            PARENT.with(|slot| {
                slot.with_value(node, || {
                    let args = self.args.borrow();
                    let args =
                        args.as_ref().expect("rememo: entry recomputed before first call");
                    (self.function)(args)
                })
            })
        };
        *self.value.borrow_mut() = match result {
            Ok(value) => Value::Ok(value),
            Err(error) => Value::Err(error),
        };
        if self.maybe_subscribe() {
            set_clean(&self.as_node());
        }
        let outcome = self.value.borrow().get();
        for child in &original_children {
            maybe_report_orphan(child);
        }
        outcome
    }

    /// Re-establish the subscription for the freshly computed value.
    ///
    /// The previous unsubscribe fires first so that at most one disposer is
    /// ever outstanding. A failing subscribe leaves the entry dirty, so the
    /// next read retries both the computation and the subscription.
    fn maybe_subscribe(self: &Rc<Self>) -> bool {
        let Some(subscribe) = &self.subscribe else { return true };
        self.drop_subscription();
        let args = self.args.borrow();
        let Some(args) = args.as_ref() else { return true };
        match subscribe(args) {
            Ok(unsubscribe) => {
                *self.unsubscribe.borrow_mut() = Some(unsubscribe);
                true
            }
            Err(SubscribeError) => false,
        }
    }
}

/// Clears the reentrancy flag on every exit path.
struct RecomputeGuard<'a> {
    flag: &'a Cell<bool>,
}

impl<'a> RecomputeGuard<'a> {
    fn new(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self { flag }
    }
}

impl Drop for RecomputeGuard<'_> {
    fn drop(&mut self) {
        self.flag.set(false);
    }
}

impl<A, T, E> Node for Entry<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    fn links(&self) -> &Links {
        &self.links
    }

    fn clear_value(&self) {
        *self.value.borrow_mut() = Value::Unknown;
    }

    fn drop_subscription(&self) {
        let unsubscribe = self.unsubscribe.borrow_mut().take();
        if let Some(unsubscribe) = unsubscribe {
            unsubscribe();
        }
    }

    fn snapshot(&self) -> Box<dyn Any> {
        Box::new(self.value.borrow().clone())
    }

    fn matches(&self, observed: &dyn Any) -> bool {
        observed
            .downcast_ref::<Value<T, E>>()
            .is_some_and(|prev| self.value.borrow().same(prev))
    }

    fn refresh(self: Rc<Self>) -> bool {
        self.recompute_if_dirty().is_ok()
    }

    fn dispose(self: Rc<Self>) {
        for child in forget_children(&self.as_node()) {
            maybe_report_orphan(&child);
        }
        self.drop_subscription();
        let node = self.as_node();
        for parent in self.links.parent_nodes() {
            set_dirty(&parent);
            forget_child(&parent, &node);
        }
        self.links.clear_parents();
    }

    fn forget(self: Rc<Self>) {
        let forget = self.forget.borrow_mut().take();
        if let Some(forget) = forget {
            forget();
        }
    }

    fn report_orphan(self: Rc<Self>) {
        if self.disposable && !self.links.has_parents() {
            self.forget();
        }
    }
}
