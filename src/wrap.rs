use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::rc::{Rc, Weak};

use crate::entry::{self, current_parent, set_dirty, Entry, EntryFn, NodeRef};
use crate::key::{default_cache_key, CacheKey, Keys};
use crate::lru::Lru;
use crate::value::{Error, SubscribeFn};

/// The default capacity of a wrapper's cache.
pub const DEFAULT_MAX: usize = 1 << 16;

thread_local! {
    /// Caches that saw a write since the last quiescent point.
    static PENDING_CLEAN: RefCell<Vec<Weak<dyn Clean>>> = const { RefCell::new(Vec::new()) };
    /// Entries removed from a cache, disposed outside the cache borrow.
    static DISPOSALS: RefCell<Vec<NodeRef>> = const { RefCell::new(Vec::new()) };
}

/// A cache that can evict down to capacity.
trait Clean {
    fn clean(&self);
}

/// Register a cache for cleaning at the next quiescent point.
fn schedule_clean(cache: Weak<dyn Clean>) {
    PENDING_CLEAN.with(|pending| {
        let mut pending = pending.borrow_mut();
        if !pending.iter().any(|known| known.ptr_eq(&cache)) {
            pending.push(cache);
        }
    });
}

/// Clean every pending cache once the graph is quiescent.
///
/// Deferring eviction to quiescent points guarantees that no entry on the
/// live recomputation stack is torn down.
fn run_pending_cleans() {
    loop {
        let next = PENDING_CLEAN.with(|pending| pending.borrow_mut().pop());
        match next {
            Some(cache) => {
                if let Some(cache) = cache.upgrade() {
                    cache.clean();
                }
            }
            None => break,
        }
    }
}

/// Queue a removed entry for disposal.
fn schedule_dispose(node: NodeRef) {
    DISPOSALS.with(|queue| queue.borrow_mut().push(node));
}

/// Dispose queued entries. Disposal may queue more; the loop drains those
/// too, which keeps reentrant evictions off the cache borrow.
fn drain_disposals() {
    loop {
        let next = DISPOSALS.with(|queue| queue.borrow_mut().pop());
        match next {
            Some(node) => node.dispose(),
            None => break,
        }
    }
}

/// Configuration for [`wrap_with`].
pub struct Options<A> {
    /// The cache capacity, enforced at quiescent points.
    pub max: usize,
    /// Derives the cache key for a call; `None` bypasses the cache for that
    /// call entirely.
    pub make_key: Option<Box<dyn Fn(&A) -> Option<CacheKey>>>,
    /// Establishes a change notification per entry.
    pub subscribe: Option<SubscribeFn<A>>,
    /// Evict entries as soon as no parent observes them.
    pub disposable: bool,
}

impl<A> Default for Options<A> {
    fn default() -> Self {
        Self { max: DEFAULT_MAX, make_key: None, subscribe: None, disposable: false }
    }
}

/// Wrap a computation with the default options.
pub fn wrap<A, T, E, F>(function: F) -> Wrapper<A, T, E>
where
    A: Keys + 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
    F: Fn(&A) -> Result<T, Error<E>> + 'static,
{
    wrap_with(function, Options::default())
}

/// Wrap a computation in a dependency-tracking cache.
///
/// The returned wrapper memoizes results per cache key, records which other
/// wrapped computations each evaluation consulted, and recomputes lazily
/// once any transitive dependency has been dirtied.
pub fn wrap_with<A, T, E, F>(function: F, options: Options<A>) -> Wrapper<A, T, E>
where
    A: Keys + 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
    F: Fn(&A) -> Result<T, Error<E>> + 'static,
{
    let make_key = options
        .make_key
        .unwrap_or_else(|| Box::new(|args: &A| Some(default_cache_key(args))));
    Wrapper {
        inner: Rc::new(Inner {
            function: Rc::new(function),
            make_key,
            subscribe: options.subscribe,
            disposable: options.disposable,
            max: options.max,
            cache: RefCell::new(Lru::new(options.max, |_, entry: Rc<Entry<A, T, E>>| {
                schedule_dispose(entry);
            })),
        }),
    }
}

/// A memoized computation with dependency tracking.
///
/// Cheap to clone; clones share the cache.
pub struct Wrapper<A, T, E> {
    inner: Rc<Inner<A, T, E>>,
}

impl<A, T, E> Clone for Wrapper<A, T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<A, T, E> Debug for Wrapper<A, T, E> {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("Wrapper")
            .field("size", &self.inner.cache.borrow().len())
            .field("max", &self.inner.max)
            .finish()
    }
}

struct Inner<A, T, E> {
    function: EntryFn<A, T, E>,
    make_key: Box<dyn Fn(&A) -> Option<CacheKey>>,
    subscribe: Option<SubscribeFn<A>>,
    disposable: bool,
    max: usize,
    cache: RefCell<Lru<CacheKey, Rc<Entry<A, T, E>>>>,
}

impl<A, T, E> Wrapper<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    /// Invoke the computation, serving a cached result when possible.
    pub fn call(&self, args: A) -> Result<T, Error<E>> {
        let Some(key) = (self.inner.make_key)(&args) else {
            return (self.inner.function)(&args);
        };
        let entry = self.entry(key);
        let result = entry.recompute(args);
        self.inner.cache.borrow_mut().set(key, entry.clone());
        if current_parent().is_none() {
            let node: NodeRef = entry;
            entry::maybe_report_orphan(&node);
            drain_disposals();
        }
        let dyn_inner: Rc<dyn Clean> = self.inner.clone();
        let weak: Weak<dyn Clean> = Rc::downgrade(&dyn_inner);
        schedule_clean(weak);
        if current_parent().is_none() {
            run_pending_cleans();
        }
        result
    }

    /// The key a call with these arguments would use.
    pub fn get_key(&self, args: &A) -> Option<CacheKey> {
        (self.inner.make_key)(args)
    }

    /// Mark the entry for these arguments dirty.
    pub fn dirty(&self, args: &A) {
        if let Some(key) = self.get_key(args) {
            self.dirty_key(key);
        }
    }

    /// Mark the entry for a key dirty.
    pub fn dirty_key(&self, key: CacheKey) {
        if let Some(entry) = self.lookup(key) {
            let node: NodeRef = entry;
            set_dirty(&node);
        }
    }

    /// The cached value for these arguments, without recomputing and
    /// without registering a dependency.
    pub fn peek(&self, args: &A) -> Option<T> {
        self.get_key(args).and_then(|key| self.peek_key(key))
    }

    /// The cached value for a key.
    pub fn peek_key(&self, key: CacheKey) -> Option<T> {
        self.lookup(key).and_then(|entry| entry.peek())
    }

    /// Drop the entry for these arguments, severing it from the graph.
    pub fn forget(&self, args: &A) -> bool {
        self.get_key(args).is_some_and(|key| self.forget_key(key))
    }

    /// Drop the entry for a key.
    pub fn forget_key(&self, key: CacheKey) -> bool {
        self.inner.forget_key(key)
    }

    /// Number of live entries.
    pub fn size(&self) -> usize {
        self.inner.cache.borrow().len()
    }

    /// The configured cache capacity.
    pub fn max(&self) -> usize {
        self.inner.max
    }

    /// Find or create the entry for a key.
    fn entry(&self, key: CacheKey) -> Rc<Entry<A, T, E>> {
        if let Some(entry) = self.inner.cache.borrow_mut().get(&key) {
            return entry.clone();
        }
        let entry = Entry::new(
            self.inner.function.clone(),
            self.inner.subscribe.clone(),
            self.inner.disposable,
        );
        let weak = Rc::downgrade(&self.inner);
        entry.set_forget(move || {
            if let Some(inner) = weak.upgrade() {
                inner.forget_key(key);
            }
        });
        self.inner.cache.borrow_mut().set(key, entry.clone());
        entry
    }

    fn lookup(&self, key: CacheKey) -> Option<Rc<Entry<A, T, E>>> {
        self.inner.cache.borrow_mut().get(&key).cloned()
    }
}

impl<A, T, E> Inner<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    fn forget_key(&self, key: CacheKey) -> bool {
        let deleted = self.cache.borrow_mut().delete(&key);
        drain_disposals();
        deleted
    }
}

impl<A, T, E> Clean for Inner<A, T, E>
where
    A: 'static,
    T: Clone + PartialEq + 'static,
    E: Clone + PartialEq + 'static,
{
    fn clean(&self) {
        self.cache.borrow_mut().clean();
        drain_disposals();
    }
}
