//! Reactive memoization.
//!
//! A [`Wrapper`] memoizes a computation per argument tuple and records which
//! other wrapped computations each evaluation consulted. Dirtying any entry
//! propagates a push-based "might be dirty" signal to everything that
//! depends on it; the next read walks only the dirty subtree and recomputes
//! lazily, serving cached values wherever the inputs turn out unchanged.
//!
//! ```
//! use rememo::{wrap, Error};
//!
//! let double = wrap(|args: &(i32,)| Ok::<i32, Error<()>>(2 * args.0));
//! assert_eq!(double.call((21,)), Ok(42));
//! assert_eq!(double.call((21,)), Ok(42));
//!
//! double.dirty(&(21,));
//! assert_eq!(double.call((21,)), Ok(42));
//! ```
//!
//! Errors are cached like values: a computation that fails keeps returning
//! the same error until it is dirtied or forgotten. Entries are evicted
//! under a bounded LRU policy once the graph is quiescent.

mod context;
mod dep;
mod entry;
mod hash;
mod key;
mod lru;
mod slot;
mod value;
mod wrap;

pub use context::{bind_context, bind_future, no_context, BoundFuture};
pub use dep::{Dep, DepOptions, DirtyMethod};
pub use key::{default_cache_key, CacheKey, KeyTrie, Keys};
pub use lru::Lru;
pub use slot::Slot;
pub use value::{Error, SubscribeError, SubscribeFn, Unsubscribe};
pub use wrap::{wrap, wrap_with, Options, Wrapper, DEFAULT_MAX};
