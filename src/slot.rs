use std::cell::RefCell;

/// A dynamically scoped single-value cell.
///
/// The installed value is visible to everything below the
/// [`with_value`](Self::with_value) call on the stack and is restored on
/// every exit path, including unwinding.
pub struct Slot<T> {
    value: RefCell<Option<T>>,
}

impl<T> Slot<T> {
    /// Create an empty slot.
    pub const fn new() -> Self {
        Self { value: RefCell::new(None) }
    }

    /// Run `body` with `value` installed.
    pub fn with_value<R>(&self, value: T, body: impl FnOnce() -> R) -> R {
        self.with_captured(Some(value), body)
    }

    /// Run `body` with the slot cleared.
    pub fn without_value<R>(&self, body: impl FnOnce() -> R) -> R {
        self.with_captured(None, body)
    }

    /// Run `body` with a previously captured state reinstated.
    pub fn with_captured<R>(&self, value: Option<T>, body: impl FnOnce() -> R) -> R {
        let _guard = Restore { slot: self, prev: Some(self.value.replace(value)) };
        body()
    }

    /// The installed value, if any.
    pub fn get_value(&self) -> Option<T>
    where
        T: Clone,
    {
        self.value.borrow().clone()
    }

    /// Whether a value is installed.
    pub fn has_value(&self) -> bool {
        self.value.borrow().is_some()
    }
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previous slot state on drop.
struct Restore<'a, T> {
    slot: &'a Slot<T>,
    prev: Option<Option<T>>,
}

impl<T> Drop for Restore<'_, T> {
    fn drop(&mut self) {
        if let Some(prev) = self.prev.take() {
            self.slot.value.replace(prev);
        }
    }
}
