use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::entry::{current_parent, NodeRef, PARENT};

/// Run a callable without a current parent.
///
/// Wrapper calls inside the callable register no dependency on the caller;
/// the previous parent is restored on exit.
pub fn no_context<R>(body: impl FnOnce() -> R) -> R {
    PARENT.with(|slot| slot.without_value(body))
}

/// Capture the current parent for later reinstatement.
///
/// The returned callable runs `body` with the captured parent installed, no
/// matter where it is invoked from.
pub fn bind_context<R>(body: impl Fn() -> R) -> impl Fn() -> R {
    let captured = current_parent();
    move || PARENT.with(|slot| slot.with_captured(captured.clone(), &body))
}

/// Reinstate the captured parent around every poll of a future.
///
/// Dependency registration in cooperative user code survives suspension
/// points only when the future is wrapped this way; otherwise a dependency
/// may be attributed to the wrong parent or to none at all.
pub fn bind_future<F: Future>(future: F) -> BoundFuture<F> {
    BoundFuture { captured: current_parent(), future: Box::pin(future) }
}

/// A future polled with a captured parent installed.
pub struct BoundFuture<F> {
    captured: Option<NodeRef>,
    future: Pin<Box<F>>,
}

impl<F: Future> Future for BoundFuture<F> {
    type Output = F::Output;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let captured = this.captured.clone();
        let future = this.future.as_mut();
        PARENT.with(|slot| slot.with_captured(captured, || future.poll(cx)))
    }
}
