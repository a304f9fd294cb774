use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use rememo::{bind_context, bind_future, no_context, wrap, Error};

#[test]
fn test_no_context() {
    let source = Rc::new(Cell::new(1u8));
    let child = {
        let source = source.clone();
        wrap(move |_: &()| Ok::<u8, Error<()>>(source.get()))
    };
    let (parent_calls, parent) = {
        let calls = Rc::new(Cell::new(0usize));
        let child = child.clone();
        let calls_ = calls.clone();
        (
            calls,
            wrap(move |_: &()| {
                calls_.set(calls_.get() + 1);
                Ok::<u8, Error<()>>(no_context(|| child.call(())).unwrap_or(0))
            }),
        )
    };

    assert_eq!(parent.call(()), Ok(1));

    // The non-reactive read created no edge, so the parent stays clean.
    source.set(2);
    child.dirty(&());
    assert_eq!(child.call(()), Ok(2));
    assert_eq!(parent.call(()), Ok(1));
    assert_eq!(parent_calls.get(), 1);
}

#[test]
fn test_bind_context() {
    let source = Rc::new(Cell::new(1u8));
    let child = {
        let source = source.clone();
        wrap(move |_: &()| Ok::<u8, Error<()>>(source.get()))
    };
    let stash: Rc<RefCell<Option<Box<dyn Fn()>>>> = Rc::new(RefCell::new(None));
    let (parent_calls, parent) = {
        let calls = Rc::new(Cell::new(0usize));
        let child = child.clone();
        let stash = stash.clone();
        let calls_ = calls.clone();
        (
            calls,
            wrap(move |_: &()| {
                calls_.set(calls_.get() + 1);
                let child = child.clone();
                *stash.borrow_mut() = Some(Box::new(bind_context(move || {
                    let _ = child.call(());
                })));
                Ok::<u8, Error<()>>(0)
            }),
        )
    };

    assert_eq!(parent.call(()), Ok(0));

    // Invoked at the top level, the bound callable still attributes the
    // child read to the parent captured at bind time.
    let bound = stash.borrow_mut().take().expect("callback stashed");
    bound();

    source.set(2);
    child.dirty(&());
    assert_eq!(parent.call(()), Ok(0));
    assert_eq!(parent_calls.get(), 2);
}

#[test]
fn test_unbound_callback_registers_nothing() {
    let source = Rc::new(Cell::new(1u8));
    let child = {
        let source = source.clone();
        wrap(move |_: &()| Ok::<u8, Error<()>>(source.get()))
    };
    let (parent_calls, parent) = {
        let calls = Rc::new(Cell::new(0usize));
        let calls_ = calls.clone();
        (calls, wrap(move |_: &()| {
            calls_.set(calls_.get() + 1);
            Ok::<u8, Error<()>>(0)
        }))
    };

    assert_eq!(parent.call(()), Ok(0));

    // A plain top-level read has no parent to attach to.
    let _ = child.call(());

    source.set(2);
    child.dirty(&());
    assert_eq!(parent.call(()), Ok(0));
    assert_eq!(parent_calls.get(), 1);
}

#[test]
fn test_bound_future() {
    let source = Rc::new(Cell::new(1u8));
    let child = {
        let source = source.clone();
        wrap(move |_: &()| Ok::<u8, Error<()>>(source.get()))
    };
    let stash: Rc<RefCell<Option<Pin<Box<dyn Future<Output = ()>>>>>> =
        Rc::new(RefCell::new(None));
    let (parent_calls, parent) = {
        let calls = Rc::new(Cell::new(0usize));
        let child = child.clone();
        let stash = stash.clone();
        let calls_ = calls.clone();
        (
            calls,
            wrap(move |_: &()| {
                calls_.set(calls_.get() + 1);
                let child = child.clone();
                *stash.borrow_mut() = Some(Box::pin(bind_future(async move {
                    let _ = child.call(());
                })));
                Ok::<u8, Error<()>>(0)
            }),
        )
    };

    assert_eq!(parent.call(()), Ok(0));

    // Polling happens at the top level, but the wrapped future reinstates
    // the captured parent around the resumption.
    let mut future = stash.borrow_mut().take().expect("future stashed");
    let mut cx = Context::from_waker(Waker::noop());
    assert!(matches!(future.as_mut().poll(&mut cx), Poll::Ready(())));

    source.set(2);
    child.dirty(&());
    assert_eq!(parent.call(()), Ok(0));
    assert_eq!(parent_calls.get(), 2);
}
