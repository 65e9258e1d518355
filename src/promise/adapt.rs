//! `lift`/`promisify`: adapters that lift plain/callback-style functions
//! into the promise world.
//!
//! `lift` is naturally variadic; Rust has no variadic generics, so it's
//! provided here at the arities that actually come up (`lift1`..`lift3`,
//! documented in DESIGN.md). `promisify` models "the callback argument
//! is at index `i`" as "the callback is the function's last parameter"
//! — Rust has no reflection to locate an arbitrary argument index, and
//! the last-argument convention is what Node-style callbacks mean by it
//! in practice. A caller whose callback isn't last should partially
//! apply the other arguments first.

use std::rc::Rc;

use crate::scheduler::EventLoop;

use super::{Promise, Resolver};

/// Lifts a one-argument function so it accepts a promise-or-value and
/// returns a promise.
pub fn lift1<A, R, F>(f: F) -> impl Fn(Promise<A>) -> Promise<R>
where
    A: Clone + 'static,
    R: Clone + 'static,
    F: Fn(A) -> R + 'static,
{
    let f = Rc::new(f);
    move |a: Promise<A>| {
        let f = f.clone();
        a.map(move |av| f(av))
    }
}

/// Lifts a two-argument function so it accepts two promises-or-values,
/// awaits both, then applies `f`.
pub fn lift2<A, B, R, F>(f: F) -> impl Fn(Promise<A>, Promise<B>) -> Promise<R>
where
    A: Clone + 'static,
    B: Clone + 'static,
    R: Clone + 'static,
    F: Fn(A, B) -> R + 'static,
{
    let f = Rc::new(f);
    move |a: Promise<A>, b: Promise<B>| {
        let f = f.clone();
        a.and_then(move |av| {
            let f = f.clone();
            b.map(move |bv| f(av.clone(), bv))
        })
    }
}

/// Lifts a three-argument function so it accepts three promises-or-values,
/// awaits all three in order, then applies `f`.
pub fn lift3<A, B, C, R, F>(f: F) -> impl Fn(Promise<A>, Promise<B>, Promise<C>) -> Promise<R>
where
    A: Clone + 'static,
    B: Clone + 'static,
    C: Clone + 'static,
    R: Clone + 'static,
    F: Fn(A, B, C) -> R + 'static,
{
    let f = Rc::new(f);
    move |a: Promise<A>, b: Promise<B>, c: Promise<C>| {
        let f = f.clone();
        a.and_then(move |av| {
            let f = f.clone();
            b.and_then(move |bv| {
                let f = f.clone();
                let av = av.clone();
                c.map(move |cv| f(av.clone(), bv.clone(), cv))
            })
        })
    }
}

/// Wraps a callback-style function (whose sole completion callback is its
/// last parameter) into a promise that settles with whatever the
/// callback is invoked with.
pub fn promisify<F, T>(loop_handle: Rc<dyn EventLoop>, f: F) -> Promise<T>
where
    T: Clone + 'static,
    F: FnOnce(Box<dyn FnOnce(crate::error::Result<T>)>) + 'static,
{
    Promise::new(loop_handle, move |resolver: Resolver<T>| {
        f(Box::new(move |result| match result {
            Ok(v) => resolver.resolve(super::Resolution::Value(v)),
            Err(e) => resolver.reject(e),
        }));
    })
}
