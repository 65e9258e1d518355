//! Keyed combinators over collections of promises.
//!
//! All combinators except `reduce` take `HashMap<K, Promise<V>>` and
//! return a `HashMap<K, _>` preserving the caller's keys
//! (`K: Eq + Hash + Clone + Display`). `reduce` takes an ordered
//! `Vec<(K, Promise<V>)>` instead, since a left fold has no meaning over
//! an unordered collection and `HashMap` does not preserve insertion
//! order — a deliberate adaptation documented in DESIGN.md.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt::Display;
use std::hash::Hash;
use std::rc::Rc;

use crate::error::Error;
use crate::scheduler::EventLoop;

use super::{Promise, Resolution, Resolver};

/// Fulfills with a map of every input's value once all fulfill; rejects
/// with the first rejection encountered. Empty input fulfills with an
/// empty map.
pub fn join<K, V>(loop_handle: Rc<dyn EventLoop>, promises: HashMap<K, Promise<V>>) -> Promise<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Display + 'static,
    V: Clone + 'static,
{
    if promises.is_empty() {
        return Promise::resolved(loop_handle, HashMap::new());
    }
    let total = promises.len();
    Promise::new(loop_handle, move |resolver: Resolver<HashMap<K, V>>| {
        let results: Rc<RefCell<HashMap<K, V>>> = Rc::new(RefCell::new(HashMap::with_capacity(total)));
        let remaining = Rc::new(Cell::new(total));
        for (k, p) in promises {
            let results = results.clone();
            let remaining = remaining.clone();
            let resolver_ok = resolver.clone();
            let resolver_err = resolver.clone();
            p.done(
                Some(Box::new(move |v| {
                    results.borrow_mut().insert(k, v);
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        resolver_ok.resolve(Resolution::Value(results.borrow_mut().drain().collect()));
                    }
                })),
                Some(Box::new(move |e| resolver_err.reject(e))),
            );
        }
    })
}

/// One settled result per input, never rejecting (except on cancel): the
/// `Ok`/`Err` of whichever way each input actually settled.
pub fn settle<K, V>(
    loop_handle: Rc<dyn EventLoop>,
    promises: HashMap<K, Promise<V>>,
) -> Promise<HashMap<K, Result<V, Error>>>
where
    K: Eq + Hash + Clone + Display + 'static,
    V: Clone + 'static,
{
    let reflected = promises
        .into_iter()
        .map(|(k, p)| {
            let reflected = p.then_full(
                |v| Resolution::Value(Ok(v)),
                |e| Resolution::Value(Err(e)),
            );
            (k, reflected)
        })
        .collect();
    join(loop_handle, reflected)
}

/// Fulfills with the value of the first input to fulfill. Rejects with a
/// `MultiReason` once every input has rejected. Empty input rejects with
/// `LogicError`.
pub fn any<K, V>(loop_handle: Rc<dyn EventLoop>, promises: HashMap<K, Promise<V>>) -> Promise<V>
where
    K: Eq + Hash + Clone + Display + 'static,
    V: Clone + 'static,
{
    if promises.is_empty() {
        return Promise::rejected(loop_handle, Error::logic("any() called with an empty collection"));
    }
    let total = promises.len();
    Promise::new(loop_handle, move |resolver: Resolver<V>| {
        let remaining = Rc::new(Cell::new(total));
        let errors: Rc<RefCell<Vec<(K, Error)>>> = Rc::new(RefCell::new(Vec::new()));
        for (k, p) in promises {
            let resolver_ok = resolver.clone();
            let resolver_err = resolver.clone();
            let remaining = remaining.clone();
            let errors = errors.clone();
            p.done(
                Some(Box::new(move |v| resolver_ok.resolve(Resolution::Value(v)))),
                Some(Box::new(move |e| {
                    errors.borrow_mut().push((k, e));
                    remaining.set(remaining.get() - 1);
                    if remaining.get() == 0 {
                        resolver_err.reject(Error::multi(errors.borrow_mut().drain(..).collect()));
                    }
                })),
            );
        }
    })
}

/// Fulfills with a map of the first `need` inputs to fulfill. Rejects
/// with a `MultiReason` once enough inputs have rejected that `need`
/// fulfillments can no longer be reached. `need == 0` fulfills
/// immediately with an empty map.
pub fn some<K, V>(loop_handle: Rc<dyn EventLoop>, promises: HashMap<K, Promise<V>>, need: usize) -> Promise<HashMap<K, V>>
where
    K: Eq + Hash + Clone + Display + 'static,
    V: Clone + 'static,
{
    if need == 0 {
        return Promise::resolved(loop_handle, HashMap::new());
    }
    let total = promises.len();
    if need > total {
        return Promise::rejected(
            loop_handle,
            Error::logic(format!("some() needs {need} fulfillments but only {total} inputs were given")),
        );
    }
    let max_failures = total - need;
    Promise::new(loop_handle, move |resolver: Resolver<HashMap<K, V>>| {
        let results: Rc<RefCell<HashMap<K, V>>> = Rc::new(RefCell::new(HashMap::new()));
        let errors: Rc<RefCell<Vec<(K, Error)>>> = Rc::new(RefCell::new(Vec::new()));
        for (k, p) in promises {
            let resolver_ok = resolver.clone();
            let resolver_err = resolver.clone();
            let results = results.clone();
            let errors = errors.clone();
            let k_err = k.clone();
            p.done(
                Some(Box::new(move |v| {
                    results.borrow_mut().insert(k, v);
                    if results.borrow().len() == need {
                        resolver_ok.resolve(Resolution::Value(results.borrow_mut().drain().collect()));
                    }
                })),
                Some(Box::new(move |e| {
                    errors.borrow_mut().push((k_err, e));
                    if errors.borrow().len() > max_failures {
                        resolver_err.reject(Error::multi(errors.borrow_mut().drain(..).collect()));
                    }
                })),
            );
        }
    })
}

/// Settles identically to whichever input settles first, fulfilled or
/// rejected. Empty input rejects with `LogicError`.
pub fn choose<K, V>(loop_handle: Rc<dyn EventLoop>, promises: HashMap<K, Promise<V>>) -> Promise<V>
where
    K: Eq + Hash + 'static,
    V: Clone + 'static,
{
    if promises.is_empty() {
        return Promise::rejected(loop_handle, Error::logic("choose() called with an empty collection"));
    }
    Promise::new(loop_handle, move |resolver: Resolver<V>| {
        for (_, p) in promises {
            let resolver_ok = resolver.clone();
            let resolver_err = resolver.clone();
            p.done(
                Some(Box::new(move |v| resolver_ok.resolve(Resolution::Value(v)))),
                Some(Box::new(move |e| resolver_err.reject(e))),
            );
        }
    })
}

/// Applies `f` to every input's fulfilled value, collecting a map;
/// rejects with the first rejection or the first `f` failure encountered.
pub fn map<K, V, W, F>(loop_handle: Rc<dyn EventLoop>, promises: HashMap<K, Promise<V>>, f: F) -> Promise<HashMap<K, W>>
where
    K: Eq + Hash + Clone + Display + 'static,
    V: Clone + 'static,
    W: Clone + 'static,
    F: Fn(V) -> crate::error::Result<W> + 'static,
{
    let f = Rc::new(f);
    let mapped = promises
        .into_iter()
        .map(|(k, p)| {
            let f = f.clone();
            let mapped = p.then_full(
                move |v| match f(v) {
                    Ok(w) => Resolution::Value(w),
                    Err(e) => Resolution::Reject(e),
                },
                Resolution::Reject,
            );
            (k, mapped)
        })
        .collect();
    join(loop_handle, mapped)
}

/// Left fold over an ordered collection of promises-or-values, each step
/// awaited in turn before the next starts. Empty input fulfills with
/// `init`.
pub fn reduce<K, V, C, F>(loop_handle: Rc<dyn EventLoop>, promises: Vec<(K, Promise<V>)>, f: F, init: C) -> Promise<C>
where
    K: 'static,
    V: Clone + 'static,
    C: Clone + 'static,
    F: Fn(C, V) -> crate::error::Result<C> + 'static,
{
    fn step<K: 'static, V: Clone + 'static, C: Clone + 'static>(
        mut iter: std::vec::IntoIter<(K, Promise<V>)>,
        carry: C,
        f: Rc<dyn Fn(C, V) -> crate::error::Result<C>>,
        loop_handle: Rc<dyn EventLoop>,
    ) -> Promise<C> {
        match iter.next() {
            None => Promise::resolved(loop_handle, carry),
            Some((_, p)) => {
                let loop_handle_next = loop_handle.clone();
                p.then_full(
                    move |v| match f(carry, v) {
                        Ok(next_carry) => Resolution::Promise(step(iter, next_carry, f, loop_handle_next)),
                        Err(e) => Resolution::Reject(e),
                    },
                    Resolution::Reject,
                )
            }
        }
    }
    step(promises.into_iter(), init, Rc::new(f), loop_handle)
}
