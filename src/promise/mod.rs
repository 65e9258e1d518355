//! The promise core: a single-assignment eventual value with `then`-style
//! chaining, keyed combinators, and cancellation.
//!
//! A `Promise<T>` is a single-assignment, observer-list-backed eventual
//! value, reference-counted (`Rc<RefCell<Inner<T>>>`) so every `.then()`,
//! `.done()`, combinator, and `.await` point shares the same underlying
//! cell. Settlement always defers observer notification to the owning
//! `EventLoop`'s next tick (see `scheduler::EventLoop::next_tick`), never
//! inline from `resolve`/`reject` — this is what keeps `then` chains from
//! growing the call stack.
//!
//! Values flowing through a `Promise<T>` must be `Clone`: more than one
//! observer can be registered against the same settled promise, and each
//! one receives its own copy, the same tradeoff `futures::future::Shared`
//! makes for the same reason.

pub mod adapt;
pub mod combinators;
pub mod iterate;

use std::cell::RefCell;
use std::fmt;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::scheduler::EventLoop;

/// What a resolver settles a promise with: a plain value, another promise
/// to follow, or an outright rejection (the Rust stand-in for "the
/// resolver/handler threw" — see `then_full`).
pub enum Resolution<T: Clone + 'static> {
    Value(T),
    Promise(Promise<T>),
    Reject(Error),
}

enum State<T: Clone + 'static> {
    Pending,
    Following(Promise<T>),
    Fulfilled(T),
    Rejected(Error),
}

impl<T: Clone + 'static> State<T> {
    fn is_terminal(&self) -> bool {
        matches!(self, State::Fulfilled(_) | State::Rejected(_))
    }
}

type FulfillObserver<T> = Box<dyn FnOnce(T)>;
type RejectObserver = Box<dyn FnOnce(Error)>;

struct Inner<T: Clone + 'static> {
    state: State<T>,
    on_fulfill: Vec<FulfillObserver<T>>,
    on_reject: Vec<RejectObserver>,
    cancel_hook: Option<Box<dyn FnOnce(Error)>>,
    children: usize,
    waker: Option<Waker>,
    loop_handle: Rc<dyn EventLoop>,
}

/// An eventual value. Cheap to clone — all clones share one cell.
pub struct Promise<T: Clone + 'static> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T: Clone + 'static> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + fmt::Debug + 'static> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.borrow();
        match &inner.state {
            State::Pending => write!(f, "Promise::Pending"),
            State::Following(_) => write!(f, "Promise::Following"),
            State::Fulfilled(v) => write!(f, "Promise::Fulfilled({v:?})"),
            State::Rejected(e) => write!(f, "Promise::Rejected({e})"),
        }
    }
}

/// The capability handed to a `Promise::new` constructor closure.
pub struct Resolver<T: Clone + 'static> {
    promise: Promise<T>,
}

impl<T: Clone + 'static> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Self { promise: self.promise.clone() }
    }
}

impl<T: Clone + 'static> Resolver<T> {
    /// Settles the promise with a value, or arranges for it to follow
    /// another promise's eventual outcome.
    pub fn resolve(&self, outcome: Resolution<T>) {
        match outcome {
            Resolution::Value(v) => self.promise.settle_fulfilled(v),
            Resolution::Promise(p) => self.promise.follow(p),
            Resolution::Reject(e) => self.promise.settle_rejected(e),
        }
    }

    /// Rejects the promise directly.
    pub fn reject(&self, err: Error) {
        self.promise.settle_rejected(err);
    }

    /// Registers the pending promise's cancellation hook. Invoked at most
    /// once, when `cancel()` is called while the promise is still
    /// pending, before it settles to `Rejected`.
    pub fn on_cancel(&self, hook: impl FnOnce(Error) + 'static) {
        self.promise.inner.borrow_mut().cancel_hook = Some(Box::new(hook));
    }
}

impl<T: Clone + 'static> Promise<T> {
    fn pending(loop_handle: Rc<dyn EventLoop>) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                on_fulfill: Vec::new(),
                on_reject: Vec::new(),
                cancel_hook: None,
                children: 0,
                waker: None,
                loop_handle,
            })),
        }
    }

    /// Builds a promise from a resolver callback. Rust has no ambient
    /// exceptions, so a resolver that needs to fail cannot just "throw, reject
    /// with that error", a resolver that needs to fail must call
    /// `resolver.reject(..)` explicitly.
    pub fn new<F>(loop_handle: Rc<dyn EventLoop>, resolver_fn: F) -> Self
    where
        F: FnOnce(Resolver<T>),
    {
        let promise = Self::pending(loop_handle);
        resolver_fn(Resolver { promise: promise.clone() });
        promise
    }

    /// An already-fulfilled promise.
    pub fn resolved(loop_handle: Rc<dyn EventLoop>, value: T) -> Self {
        let p = Self::pending(loop_handle);
        p.settle_fulfilled(value);
        p
    }

    /// An already-rejected promise.
    pub fn rejected(loop_handle: Rc<dyn EventLoop>, err: Error) -> Self {
        let p = Self::pending(loop_handle);
        p.settle_rejected(err);
        p
    }

    /// The event loop this promise (and anything derived from it) settles
    /// its observers on.
    pub fn loop_handle(&self) -> Rc<dyn EventLoop> {
        self.inner.borrow().loop_handle.clone()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.inner.borrow().state, State::Pending | State::Following(_))
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self.inner.borrow().state, State::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self.inner.borrow().state, State::Rejected(_))
    }

    pub fn is_settled(&self) -> bool {
        self.inner.borrow().state.is_terminal()
    }

    /// A synchronous peek at the outcome. `Err(Error::Unresolved)` if the
    /// promise has not yet settled.
    pub fn get_result(&self) -> Result<T> {
        match &self.inner.borrow().state {
            State::Fulfilled(v) => Ok(v.clone()),
            State::Rejected(e) => Err(e.clone()),
            State::Pending | State::Following(_) => Err(Error::Unresolved),
        }
    }

    /// True if resolving `self` with `target` would create a `following`
    /// cycle, direct or transitive.
    fn would_cycle_through(&self, target: &Promise<T>) -> bool {
        let mut current = target.clone();
        loop {
            if Rc::ptr_eq(&current.inner, &self.inner) {
                return true;
            }
            let next = match &current.inner.borrow().state {
                State::Following(p) => p.clone(),
                _ => return false,
            };
            current = next;
        }
    }

    /// Registers an observer pair. If already settled, the observer is
    /// still deferred to the next tick rather than run inline; if
    /// pending, it joins the list drained at settlement; if following,
    /// it's forwarded onto the eventual target transparently.
    fn subscribe_raw(&self, on_fulfill: FulfillObserver<T>, on_reject: RejectObserver) {
        let target = {
            let mut inner = self.inner.borrow_mut();
            match &inner.state {
                State::Pending => {
                    inner.on_fulfill.push(on_fulfill);
                    inner.on_reject.push(on_reject);
                    return;
                }
                State::Following(p) => Some(p.clone()),
                State::Fulfilled(v) => {
                    let v = v.clone();
                    let loop_handle = inner.loop_handle.clone();
                    drop(inner);
                    loop_handle.next_tick(Box::new(move || on_fulfill(v)));
                    return;
                }
                State::Rejected(e) => {
                    let e = e.clone();
                    let loop_handle = inner.loop_handle.clone();
                    drop(inner);
                    loop_handle.next_tick(Box::new(move || on_reject(e)));
                    return;
                }
            }
        };
        if let Some(target) = target {
            target.subscribe_raw(on_fulfill, on_reject);
        }
    }

    fn settle_fulfilled(&self, value: T) {
        let (observers, waker, loop_handle) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = State::Fulfilled(value.clone());
            inner.cancel_hook = None;
            let observers = std::mem::take(&mut inner.on_fulfill);
            inner.on_reject.clear();
            (observers, inner.waker.take(), inner.loop_handle.clone())
        };
        for obs in observers {
            let v = value.clone();
            loop_handle.next_tick(Box::new(move || obs(v)));
        }
        if let Some(waker) = waker {
            loop_handle.next_tick(Box::new(move || waker.wake()));
        }
    }

    fn settle_rejected(&self, err: Error) {
        let (observers, waker, loop_handle) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            inner.state = State::Rejected(err.clone());
            inner.cancel_hook = None;
            let observers = std::mem::take(&mut inner.on_reject);
            inner.on_fulfill.clear();
            (observers, inner.waker.take(), inner.loop_handle.clone())
        };
        for obs in observers {
            let e = err.clone();
            loop_handle.next_tick(Box::new(move || obs(e)));
        }
        if let Some(waker) = waker {
            loop_handle.next_tick(Box::new(move || waker.wake()));
        }
    }

    /// Arranges for `self` to settle identically to `target` once it
    /// does, collapsing through any chain of `following` links.
    fn follow(&self, target: Promise<T>) {
        if self.would_cycle_through(&target) {
            self.settle_rejected(Error::CircularReference);
            return;
        }
        let (fulfill_subs, reject_subs) = {
            let mut inner = self.inner.borrow_mut();
            if inner.state.is_terminal() {
                return;
            }
            let fulfill_subs = std::mem::take(&mut inner.on_fulfill);
            let reject_subs = std::mem::take(&mut inner.on_reject);
            inner.cancel_hook = None;
            inner.state = State::Following(target.clone());
            (fulfill_subs, reject_subs)
        };
        for (f, r) in fulfill_subs.into_iter().zip(reject_subs) {
            target.subscribe_raw(f, r);
        }
        let self_fulfill = self.clone();
        let self_reject = self.clone();
        target.subscribe_raw(
            Box::new(move |v| self_fulfill.settle_fulfilled(v)),
            Box::new(move |e| self_reject.settle_rejected(e)),
        );
    }

    fn inc_children(&self) {
        self.inner.borrow_mut().children += 1;
    }

    fn child_cancelled(&self, reason: Error) {
        let should_cascade = {
            let mut inner = self.inner.borrow_mut();
            if inner.children == 0 {
                false
            } else {
                inner.children -= 1;
                inner.children == 0
            }
        };
        if should_cascade {
            self.cancel(Some(reason));
        }
    }

    fn set_cancel_hook(&self, hook: Box<dyn FnOnce(Error)>) {
        self.inner.borrow_mut().cancel_hook = Some(hook);
    }

    /// Cancels the promise. A no-op if already
    /// settled. If pending, runs the cancellation hook (if any) then
    /// rejects with `reason` (default `Error::Cancelled`). If following,
    /// forwards the cancellation to the target instead of settling here
    /// directly — `self` settles once the target does.
    pub fn cancel(&self, reason: Option<Error>) {
        let reason = reason.unwrap_or(Error::Cancelled);
        let (hook, following) = {
            let mut inner = self.inner.borrow_mut();
            match &inner.state {
                State::Pending => (inner.cancel_hook.take(), None),
                State::Following(p) => (None, Some(p.clone())),
                _ => return,
            }
        };
        if let Some(target) = following {
            target.cancel(Some(reason));
            return;
        }
        if let Some(hook) = hook {
            hook(reason.clone());
        }
        self.settle_rejected(reason);
    }

    /// The general two-handler `then`, able to change the settled type.
    /// `on_fulfill`/`on_reject` each decide the child's outcome via
    /// `Resolution`; the opposite handler always receives a passthrough
    /// default when built via `then`, `map`, `catch`, etc.
    pub fn then_full<U, FOk, FErr>(&self, on_fulfill: FOk, on_reject: FErr) -> Promise<U>
    where
        U: Clone + 'static,
        FOk: FnOnce(T) -> Resolution<U> + 'static,
        FErr: FnOnce(Error) -> Resolution<U> + 'static,
    {
        let child = Promise::pending(self.loop_handle());
        self.inc_children();

        let parent_for_cancel = self.clone();
        child.set_cancel_hook(Box::new(move |reason| {
            parent_for_cancel.child_cancelled(reason);
        }));

        let child_ok = child.clone();
        let child_err = child.clone();
        self.subscribe_raw(
            Box::new(move |v| {
                let resolver = Resolver { promise: child_ok };
                resolver.resolve(on_fulfill(v));
            }),
            Box::new(move |e| {
                let resolver = Resolver { promise: child_err };
                resolver.resolve(on_reject(e));
            }),
        );
        child
    }

    /// The classic `then(onFulfill?, onReject?)`: both handlers settle
    /// the child with the same type `T` the parent carries. Use
    /// `then_full`/`map`/`and_then` when the child needs a different type.
    pub fn then(
        &self,
        on_fulfill: Option<Box<dyn FnOnce(T) -> Resolution<T>>>,
        on_reject: Option<Box<dyn FnOnce(Error) -> Resolution<T>>>,
    ) -> Promise<T> {
        self.then_full(
            move |v| match on_fulfill {
                Some(f) => f(v),
                None => Resolution::Value(v),
            },
            move |e| match on_reject {
                Some(f) => f(e),
                None => Resolution::Reject(e),
            },
        )
    }

    /// Maps a fulfilled value; rejections pass through unchanged.
    pub fn map<U: Clone + 'static>(&self, f: impl FnOnce(T) -> U + 'static) -> Promise<U> {
        self.then_full(move |v| Resolution::Value(f(v)), Resolution::Reject)
    }

    /// Chains into another promise on fulfillment; rejections pass
    /// through unchanged.
    pub fn and_then<U: Clone + 'static>(&self, f: impl FnOnce(T) -> Promise<U> + 'static) -> Promise<U> {
        self.then_full(move |v| Resolution::Promise(f(v)), Resolution::Reject)
    }

    /// Recovers from a rejection into a same-typed outcome; fulfillments
    /// pass through unchanged.
    pub fn catch(&self, f: impl FnOnce(Error) -> Resolution<T> + 'static) -> Promise<T> {
        self.then_full(Resolution::Value, f)
    }

    /// Recovers from a rejection by chaining into another promise of the
    /// same type; fulfillments pass through unchanged.
    pub fn or_else(&self, f: impl FnOnce(Error) -> Promise<T> + 'static) -> Promise<T> {
        self.then_full(Resolution::Value, move |e| Resolution::Promise(f(e)))
    }

    /// Runs `cb` once settlement happens, regardless of outcome, without
    /// altering it.
    pub fn after(&self, cb: impl FnOnce() + 'static) -> Promise<T> {
        let cb = Rc::new(RefCell::new(Some(cb)));
        let cb_ok = cb.clone();
        self.then_full(
            move |v| {
                if let Some(f) = cb_ok.borrow_mut().take() {
                    f();
                }
                Resolution::Value(v)
            },
            move |e| {
                if let Some(f) = cb.borrow_mut().take() {
                    f();
                }
                Resolution::Reject(e)
            },
        )
    }

    /// Runs `cb` only if the promise rejects, without altering the
    /// outcome.
    pub fn otherwise(&self, cb: impl FnOnce(&Error) + 'static) -> Promise<T> {
        self.then_full(Resolution::Value, move |e| {
            cb(&e);
            Resolution::Reject(e)
        })
    }

    /// Alias for `after` — runs `cb` regardless of outcome.
    pub fn always(&self, cb: impl FnOnce() + 'static) -> Promise<T> {
        self.after(cb)
    }

    /// Terminal observer with no child promise. If `on_reject` is
    /// omitted and the promise rejects, the error is reported through
    /// `report_unhandled_rejection` instead of being silently dropped.
    pub fn done(&self, on_fulfill: Option<Box<dyn FnOnce(T)>>, on_reject: Option<Box<dyn FnOnce(Error)>>) {
        self.subscribe_raw(
            Box::new(move |v| {
                if let Some(f) = on_fulfill {
                    f(v);
                }
            }),
            Box::new(move |e| match on_reject {
                Some(f) => f(e),
                None => report_unhandled_rejection(&e),
            }),
        );
    }

    /// Settles with the parent's value, but only after `delay` once the
    /// parent fulfills; rejection is mirrored immediately.
    pub fn delay(&self, delay: Duration) -> Promise<T> {
        let child = Promise::pending(self.loop_handle());
        self.inc_children();
        let timer_slot: Rc<RefCell<Option<crate::scheduler::Cancellable>>> = Rc::new(RefCell::new(None));

        let child_ok = child.clone();
        let loop_handle = self.loop_handle();
        let timer_slot_ok = timer_slot.clone();
        let child_err = child.clone();
        self.subscribe_raw(
            Box::new(move |v| {
                let child_for_timer = child_ok.clone();
                let handle = loop_handle.timer(
                    delay,
                    Box::new(move || {
                        child_for_timer.settle_fulfilled(v);
                    }),
                );
                *timer_slot_ok.borrow_mut() = Some(handle);
            }),
            Box::new(move |e| child_err.settle_rejected(e)),
        );

        let parent_for_cancel = self.clone();
        child.set_cancel_hook(Box::new(move |reason| {
            if let Some(h) = timer_slot.borrow_mut().take() {
                h.cancel();
            }
            parent_for_cancel.child_cancelled(reason);
        }));
        child
    }

    /// Settles like the parent, but rejects with `err` (default
    /// `Error::Timeout`) if the parent hasn't settled within `duration`.
    pub fn timeout(&self, duration: Duration, err: Option<Error>) -> Promise<T> {
        let err = err.unwrap_or(Error::Timeout);
        let child = Promise::pending(self.loop_handle());
        self.inc_children();
        let timer_slot: Rc<RefCell<Option<crate::scheduler::Cancellable>>> = Rc::new(RefCell::new(None));

        let child_for_timer = child.clone();
        let timer_slot_for_timer = timer_slot.clone();
        let handle = self.loop_handle().timer(
            duration,
            Box::new(move || {
                timer_slot_for_timer.borrow_mut().take();
                child_for_timer.settle_rejected(err);
            }),
        );
        *timer_slot.borrow_mut() = Some(handle);

        let child_ok = child.clone();
        let child_err = child.clone();
        let timer_slot_ok = timer_slot.clone();
        let timer_slot_err = timer_slot.clone();
        self.subscribe_raw(
            Box::new(move |v| {
                if let Some(h) = timer_slot_ok.borrow_mut().take() {
                    h.cancel();
                }
                child_ok.settle_fulfilled(v);
            }),
            Box::new(move |e| {
                if let Some(h) = timer_slot_err.borrow_mut().take() {
                    h.cancel();
                }
                child_err.settle_rejected(e);
            }),
        );

        let parent_for_cancel = self.clone();
        let timer_slot_cancel = timer_slot.clone();
        child.set_cancel_hook(Box::new(move |reason| {
            if let Some(h) = timer_slot_cancel.borrow_mut().take() {
                h.cancel();
            }
            parent_for_cancel.child_cancelled(reason);
        }));
        child
    }
}

thread_local! {
    static UNHANDLED_REJECTION_HOOK: RefCell<Option<Box<dyn Fn(&Error)>>> = RefCell::new(None);
}

/// Installs a handler for rejections reaching `done()` with no
/// `on_reject`. Overrides the default, which panics on the task the
/// rejection surfaced on.
pub fn set_unhandled_rejection_hook(hook: impl Fn(&Error) + 'static) {
    UNHANDLED_REJECTION_HOOK.with(|cell| *cell.borrow_mut() = Some(Box::new(hook)));
}

fn report_unhandled_rejection(err: &Error) {
    let handled = UNHANDLED_REJECTION_HOOK.with(|cell| {
        if let Some(hook) = cell.borrow().as_ref() {
            hook(err);
            true
        } else {
            false
        }
    });
    if !handled {
        panic!("unhandled promise rejection: {err}");
    }
}

/// A future that resolves/rejects alongside a `Promise<T>`. Dropping it
/// while the promise is still pending cancels the promise — this is what
/// makes coroutine cancellation fall out of ordinary future-drop
/// semantics.
pub struct PromiseFuture<T: Clone + 'static> {
    promise: Promise<T>,
}

impl<T: Clone + 'static> Future for PromiseFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut inner = self.promise.inner.borrow_mut();
        match &inner.state {
            State::Fulfilled(v) => Poll::Ready(Ok(v.clone())),
            State::Rejected(e) => Poll::Ready(Err(e.clone())),
            State::Pending | State::Following(_) => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T: Clone + 'static> Drop for PromiseFuture<T> {
    fn drop(&mut self) {
        if self.promise.is_pending() {
            self.promise.cancel(None);
        }
    }
}

impl<T: Clone + 'static> IntoFuture for Promise<T> {
    type Output = Result<T>;
    type IntoFuture = PromiseFuture<T>;

    fn into_future(self) -> PromiseFuture<T> {
        PromiseFuture { promise: self }
    }
}
