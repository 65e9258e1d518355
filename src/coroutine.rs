//! The coroutine adapter: reifies a Rust `async` block, whose `.await`s
//! are on `weave` promises, as a `Promise<T>`.
//!
//! A coroutine is a generator whose `yield` suspends on a promise and
//! resumes with its settlement, or throws on rejection. Rust's own
//! `async`/`.await` already *is* that model when the thing
//! being awaited is a [`crate::promise::PromiseFuture`]: the `.await`
//! point is the yield, the resolved value is the resumption value, and
//! `?` on a rejected promise is the throw. So this module does no
//! state-machine work of its own — it just drives the `async fn` body to
//! completion on the event loop and funnels its `Result<T>` into a
//! promise's settlement, the same "spawn onto the loop's local task set,
//! settle a paired promise" shape `crate::promise::adapt::promisify` uses
//! for callback-style functions.
//!
//! Cancellation is the one place this module does real work. Cancelling
//! the returned promise must cancel whatever promise the body is
//! currently suspended on. Dropping an `async` block's future
//! drops every sub-future it is parked on, which is exactly
//! `PromiseFuture::drop`'s cancel-on-drop behavior — so cancellation
//! reduces to "drop the coroutine's driving future," done here by a thin
//! wrapper future that swaps its inner future for `None` the next time
//! it is polled after being told to cancel.

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

use crate::error::Result;
use crate::promise::{Promise, Resolution};
use crate::scheduler::EventLoop;

/// Wraps a boxed `Future<Output = ()>` so it can be cancelled from
/// outside: setting `cancelled` and waking the task causes the next poll
/// to drop `inner` (cancelling whatever it was suspended on) instead of
/// polling it further.
struct Cancellable {
    inner: Option<Pin<Box<dyn Future<Output = ()>>>>,
    cancelled: Rc<Cell<bool>>,
    waker_slot: Rc<RefCell<Option<Waker>>>,
}

impl Future for Cancellable {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        *this.waker_slot.borrow_mut() = Some(cx.waker().clone());
        if this.cancelled.get() {
            this.inner = None;
            return Poll::Ready(());
        }
        match this.inner.as_mut() {
            Some(fut) => fut.as_mut().poll(cx),
            None => Poll::Ready(()),
        }
    }
}

/// Runs `body` as a coroutine: an `async` block whose `.await`s are on
/// `weave` promises. Returns a `Promise<T>` that settles with whatever
/// `body` returns (or rejects, via `?`), and whose cancellation cancels
/// the promise `body` is currently awaiting.
///
/// `body` is a closure rather than a bare future so that callers can
/// write `coroutine(loop_handle, || async move { ... })`, matching the
/// ergonomics of spawning a closure-wrapped future elsewhere in this
/// crate's event loop adapter.
pub fn coroutine<T, F, Fut>(loop_handle: Rc<dyn EventLoop>, body: F) -> Promise<T>
where
    T: Clone + 'static,
    F: FnOnce() -> Fut + 'static,
    Fut: Future<Output = Result<T>> + 'static,
{
    let cancelled = Rc::new(Cell::new(false));
    let waker_slot: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
    let cancelled_for_hook = cancelled.clone();
    let waker_slot_for_hook = waker_slot.clone();
    let spawn_handle = loop_handle.clone();

    Promise::new(loop_handle, move |resolver| {
        resolver.on_cancel(move |_reason| {
            cancelled_for_hook.set(true);
            if let Some(waker) = waker_slot_for_hook.borrow_mut().take() {
                waker.wake();
            }
        });

        let driver: Pin<Box<dyn Future<Output = ()>>> = Box::pin(async move {
            match body().await {
                Ok(value) => resolver.resolve(Resolution::Value(value)),
                Err(err) => resolver.reject(err),
            }
        });

        spawn_handle.spawn(Box::pin(Cancellable {
            inner: Some(driver),
            cancelled,
            waker_slot,
        }));
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scheduler::TokioEventLoop;
    use std::time::Duration;

    fn loop_handle() -> Rc<dyn EventLoop> {
        Rc::new(TokioEventLoop::new().unwrap())
    }

    #[test]
    fn awaits_a_chain_of_promises_and_resolves_with_the_final_value() {
        let lp = loop_handle();
        let lp2 = lp.clone();
        let result = coroutine(lp.clone(), move || async move {
            let a = Promise::resolved(lp2.clone(), 1).await?;
            let b = Promise::resolved(lp2.clone(), a + 41).await?;
            Ok(b)
        });
        lp.run();
        assert_eq!(result.get_result().unwrap(), 42);
    }

    #[test]
    fn a_rejected_await_short_circuits_via_the_question_mark_operator() {
        let lp = loop_handle();
        let lp2 = lp.clone();
        let result: Promise<i32> = coroutine(lp.clone(), move || async move {
            let _a: i32 = Promise::rejected(lp2.clone(), Error::logic("boom")).await?;
            Ok(0)
        });
        lp.run();
        assert!(result.get_result().is_err());
    }

    #[test]
    fn cancelling_the_coroutine_cancels_its_in_flight_await() {
        let lp = loop_handle();
        let lp2 = lp.clone();
        // A promise that only settles after 50ms; a 1ms timer cancels the
        // coroutine well before that, so this also pins down that the
        // cancellation actually reaches the in-flight await (if it didn't,
        // the assertions below would see `inner` still pending at best,
        // never rejected).
        let inner = Promise::resolved(lp2.clone(), 0).delay(Duration::from_millis(50));
        let inner_for_body = inner.clone();
        let outer: Promise<i32> = coroutine(lp.clone(), move || async move { inner_for_body.await });

        let outer_for_timer = outer.clone();
        lp.timer(Duration::from_millis(1), Box::new(move || {
            outer_for_timer.cancel(None);
        }));

        lp.run();
        assert!(inner.is_rejected());
        assert!(outer.get_result().is_err());
    }

    #[test]
    fn body_may_itself_delay_between_awaits() {
        let lp = loop_handle();
        let lp2 = lp.clone();
        let result = coroutine(lp.clone(), move || async move {
            let delayed = Promise::resolved(lp2.clone(), 7).delay(Duration::from_millis(1));
            delayed.await
        });
        lp.run();
        assert_eq!(result.get_result().unwrap(), 7);
    }
}
