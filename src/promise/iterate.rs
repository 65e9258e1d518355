//! `iterate(seed, step, predicate)`: repeatedly applies `step` to the
//! current value until `predicate` is satisfied, producing a promise for
//! the final value.
//!
//! Each continuation is scheduled via `next_tick` rather than called
//! inline, the same stack-safety discipline `Promise::then` uses — an
//! `iterate` loop with a million steps grows the scheduler's queue,
//! never the call stack.

use std::rc::Rc;

use crate::scheduler::EventLoop;

use super::{Promise, Resolution};

/// Drives `seed` through `step` until `predicate(&value)` is true,
/// fulfilling with the value that satisfied it. A step may fail by
/// returning `Resolution::Reject`, which rejects the whole iteration.
pub fn iterate<T, S, P>(loop_handle: Rc<dyn EventLoop>, seed: T, step: S, predicate: P) -> Promise<T>
where
    T: Clone + 'static,
    S: Fn(T) -> Resolution<T> + 'static,
    P: Fn(&T) -> bool + 'static,
{
    go(seed, Rc::new(step), Rc::new(predicate), loop_handle)
}

fn go<T: Clone + 'static>(
    value: T,
    step: Rc<dyn Fn(T) -> Resolution<T>>,
    predicate: Rc<dyn Fn(&T) -> bool>,
    loop_handle: Rc<dyn EventLoop>,
) -> Promise<T> {
    if predicate(&value) {
        return Promise::resolved(loop_handle, value);
    }
    match step(value) {
        Resolution::Value(next_value) => {
            let step2 = step.clone();
            let predicate2 = predicate.clone();
            let loop_handle2 = loop_handle.clone();
            Promise::new(loop_handle.clone(), move |resolver| {
                loop_handle.next_tick(Box::new(move || {
                    resolver.resolve(Resolution::Promise(go(next_value, step2, predicate2, loop_handle2)));
                }));
            })
        }
        Resolution::Promise(p) => {
            let step2 = step.clone();
            let predicate2 = predicate.clone();
            let loop_handle2 = loop_handle.clone();
            p.then_full(
                move |v| Resolution::Promise(go(v, step2, predicate2, loop_handle2)),
                Resolution::Reject,
            )
        }
        Resolution::Reject(e) => Promise::rejected(loop_handle, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::scheduler::TokioEventLoop;

    fn loop_handle() -> Rc<dyn EventLoop> {
        Rc::new(TokioEventLoop::new().unwrap())
    }

    #[test]
    fn iterate_counts_up_to_the_predicate() {
        let lp = loop_handle();
        let total = iterate(lp.clone(), 0, |v| Resolution::Value(v + 1), |v| *v >= 100_000);
        lp.run();
        assert_eq!(total.get_result().unwrap(), 100_000);
    }

    #[test]
    fn iterate_propagates_step_rejection() {
        let lp = loop_handle();
        let result: Promise<i32> = iterate(
            lp.clone(),
            0,
            |v| if v == 3 { Resolution::Reject(Error::logic("stop")) } else { Resolution::Value(v + 1) },
            |_| false,
        );
        lp.run();
        assert!(result.get_result().is_err());
    }

    #[test]
    fn iterate_step_may_itself_be_a_promise() {
        let lp = loop_handle();
        let lp2 = lp.clone();
        let total = iterate(
            lp.clone(),
            0,
            move |v| Resolution::Promise(Promise::resolved(lp2.clone(), v + 1)),
            |v| *v >= 5,
        );
        lp.run();
        assert_eq!(total.get_result().unwrap(), 5);
    }
}
