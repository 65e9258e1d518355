//! The event loop adapter consumed by the promise/coroutine/stream core.
//!
//! The loop is treated as an opaque external collaborator providing four
//! capabilities: readiness registration, one-shot timers, a next-tick
//! queue, and a `run()` dispatch loop. This module defines that contract
//! as the `EventLoop` trait and ships one concrete, single-threaded
//! implementation backed by `tokio`'s reactor.
//!
//! The model is single-threaded cooperative scheduling: every task
//! registered here runs on the same OS thread, so the trait does not
//! require `Send` on its callbacks.

use std::cell::Cell;
use std::future::Future;
use std::os::unix::io::{AsRawFd, RawFd};
use std::pin::Pin;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::unix::AsyncFd;
use tokio::task::JoinHandle;

/// A boxed, one-shot callback scheduled onto the loop.
pub type Task = Box<dyn FnOnce()>;

/// A boxed, `'static` future spawned onto the loop's local task set.
pub type LocalFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Handle to a scheduled timer or readiness registration; dropping it
/// does not cancel the registration, `cancel()` must be called
/// explicitly.
pub struct Cancellable {
    join: JoinHandle<()>,
}

impl Cancellable {
    fn new(join: JoinHandle<()>) -> Self {
        Self { join }
    }

    /// Cancels the pending timer or readiness wait. A no-op if it
    /// already fired.
    pub fn cancel(&self) {
        self.join.abort();
    }
}

/// The event loop contract consumed by the promise/coroutine/stream core.
///
/// Implementations are free to choose any underlying reactor; weave's
/// own combinators only ever call `next_tick` and `timer`. `on_readable`
/// / `on_writable` exist for concrete stream backends (sockets, pipes)
/// that need raw descriptor readiness outside of what `tokio::net`
/// already gives them internally.
pub trait EventLoop {
    /// Registers interest in descriptor `fd` becoming readable; `cb`
    /// runs once, on a later tick, the first time that happens.
    fn on_readable(&self, fd: RawFd, cb: Task) -> Cancellable;

    /// Registers interest in descriptor `fd` becoming writable; `cb`
    /// runs once, on a later tick, the first time that happens.
    fn on_writable(&self, fd: RawFd, cb: Task) -> Cancellable;

    /// Schedules a one-shot timer; `cb` runs once after `delay` elapses.
    fn timer(&self, delay: Duration, cb: Task) -> Cancellable;

    /// Enqueues `cb` to run on a later tick, before any timer fires.
    /// This is the mechanism promise observers and `iterate` steps use
    /// to guarantee they never run synchronously from within another
    /// callback's stack.
    fn next_tick(&self, cb: Task);

    /// Spawns a `'static` future onto the loop's local task set.
    /// Coroutines are reified this way (see `crate::coroutine`).
    fn spawn(&self, fut: LocalFuture);

    /// Dispatches queued work until none remains.
    fn run(&self);
}

/// Thin, raw-fd-only wrapper so arbitrary descriptors can be registered
/// with `tokio::io::unix::AsyncFd`, which otherwise requires owning the
/// underlying `AsFd`/`AsRawFd` resource.
struct BorrowedFd(RawFd);

impl AsRawFd for BorrowedFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

/// Single-threaded, `tokio`-backed `EventLoop`.
///
/// Built on a current-thread `tokio::runtime::Runtime` plus a
/// `tokio::task::LocalSet`, so every spawned future and callback runs
/// on the thread that calls `run()` — there is no hidden thread pool;
/// one event loop drives all work.
pub struct TokioEventLoop {
    runtime: tokio::runtime::Runtime,
    local: tokio::task::LocalSet,
    outstanding: Rc<Cell<usize>>,
    idle: Rc<tokio::sync::Notify>,
}

impl TokioEventLoop {
    /// Builds a new loop with its own current-thread tokio runtime.
    pub fn new() -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            local: tokio::task::LocalSet::new(),
            outstanding: Rc::new(Cell::new(0)),
            idle: Rc::new(tokio::sync::Notify::new()),
        })
    }

    fn track<F>(&self, fut: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + 'static,
    {
        // The decrement lives in a drop guard, not a statement after
        // `fut.await`, so an aborted task (timer/readiness cancellation)
        // still releases its slot — otherwise `run()` would wait forever
        // for a task that will never finish.
        struct DecrementOnDrop(Rc<Cell<usize>>, Rc<tokio::sync::Notify>);
        impl Drop for DecrementOnDrop {
            fn drop(&mut self) {
                self.0.set(self.0.get().saturating_sub(1));
                if self.0.get() == 0 {
                    self.1.notify_waiters();
                }
            }
        }

        let outstanding = self.outstanding.clone();
        outstanding.set(outstanding.get() + 1);
        let guard = DecrementOnDrop(outstanding, self.idle.clone());
        self.local.spawn_local(async move {
            let _guard = guard;
            fut.await;
        })
    }
}

impl Default for TokioEventLoop {
    fn default() -> Self {
        Self::new().expect("failed to build tokio runtime for TokioEventLoop")
    }
}

impl EventLoop for TokioEventLoop {
    fn on_readable(&self, fd: RawFd, cb: Task) -> Cancellable {
        let join = self.track(async move {
            if let Ok(async_fd) = AsyncFd::new(BorrowedFd(fd)) {
                if async_fd.readable().await.is_ok() {
                    cb();
                }
            }
        });
        Cancellable::new(join)
    }

    fn on_writable(&self, fd: RawFd, cb: Task) -> Cancellable {
        let join = self.track(async move {
            if let Ok(async_fd) = AsyncFd::new(BorrowedFd(fd)) {
                if async_fd.writable().await.is_ok() {
                    cb();
                }
            }
        });
        Cancellable::new(join)
    }

    fn timer(&self, delay: Duration, cb: Task) -> Cancellable {
        let join = self.track(async move {
            tokio::time::sleep(delay).await;
            cb();
        });
        Cancellable::new(join)
    }

    fn next_tick(&self, cb: Task) {
        self.track(async move {
            // `yield_now` guarantees at least one scheduler pass before
            // `cb` runs, so settlement and observer execution never
            // share a stack frame.
            tokio::task::yield_now().await;
            cb();
        });
    }

    fn spawn(&self, fut: LocalFuture) {
        self.track(fut);
    }

    fn run(&self) {
        let outstanding = self.outstanding.clone();
        let idle = self.idle.clone();
        self.runtime.block_on(self.local.run_until(async move {
            loop {
                if outstanding.get() == 0 {
                    break;
                }
                // Register interest before re-checking the condition so a
                // `notify_waiters` that lands between the check and the
                // await is never missed.
                let notified = idle.notified();
                if outstanding.get() == 0 {
                    break;
                }
                notified.await;
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn next_tick_runs_after_registration_returns() {
        let lp = TokioEventLoop::new().unwrap();
        let ran = Rc::new(RefCell::new(false));
        let ran_clone = ran.clone();
        lp.next_tick(Box::new(move || {
            *ran_clone.borrow_mut() = true;
        }));
        assert!(!*ran.borrow(), "callback must not run synchronously");
        lp.run();
        assert!(*ran.borrow());
    }

    #[test]
    fn timer_fires_after_delay() {
        let lp = TokioEventLoop::new().unwrap();
        let fired = Rc::new(RefCell::new(false));
        let fired_clone = fired.clone();
        lp.timer(Duration::from_millis(5), Box::new(move || {
            *fired_clone.borrow_mut() = true;
        }));
        lp.run();
        assert!(*fired.borrow());
    }

    #[test]
    fn timer_cancel_prevents_firing() {
        let lp = TokioEventLoop::new().unwrap();
        let fired = Rc::new(RefCell::new(false));
        let fired_clone = fired.clone();
        let handle = lp.timer(Duration::from_millis(20), Box::new(move || {
            *fired_clone.borrow_mut() = true;
        }));
        handle.cancel();
        lp.run();
        assert!(!*fired.borrow());
    }
}
