//! Weave - a single-threaded, cooperative promise/coroutine/stream toolkit
//!
//! This crate provides a JavaScript-Promise-flavored asynchronous core for
//! a single-threaded cooperative event loop: a `Promise<T>` with
//! `then`/combinator chaining and cancellation, an `async`/`.await`
//! coroutine adapter built directly on that promise core, and a
//! backpressure-aware `Readable`/`Writable`/`Duplex` stream contract with
//! in-memory and TCP-socket backends.
//!
//! # Quick Start
//!
//! ## Promises
//!
//! ```rust,ignore
//! use weave::prelude::*;
//! use std::rc::Rc;
//!
//! let lp: Rc<dyn EventLoop> = Rc::new(TokioEventLoop::new()?);
//! let total = Promise::resolved(lp.clone(), 1)
//!     .map(|v| v + 1)
//!     .and_then(|v| Promise::resolved(lp.clone(), v * 10));
//! lp.run();
//! assert_eq!(total.get_result()?, 20);
//! ```
//!
//! ## Coroutines
//!
//! ```rust,ignore
//! let lp2 = lp.clone();
//! let result = coroutine(lp.clone(), move || async move {
//!     let a = Promise::resolved(lp2.clone(), 1).await?;
//!     Ok(a + 1)
//! });
//! ```
//!
//! ## Streams
//!
//! ```rust,ignore
//! let (a, b) = weave::testing::create_pipe(lp.clone());
//! a.write(bytes::Bytes::from_static(b"hello")).done(None, None);
//! lp.run();
//! ```

pub mod buffer;
pub mod coroutine;
pub mod error;
pub mod promise;
pub mod scheduler;
pub mod stream;
pub mod testing;

// Re-exports for convenience.
pub use coroutine::coroutine;
pub use error::{Error, Result};
pub use promise::adapt::{lift1, lift2, lift3, promisify};
pub use promise::combinators::{any, choose, join, map as combinator_map, reduce, settle, some};
pub use promise::iterate::iterate;
pub use promise::{set_unhandled_rejection_hook, Promise, PromiseFuture, Resolution, Resolver};
pub use scheduler::{Cancellable, EventLoop, TokioEventLoop};
pub use stream::memory::MemoryStream;
pub use stream::socket::{Server, ServerConfig, SocketStream};
pub use stream::{pipe, Duplex, Readable, StreamHandle, Writable};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::coroutine::coroutine;
    pub use crate::error::{Error, Result};
    pub use crate::promise::adapt::{lift1, lift2, lift3, promisify};
    pub use crate::promise::combinators::{any, choose, join, map as combinator_map, reduce, settle, some};
    pub use crate::promise::iterate::iterate;
    pub use crate::promise::{set_unhandled_rejection_hook, Promise, Resolution, Resolver};
    pub use crate::scheduler::{EventLoop, TokioEventLoop};
    pub use crate::stream::memory::MemoryStream;
    pub use crate::stream::socket::{Server, ServerConfig, SocketStream};
    pub use crate::stream::{pipe, Duplex, Readable, StreamHandle, Writable};
}
