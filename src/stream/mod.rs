//! Readable/Writable/Duplex stream contract.
//!
//! `Core` is the shared state machine — buffer, `open`/`writable` flags,
//! and the single pending-read slot — that every concrete stream
//! (`memory::MemoryStream`, `socket::SocketStream`) is built from. Bytes
//! enter the buffer differently per backend (a paired peer's `write()`
//! for memory streams, a background socket-read task for TCP streams),
//! but the read-satisfaction algorithm and close/backpressure semantics
//! are identical, so they live here once.

pub mod memory;
pub mod socket;

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::buffer::Buffer;
use crate::error::Error;
use crate::promise::{Promise, Resolution, Resolver};
use crate::scheduler::EventLoop;

/// A stream's single outstanding `read()`, if any.
struct PendingRead {
    length: Option<usize>,
    delimiter: Option<u8>,
    resolver: Resolver<Bytes>,
}

/// The shared read/write/close state machine.
pub(crate) struct Core {
    buffer: Buffer,
    open: bool,
    writable: bool,
    pending: Option<PendingRead>,
    loop_handle: Rc<dyn EventLoop>,
}

impl Core {
    pub(crate) fn new(loop_handle: Rc<dyn EventLoop>) -> Self {
        Self {
            buffer: Buffer::new(),
            open: true,
            writable: true,
            pending: None,
            loop_handle,
        }
    }

    pub(crate) fn is_open(&self) -> bool {
        self.open
    }

    pub(crate) fn is_writable(&self) -> bool {
        self.writable
    }

    pub(crate) fn has_pending_read(&self) -> bool {
        self.pending.is_some()
    }

    /// Looks for bytes already in `buffer` that satisfy `length`/
    /// `delimiter`, consuming and returning them. `None` means "not
    /// enough information yet — keep waiting". `length == Some(0)` is
    /// `poll()`'s special case: resolve with an empty chunk as soon as
    /// *any* data is present, without consuming it.
    fn try_satisfy(buffer: &mut Buffer, length: Option<usize>, delimiter: Option<u8>) -> Option<Bytes> {
        if buffer.is_empty() {
            return None;
        }
        if length == Some(0) {
            return Some(Bytes::new());
        }
        match delimiter {
            Some(d) => {
                let window = length.unwrap_or_else(|| buffer.length()).min(buffer.length());
                if let Some(idx) = buffer.as_slice()[..window].iter().position(|&b| b == d) {
                    return Some(Bytes::from(buffer.remove(idx + 1).to_vec()));
                }
                match length {
                    Some(len) if buffer.length() >= len => Some(Bytes::from(buffer.remove(len).to_vec())),
                    _ => None,
                }
            }
            None => match length {
                Some(len) => Some(Bytes::from(buffer.remove(len.min(buffer.length())).to_vec())),
                None => Some(Bytes::from(buffer.drain().to_vec())),
            },
        }
    }

    /// Appends freshly-arrived bytes and, if a read is pending, attempts
    /// to satisfy it immediately (this is the entire backpressure
    /// mechanism: the producer only needs to call this once per write).
    pub(crate) fn deliver(&mut self, bytes: &[u8]) {
        self.buffer.push(bytes);
        self.wake_pending_read();
    }

    fn wake_pending_read(&mut self) {
        if self.pending.is_none() {
            return;
        }
        let (length, delimiter) = {
            let p = self.pending.as_ref().unwrap();
            (p.length, p.delimiter)
        };
        if let Some(chunk) = Self::try_satisfy(&mut self.buffer, length, delimiter) {
            let pending = self.pending.take().unwrap();
            pending.resolver.resolve(Resolution::Value(chunk));
        }
    }

    /// Implements the `read` contract against `self`, registering a
    /// pending read on `self_handle` if the buffer can't satisfy it yet.
    pub(crate) fn read(self_handle: &Rc<RefCell<Core>>, length: Option<usize>, delimiter: Option<u8>) -> Promise<Bytes> {
        let loop_handle = self_handle.borrow().loop_handle.clone();
        {
            let mut core = self_handle.borrow_mut();
            if !core.open {
                return Promise::rejected(loop_handle, Error::Unreadable);
            }
            if core.pending.is_some() {
                return Promise::rejected(loop_handle, Error::Busy);
            }
            if let Some(chunk) = Self::try_satisfy(&mut core.buffer, length, delimiter) {
                return Promise::resolved(loop_handle, chunk);
            }
        }
        let self_for_pending = self_handle.clone();
        let self_for_hook = self_handle.clone();
        Promise::new(loop_handle, move |resolver| {
            // Reads are only meant to be cancelled via `close`, but if a
            // caller cancels the read promise directly anyway,
            // the pending slot must still clear — otherwise every future
            // read on this stream would fail with `Busy` forever.
            resolver.on_cancel(move |_reason| {
                self_for_hook.borrow_mut().pending = None;
            });
            self_for_pending.borrow_mut().pending = Some(PendingRead { length, delimiter, resolver });
        })
    }

    /// Implements `close`: idempotent, rejects any pending read, and
    /// never re-opens.
    pub(crate) fn close(self_handle: &Rc<RefCell<Core>>, err: Option<Error>) {
        let pending = {
            let mut core = self_handle.borrow_mut();
            if !core.open {
                return;
            }
            core.open = false;
            core.writable = false;
            core.pending.take()
        };
        if let Some(pending) = pending {
            pending.resolver.reject(err.unwrap_or(Error::Closed));
        }
    }

    pub(crate) fn mark_not_writable(&mut self) {
        self.writable = false;
    }
}

/// Every stream (readable, writable, or both) supports these.
pub trait StreamHandle {
    fn is_open(&self) -> bool;
    fn close(&self, err: Option<Error>);
    fn loop_handle(&self) -> Rc<dyn EventLoop>;
}

/// The read half of a duplex stream.
pub trait Readable: StreamHandle {
    fn is_readable(&self) -> bool {
        self.is_open()
    }

    /// See `Core::try_satisfy` for the exact framing rules.
    fn read(&self, length: Option<usize>, delimiter: Option<u8>) -> Promise<Bytes>;

    /// `read(0)`: resolves with an empty chunk as soon as the stream has
    /// data available, without consuming any of it.
    fn poll(&self) -> Promise<Bytes> {
        self.read(Some(0), None)
    }
}

/// The write half of a duplex stream.
pub trait Writable: StreamHandle {
    fn is_writable(&self) -> bool;
    fn write(&self, data: Bytes) -> Promise<usize>;
    fn end(&self, data: Option<Bytes>) -> Promise<()>;
}

/// A stream that is both readable and writable.
pub trait Duplex: Readable + Writable {}
impl<T: Readable + Writable + ?Sized> Duplex for T {}

/// Transfers bytes from `source` to `dest` by repeatedly reading and
/// writing. Terminates when `length` bytes have moved, the last chunk
/// ends with `delimiter`, `source` closes, or `dest` becomes
/// unwritable — fulfilling with the total byte count.
pub fn pipe(
    source: Rc<dyn Readable>,
    dest: Rc<dyn Writable>,
    end_on_close: bool,
    length: Option<usize>,
    delimiter: Option<u8>,
) -> Promise<usize> {
    pipe_step(source, dest, end_on_close, length, delimiter, 0)
}

fn pipe_step(
    source: Rc<dyn Readable>,
    dest: Rc<dyn Writable>,
    end_on_close: bool,
    length: Option<usize>,
    delimiter: Option<u8>,
    transferred: usize,
) -> Promise<usize> {
    if !dest.is_writable() {
        return Promise::resolved(source.loop_handle(), transferred);
    }
    if let Some(total) = length {
        if transferred >= total {
            return Promise::resolved(source.loop_handle(), transferred);
        }
    }
    let remaining = length.map(|total| total - transferred);
    let source_ok = source.clone();
    let dest_ok = dest.clone();
    let dest_err = dest.clone();

    source.read(remaining, delimiter).then_full(
        move |chunk: Bytes| {
            let chunk_len = chunk.len();
            let hit_delimiter = delimiter.is_some_and(|d| chunk.last() == Some(&d));
            let new_transferred = transferred + chunk_len;
            let write_promise = dest_ok.write(chunk);
            Resolution::Promise(write_promise.then_full(
                move |_| {
                    if hit_delimiter {
                        Resolution::Value(new_transferred)
                    } else {
                        Resolution::Promise(pipe_step(source_ok, dest_ok, end_on_close, length, delimiter, new_transferred))
                    }
                },
                move |e| {
                    if matches!(e, Error::Unwritable) {
                        Resolution::Value(new_transferred)
                    } else {
                        Resolution::Reject(e)
                    }
                },
            ))
        },
        move |e| {
            if matches!(e, Error::Closed | Error::Unreadable) {
                if end_on_close {
                    dest_err.end(None);
                }
                Resolution::Value(transferred)
            } else {
                Resolution::Reject(e)
            }
        },
    )
}
