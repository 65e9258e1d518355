//! An in-memory duplex stream pair.
//!
//! Two `MemoryStream`s are linked so that writing to one delivers bytes
//! directly into the other's buffer — no OS descriptor, no syscalls, and
//! a write never blocks. This is both a first-class stream implementation
//! and the fixture `testing::create_pipe` hands out for exercising the
//! promise/stream contracts without opening a real socket.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::Error;
use crate::promise::Promise;
use crate::scheduler::EventLoop;
use crate::stream::{Core, Readable, StreamHandle, Writable};

/// One end of an in-memory duplex pipe. Writes made through this handle
/// land directly in the peer's read buffer.
#[derive(Clone)]
pub struct MemoryStream {
    core: Rc<RefCell<Core>>,
    peer: Rc<RefCell<Option<Rc<RefCell<Core>>>>>,
}

impl MemoryStream {
    /// Creates a connected pair: bytes written to `.0` are readable from
    /// `.1` and vice versa.
    pub fn pair(loop_handle: Rc<dyn EventLoop>) -> (MemoryStream, MemoryStream) {
        let a = MemoryStream {
            core: Rc::new(RefCell::new(Core::new(loop_handle.clone()))),
            peer: Rc::new(RefCell::new(None)),
        };
        let b = MemoryStream {
            core: Rc::new(RefCell::new(Core::new(loop_handle))),
            peer: Rc::new(RefCell::new(None)),
        };
        *a.peer.borrow_mut() = Some(b.core.clone());
        *b.peer.borrow_mut() = Some(a.core.clone());
        (a, b)
    }
}

impl StreamHandle for MemoryStream {
    fn is_open(&self) -> bool {
        self.core.borrow().is_open()
    }

    fn close(&self, err: Option<Error>) {
        Core::close(&self.core, err);
    }

    fn loop_handle(&self) -> Rc<dyn EventLoop> {
        self.core.borrow().loop_handle.clone()
    }
}

impl Readable for MemoryStream {
    fn read(&self, length: Option<usize>, delimiter: Option<u8>) -> Promise<Bytes> {
        Core::read(&self.core, length, delimiter)
    }
}

impl Writable for MemoryStream {
    fn is_writable(&self) -> bool {
        self.core.borrow().is_writable()
    }

    fn write(&self, data: Bytes) -> Promise<usize> {
        let loop_handle = self.loop_handle();
        if !self.is_writable() {
            return Promise::rejected(loop_handle, Error::Unwritable);
        }
        let len = data.len();
        if let Some(peer) = self.peer.borrow().as_ref() {
            peer.borrow_mut().deliver(&data);
        }
        Promise::resolved(loop_handle, len)
    }

    fn end(&self, data: Option<Bytes>) -> Promise<()> {
        let this = self.clone();
        let write_promise = match data {
            Some(bytes) => self.write(bytes),
            None => Promise::resolved(self.loop_handle(), 0),
        };
        write_promise.map(move |_| {
            this.core.borrow_mut().mark_not_writable();
            this.close(None);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::TokioEventLoop;
    use crate::stream::pipe;
    use std::cell::Cell;

    fn loop_handle() -> Rc<dyn EventLoop> {
        Rc::new(TokioEventLoop::new().unwrap())
    }

    #[test]
    fn write_delivers_into_peers_buffer() {
        let lp = loop_handle();
        let (a, b) = MemoryStream::pair(lp.clone());
        a.write(Bytes::from_static(b"hello")).done(None, None);
        let received = Rc::new(Cell::new(None));
        let received_clone = received.clone();
        b.read(None, None)
            .done(Some(Box::new(move |chunk| received_clone.set(Some(chunk)))), None);
        lp.run();
        assert_eq!(received.take().unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn read_with_delimiter_stops_at_newline() {
        let lp = loop_handle();
        let (a, b) = MemoryStream::pair(lp.clone());
        a.write(Bytes::from_static(b"hi\nmore")).done(None, None);
        let received = Rc::new(Cell::new(None));
        let received_clone = received.clone();
        b.read(None, Some(b'\n'))
            .done(Some(Box::new(move |chunk| received_clone.set(Some(chunk)))), None);
        lp.run();
        assert_eq!(received.take().unwrap(), Bytes::from_static(b"hi\n"));
        assert_eq!(b.read(None, None).get_result().unwrap(), Bytes::from_static(b"more"));
    }

    #[test]
    fn second_concurrent_read_fails_with_busy() {
        let lp = loop_handle();
        let (_a, b) = MemoryStream::pair(lp.clone());
        let _first = b.read(None, None);
        let second = b.read(None, None);
        assert_eq!(second.get_result().unwrap_err(), Error::Busy);
    }

    #[test]
    fn reading_a_closed_stream_fails_with_unreadable() {
        let lp = loop_handle();
        let (_a, b) = MemoryStream::pair(lp.clone());
        b.close(None);
        assert_eq!(b.read(None, None).get_result().unwrap_err(), Error::Unreadable);
    }

    #[test]
    fn close_rejects_a_pending_read() {
        let lp = loop_handle();
        let (_a, b) = MemoryStream::pair(lp.clone());
        let pending = b.read(None, None);
        b.close(Some(Error::logic("shutting down")));
        lp.run();
        assert!(pending.get_result().is_err());
    }

    #[test]
    fn close_is_idempotent() {
        let lp = loop_handle();
        let (_a, b) = MemoryStream::pair(lp.clone());
        b.close(None);
        b.close(None);
        assert!(!b.is_open());
    }

    #[test]
    fn pipe_transfers_until_the_bounded_length() {
        let lp = loop_handle();
        let (source, source_peer) = MemoryStream::pair(lp.clone());
        let (dest, dest_peer) = MemoryStream::pair(lp.clone());
        source_peer.write(Bytes::from_static(b"abcdef")).done(None, None);
        lp.run();

        let total = pipe(Rc::new(source), Rc::new(dest), true, Some(4), None);
        lp.run();
        assert_eq!(total.get_result().unwrap(), 4);
        assert_eq!(dest_peer.read(None, None).get_result().unwrap(), Bytes::from_static(b"abcd"));
    }

    #[test]
    fn pipe_ends_dest_when_source_closes() {
        let lp = loop_handle();
        let (source, source_peer) = MemoryStream::pair(lp.clone());
        let (dest, dest_peer) = MemoryStream::pair(lp.clone());
        source_peer.write(Bytes::from_static(b"abc")).done(None, None);
        source_peer.close(None);
        lp.run();

        let total = pipe(Rc::new(source), Rc::new(dest), true, None, None);
        lp.run();
        assert_eq!(total.get_result().unwrap(), 3);
        assert!(!dest_peer.is_open());
    }

    #[test]
    fn pipe_stops_gracefully_when_dest_closes_while_a_read_is_outstanding() {
        let lp = loop_handle();
        let (source, source_peer) = MemoryStream::pair(lp.clone());
        let (dest, _dest_peer) = MemoryStream::pair(lp.clone());

        let total = pipe(Rc::new(source), Rc::new(dest.clone()), true, None, None);
        // Nothing is in `source`'s buffer yet, so `pipe` is now parked on
        // `source.read()`. Close `dest` while that read is still in
        // flight, then deliver the bytes that will make it resolve.
        dest.close(None);
        source_peer.write(Bytes::from_static(b"abc")).done(None, None);
        lp.run();

        assert_eq!(total.get_result().unwrap(), 3);
    }
}
