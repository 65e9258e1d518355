//! In-memory test fixtures.
//!
//! Built on `stream::memory::MemoryStream` rather than a raw duplex
//! pipe, so the fixture exercises the same `Core` read/write/close state
//! machine a real socket stream does, without opening a descriptor.

use std::rc::Rc;

use crate::scheduler::EventLoop;
use crate::stream::memory::MemoryStream;

/// Creates a pair of connected in-memory duplex streams for exercising
/// promise/stream contracts without real sockets.
///
/// # Example
///
/// ```ignore
/// let (a, b) = weave::testing::create_pipe(loop_handle.clone());
/// a.write(bytes::Bytes::from_static(b"hello")).done(None, None);
/// loop_handle.run();
/// assert_eq!(b.read(None, None).get_result().unwrap(), "hello");
/// ```
pub fn create_pipe(loop_handle: Rc<dyn EventLoop>) -> (MemoryStream, MemoryStream) {
    MemoryStream::pair(loop_handle)
}
