//! The native primitives the stream operations are built on.
//!
//! Any loop that implements [`NativeStreams`] can host [`crate::Streams`];
//! [`crate::reactor::Reactor`] is the mio-backed implementation shipped with
//! the crate.
//!
//! Every method returns a native status: `>= 0` on success, a negative
//! error code otherwise. When a method fails, the callbacks passed to it are
//! dropped without ever being called. When it succeeds, a one-shot callback
//! is called exactly once, from inside the loop's dispatch, never from
//! inside the initiating call.

use crate::{buffer::ReadBuffer, handle::HandleId};

/// Completion of a shutdown or write request.
pub type StatusCallback = Box<dyn FnOnce(i32) + Send>;

/// Fired once per incoming connection on a listening handle.
pub type ConnectionCallback = Box<dyn FnMut(i32) + Send>;

/// Supplies a buffer of at least the suggested size before each read.
pub type AllocCallback = Box<dyn FnMut(usize) -> ReadBuffer + Send>;

/// Receives the read result together with the buffer the bytes landed in.
///
/// `nread > 0` is a byte count, `0` is a spurious wakeup, `EOF` is end of
/// stream and any other negative value is an error.
pub type ReadCallback = Box<dyn FnMut(isize, ReadBuffer) + Send>;

pub trait NativeStreams: Send + Sync {
    fn shutdown(&self, handle: HandleId, cb: StatusCallback) -> i32;

    fn listen(&self, handle: HandleId, backlog: i32, cb: ConnectionCallback) -> i32;

    fn accept(&self, server: HandleId, client: HandleId) -> i32;

    fn read_start(&self, handle: HandleId, alloc: AllocCallback, read: ReadCallback) -> i32;

    fn read_stop(&self, handle: HandleId) -> i32;

    fn write(&self, handle: HandleId, data: Vec<u8>, cb: StatusCallback) -> i32;

    /// Writes `data` and transfers `send_handle` along with it.
    fn write2(&self, handle: HandleId, data: Vec<u8>, send_handle: HandleId, cb: StatusCallback)
        -> i32;

    /// Writes what can be written right now and returns the byte count.
    fn try_write(&self, handle: HandleId, data: &[u8]) -> i32;

    fn is_readable(&self, handle: HandleId) -> bool;

    fn is_writable(&self, handle: HandleId) -> bool;

    fn set_blocking(&self, handle: HandleId, blocking: bool) -> i32;

    /// Closes the handle. Outstanding one-shot requests complete with
    /// `ECANCELED`; persistent callbacks are dropped.
    fn close(&self, handle: HandleId) -> i32;
}
