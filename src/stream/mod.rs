//! Stream operations: shutdown, listen, accept, read, write and the
//! synchronous queries.
//!
//! Each operation validates its handle arguments, then either allocates a
//! pending request (one-shot operations) or installs a persistent callback
//! in the handle's slot (listen, read-start), issues the native call and
//! returns without waiting. Results reach the caller later, through the
//! continuation, from inside the loop's dispatch.
//!
//! ```text
//! shutdown/write/write2:
//!   check_stream ──> RequestManager::setup ──> native call
//!        native completion ──> fulfill([Nil] | [Error]) ──> cleanup
//!
//! listen:
//!   check_stream ──> install Slot::Connection ──> native listen
//!        every connection ──> fire slot([Nil] | [Error])
//!
//! read_start:
//!   check_stream ──> install Slot::Read ──> native read_start
//!        alloc(suggested) ──> BufferPool::acquire
//!        read(n, buffer)  ──> copy bytes, release buffer
//!                         ──> n > 0: [Nil, Bytes]   0: nothing
//!                             EOF:   []             err: [Error]
//! ```

pub mod config;
pub mod traits;

use std::sync::Arc;

use crate::{
    buffer::BufferPool,
    continuation::{CallbackTable, Continuation, ContinuationTable},
    error::{Result, StreamError},
    handle::{check_stream, Handle, Slot},
    native::{AllocCallback, ConnectionCallback, NativeStreams, ReadCallback, StatusCallback},
    request::{PendingRequest, RequestId, RequestKind, RequestManager},
    status::{DefaultFormatter, StatusFormatter},
    value::{Outcome, Value},
};
use config::LoopConfig;
use traits::{LogLevel, Logger};

/// The stream operations bound to one native loop.
///
/// Cloning is cheap; clones share the continuation table, request
/// bookkeeping and buffer pool, so a continuation can capture a clone and
/// issue further operations from inside a callback.
pub struct Streams<N: NativeStreams> {
    native: Arc<N>,
    table: Arc<dyn ContinuationTable>,
    formatter: Arc<dyn StatusFormatter>,
    requests: RequestManager,
    buffers: BufferPool,
    logger: Arc<dyn Logger>,
}

impl<N: NativeStreams> Clone for Streams<N> {
    fn clone(&self) -> Self {
        Self {
            native: Arc::clone(&self.native),
            table: Arc::clone(&self.table),
            formatter: Arc::clone(&self.formatter),
            requests: self.requests.clone(),
            buffers: self.buffers.clone(),
            logger: Arc::clone(&self.logger),
        }
    }
}

impl<N: NativeStreams + 'static> Streams<N> {
    pub fn new(native: Arc<N>, config: &LoopConfig) -> Self {
        Self::with_parts(
            native,
            Arc::new(CallbackTable::new()),
            Arc::new(DefaultFormatter),
            config,
        )
    }

    /// Builds the operations around a caller-provided continuation table
    /// and status formatter.
    pub fn with_parts(
        native: Arc<N>,
        table: Arc<dyn ContinuationTable>,
        formatter: Arc<dyn StatusFormatter>,
        config: &LoopConfig,
    ) -> Self {
        Self {
            requests: RequestManager::new(Arc::clone(&table), Arc::clone(&formatter)),
            buffers: BufferPool::new(config.buffer_pool_capacity),
            logger: Arc::clone(&config.logger),
            native,
            table,
            formatter,
        }
    }

    pub fn native(&self) -> &Arc<N> {
        &self.native
    }

    pub fn table(&self) -> &Arc<dyn ContinuationTable> {
        &self.table
    }

    pub fn requests(&self) -> &RequestManager {
        &self.requests
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    /// Half-closes the write side once queued writes have been flushed.
    /// The continuation receives `[Nil]` or `[Error]`.
    pub fn shutdown(&self, handle: &Handle, callback: Option<Continuation>) -> Result<RequestId> {
        check_stream(handle, 1, "shutdown")?;
        let req = self.requests.setup(RequestKind::Shutdown, callback);
        let id = req.id();
        let ret = self.native.shutdown(handle.id(), self.completion(req));
        self.check_ret("shutdown", ret)?;
        Ok(id)
    }

    /// Starts listening; `callback` fires with `[Nil]` or `[Error]` for every
    /// incoming connection until the handle is closed or listen is called
    /// again.
    pub fn listen(&self, handle: &Arc<Handle>, backlog: i32, callback: Continuation) -> Result<i32> {
        check_stream(handle, 1, "listen")?;
        self.install(handle, Slot::Connection, callback);

        let on_connection: ConnectionCallback = {
            let handle = Arc::clone(handle);
            let table = Arc::clone(&self.table);
            let formatter = Arc::clone(&self.formatter);
            let logger = Arc::clone(&self.logger);
            Box::new(move |status| {
                if status < 0 {
                    logger.log(
                        LogLevel::Debug,
                        &format!("Connection error on {:?}: {}", handle.id(), formatter.format(status)),
                    );
                }
                let args = Outcome::from_status(status, Vec::new(), &*formatter).into_args();
                fire(&*table, &*logger, &handle, Slot::Connection, args);
            })
        };

        let ret = self.native.listen(handle.id(), backlog, on_connection);
        self.check_ret("listen", ret)
    }

    /// Moves a pending connection from `server` onto `client`.
    pub fn accept(&self, server: &Handle, client: &Handle) -> Result<i32> {
        check_stream(server, 1, "accept")?;
        check_stream(client, 2, "accept")?;
        let ret = self.native.accept(server.id(), client.id());
        self.check_ret("accept", ret)
    }

    /// Starts delivering incoming data to `callback`.
    ///
    /// The callback receives `[Nil, Bytes]` for data, `[]` at end of stream
    /// and `[Error]` on failure. Zero-byte reads are not delivered.
    pub fn read_start(&self, handle: &Arc<Handle>, callback: Continuation) -> Result<i32> {
        check_stream(handle, 1, "read_start")?;
        self.install(handle, Slot::Read, callback);

        let alloc: AllocCallback = {
            let buffers = self.buffers.clone();
            Box::new(move |suggested| buffers.acquire(suggested))
        };

        let read: ReadCallback = {
            let handle = Arc::clone(handle);
            let table = Arc::clone(&self.table);
            let formatter = Arc::clone(&self.formatter);
            let logger = Arc::clone(&self.logger);
            Box::new(move |nread, buffer| {
                let outcome = Outcome::from_read(nread, &buffer, &*formatter);
                drop(buffer);

                let Some(outcome) = outcome else {
                    return;
                };
                if let Outcome::Error(err) = &outcome {
                    logger.log(
                        LogLevel::Debug,
                        &format!("Read error on {:?}: {}", handle.id(), err),
                    );
                }
                fire(&*table, &*logger, &handle, Slot::Read, outcome.into_args());
            })
        };

        let ret = self.native.read_start(handle.id(), alloc, read);
        self.check_ret("read_start", ret)
    }

    /// Stops reading. The read registration stays installed but no further
    /// read callbacks are dispatched.
    pub fn read_stop(&self, handle: &Handle) -> Result<i32> {
        check_stream(handle, 1, "read_stop")?;
        let ret = self.native.read_stop(handle.id());
        self.check_ret("read_stop", ret)
    }

    /// Queues `data` for writing. The bytes are copied, so the caller's
    /// buffer is free as soon as this returns.
    pub fn write(
        &self,
        handle: &Handle,
        data: impl AsRef<[u8]>,
        callback: Option<Continuation>,
    ) -> Result<RequestId> {
        check_stream(handle, 1, "write")?;
        let payload = data.as_ref().to_vec();
        let req = self.requests.setup(RequestKind::Write, callback);
        let id = req.id();
        let ret = self.native.write(handle.id(), payload, self.completion(req));
        self.check_ret("write", ret)?;
        Ok(id)
    }

    /// Like [`write`](Self::write), transferring `send_handle` to the peer
    /// along with the data.
    pub fn write2(
        &self,
        handle: &Handle,
        data: impl AsRef<[u8]>,
        send_handle: &Handle,
        callback: Option<Continuation>,
    ) -> Result<RequestId> {
        check_stream(handle, 1, "write2")?;
        check_stream(send_handle, 3, "write2")?;
        let payload = data.as_ref().to_vec();
        let req = self.requests.setup(RequestKind::Write2, callback);
        let id = req.id();
        let ret = self
            .native
            .write2(handle.id(), payload, send_handle.id(), self.completion(req));
        self.check_ret("write2", ret)?;
        Ok(id)
    }

    /// Writes as much of `data` as possible without queueing and returns
    /// the number of bytes written.
    pub fn try_write(&self, handle: &Handle, data: impl AsRef<[u8]>) -> Result<usize> {
        check_stream(handle, 1, "try_write")?;
        let ret = self.native.try_write(handle.id(), data.as_ref());
        let written = self.check_ret("try_write", ret)?;
        Ok(written as usize)
    }

    pub fn is_readable(&self, handle: &Handle) -> Result<bool> {
        check_stream(handle, 1, "is_readable")?;
        Ok(self.native.is_readable(handle.id()))
    }

    pub fn is_writable(&self, handle: &Handle) -> Result<bool> {
        check_stream(handle, 1, "is_writable")?;
        Ok(self.native.is_writable(handle.id()))
    }

    pub fn set_blocking(&self, handle: &Handle, blocking: bool) -> Result<i32> {
        check_stream(handle, 1, "set_blocking")?;
        let ret = self.native.set_blocking(handle.id(), blocking);
        self.check_ret("set_blocking", ret)
    }

    /// Closes the handle and releases its persistent callbacks. Pending
    /// shutdown and write requests complete with `ECANCELED`.
    pub fn close(&self, handle: &Handle) -> Result<i32> {
        check_stream(handle, 1, "close")?;
        handle.mark_closed();
        for slot in [Slot::Read, Slot::Connection] {
            if let Some(callback) = handle.clear(slot) {
                self.table.release(callback);
            }
        }
        self.logger
            .log(LogLevel::Debug, &format!("Closing {:?}", handle.id()));
        let ret = self.native.close(handle.id());
        self.check_ret("close", ret)
    }

    /// Wraps a pending request into the native completion callback:
    /// fulfill, then clean up.
    fn completion(&self, mut req: Box<PendingRequest>) -> StatusCallback {
        let logger = Arc::clone(&self.logger);
        Box::new(move |status| {
            if let Err(e) = req.fulfill(status, Vec::new()) {
                logger.log(
                    LogLevel::Error,
                    &format!("{:?} {:?} completion failed: {}", req.kind(), req.id(), e),
                );
            }
            req.cleanup();
        })
    }

    fn install(&self, handle: &Handle, slot: Slot, callback: Continuation) {
        let callback = self.table.register(callback);
        if let Some(previous) = handle.install(slot, callback) {
            self.table.release(previous);
        }
    }

    fn check_ret(&self, op: &'static str, ret: i32) -> Result<i32> {
        if ret >= 0 {
            return Ok(ret);
        }
        let error = self.formatter.format(ret);
        self.logger
            .log(LogLevel::Debug, &format!("{} rejected: {}", op, error));
        Err(StreamError::Status { op, error })
    }
}

/// Invokes whatever is installed in `slot`. A slot cleared by close makes
/// the notification a no-op.
fn fire(table: &dyn ContinuationTable, logger: &dyn Logger, handle: &Handle, slot: Slot, args: Vec<Value>) {
    let Some(callback) = handle.callback(slot) else {
        logger.log(
            LogLevel::Warn,
            &format!("{:?} callback missing on {:?}", slot, handle.id()),
        );
        return;
    };
    if let Err(e) = table.invoke(callback, args) {
        logger.log(
            LogLevel::Error,
            &format!("{:?} callback on {:?} failed: {}", slot, handle.id(), e),
        );
    }
}
