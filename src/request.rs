//! Pending operation records for one-shot requests (shutdown, write, write2).
//!
//! A record is boxed at setup time and the box is moved into the native
//! completion closure, so its address stays put until the native loop calls
//! back. The completion handler fulfills it and then consumes it with
//! [`PendingRequest::cleanup`]. When the native layer rejects a call it drops
//! the closure unfired, and the record's `Drop` releases the continuation
//! instead, so a failed initiation never leaves a registration behind.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crate::{
    continuation::{CallbackRef, Continuation, ContinuationTable},
    error::{Result, StreamError},
    status::StatusFormatter,
    value::{Outcome, Value},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Shutdown,
    Write,
    Write2,
}

#[derive(Clone)]
pub struct RequestManager {
    table: Arc<dyn ContinuationTable>,
    formatter: Arc<dyn StatusFormatter>,
    next_id: Arc<AtomicU64>,
    live: Arc<AtomicUsize>,
}

impl RequestManager {
    pub fn new(table: Arc<dyn ContinuationTable>, formatter: Arc<dyn StatusFormatter>) -> Self {
        Self {
            table,
            formatter,
            next_id: Arc::new(AtomicU64::new(1)),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Allocates a record, registering `continuation` if one was given.
    pub fn setup(&self, kind: RequestKind, continuation: Option<Continuation>) -> Box<PendingRequest> {
        let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let continuation = continuation.map(|c| self.table.register(c));
        self.live.fetch_add(1, Ordering::AcqRel);

        Box::new(PendingRequest {
            id,
            kind,
            continuation,
            fulfilled: false,
            table: Arc::clone(&self.table),
            formatter: Arc::clone(&self.formatter),
            live: Arc::clone(&self.live),
        })
    }

    /// Number of records that have been set up and not yet released.
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

pub struct PendingRequest {
    id: RequestId,
    kind: RequestKind,
    continuation: Option<CallbackRef>,
    fulfilled: bool,
    table: Arc<dyn ContinuationTable>,
    formatter: Arc<dyn StatusFormatter>,
    live: Arc<AtomicUsize>,
}

impl PendingRequest {
    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    /// Fires the continuation with `[Nil, extra...]` on success or
    /// `[Error]` on failure. A record without a continuation completes
    /// silently.
    pub fn fulfill(&mut self, status: i32, extra: Vec<Value>) -> Result<()> {
        if self.fulfilled {
            return Err(StreamError::AlreadyFulfilled(self.id));
        }
        self.fulfilled = true;

        let Some(callback) = self.continuation else {
            return Ok(());
        };
        let args = Outcome::from_status(status, extra, &*self.formatter).into_args();
        self.table.invoke(callback, args)
    }

    /// Releases the continuation and discards the record.
    pub fn cleanup(mut self: Box<Self>) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(callback) = self.continuation.take() {
            self.table.release(callback);
        }
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        self.release();
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}
