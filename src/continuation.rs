//! Reference table for continuations.
//!
//! Continuations are stored behind an opaque [`CallbackRef`] so that native
//! callbacks, request records and handle slots only ever carry a small
//! copyable key. The default table is a lockfree map, which lets a running
//! continuation register or release other entries without tripping over a
//! lock held by the dispatcher.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, TryLockError,
};

use lockfree::map::Map as LockfreeMap;

use crate::{
    error::{Result, StreamError},
    value::Value,
};

/// A caller-supplied function receiving the result values of an operation.
pub type Continuation = Box<dyn FnMut(Vec<Value>) + Send>;

/// Opaque key of a registered continuation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackRef(u64);

pub trait ContinuationTable: Send + Sync {
    fn register(&self, continuation: Continuation) -> CallbackRef;

    /// Calls the continuation behind `callback` with `args`.
    fn invoke(&self, callback: CallbackRef, args: Vec<Value>) -> Result<()>;

    /// Drops the registration. Returns `false` if it was already gone.
    fn release(&self, callback: CallbackRef) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct CallbackTable {
    entries: LockfreeMap<u64, Arc<Mutex<Continuation>>>,
    next_ref: AtomicU64,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self {
            entries: LockfreeMap::new(),
            next_ref: AtomicU64::new(1),
        }
    }
}

impl Default for CallbackTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuationTable for CallbackTable {
    fn register(&self, continuation: Continuation) -> CallbackRef {
        let key = self.next_ref.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, Arc::new(Mutex::new(continuation)));
        CallbackRef(key)
    }

    fn invoke(&self, callback: CallbackRef, args: Vec<Value>) -> Result<()> {
        let entry = self
            .entries
            .get(&callback.0)
            .map(|guard| Arc::clone(guard.val()))
            .ok_or(StreamError::UnknownCallback(callback))?;

        let mut guard = match entry.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(StreamError::CallbackBusy(callback)),
        };
        let continuation = &mut *guard;
        continuation(args);
        Ok(())
    }

    fn release(&self, callback: CallbackRef) -> bool {
        self.entries.remove(&callback.0).is_some()
    }

    fn len(&self) -> usize {
        self.entries.iter().count()
    }
}
