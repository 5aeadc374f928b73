//! Loop handles and the stream capability guard.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex, PoisonError,
};

use crate::{
    continuation::CallbackRef,
    error::{Result, StreamError},
};

/// Identifies a handle inside the native loop.
///
/// The reactor uses the id directly as the mio token, so id 0 is never
/// handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(pub usize);

impl HandleId {
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Every handle type a loop can own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    Tcp,
    Tty,
    Pipe,
    Udp,
    Timer,
    Idle,
    Prepare,
    Check,
    Signal,
    Process,
    FsEvent,
    FsPoll,
    Poll,
    Async,
}

/// The stream subset of [`HandleKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Tcp,
    Tty,
    Pipe,
}

impl From<StreamKind> for HandleKind {
    fn from(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Tcp => HandleKind::Tcp,
            StreamKind::Tty => HandleKind::Tty,
            StreamKind::Pipe => HandleKind::Pipe,
        }
    }
}

/// Capability test used before any stream operation is issued.
pub trait StreamCapable {
    fn stream_kind(&self) -> Option<StreamKind>;

    fn is_stream(&self) -> bool {
        self.stream_kind().is_some()
    }
}

impl StreamCapable for HandleKind {
    fn stream_kind(&self) -> Option<StreamKind> {
        match self {
            HandleKind::Tcp => Some(StreamKind::Tcp),
            HandleKind::Tty => Some(StreamKind::Tty),
            HandleKind::Pipe => Some(StreamKind::Pipe),
            _ => None,
        }
    }
}

/// Which persistent callback slot of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Read,
    Connection,
}

#[derive(Debug, Default)]
struct CallbackSlots {
    read: Option<CallbackRef>,
    connection: Option<CallbackRef>,
}

impl CallbackSlots {
    fn get_mut(&mut self, slot: Slot) -> &mut Option<CallbackRef> {
        match slot {
            Slot::Read => &mut self.read,
            Slot::Connection => &mut self.connection,
        }
    }
}

/// A loop handle as seen by the stream operations.
#[derive(Debug)]
pub struct Handle {
    id: HandleId,
    kind: HandleKind,
    slots: Mutex<CallbackSlots>,
    open: AtomicBool,
}

/// Shared reference to a handle.
pub type HandleRef = Arc<Handle>;

impl Handle {
    pub fn new(id: HandleId, kind: HandleKind) -> HandleRef {
        Arc::new(Self {
            id,
            kind,
            slots: Mutex::new(CallbackSlots::default()),
            open: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }

    pub fn callback(&self, slot: Slot) -> Option<CallbackRef> {
        *self.lock_slots().get_mut(slot)
    }

    /// Installs `callback` in `slot`, returning the registration it replaced.
    pub fn install(&self, slot: Slot, callback: CallbackRef) -> Option<CallbackRef> {
        self.lock_slots().get_mut(slot).replace(callback)
    }

    pub fn clear(&self, slot: Slot) -> Option<CallbackRef> {
        self.lock_slots().get_mut(slot).take()
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, CallbackSlots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StreamCapable for Handle {
    fn stream_kind(&self) -> Option<StreamKind> {
        self.kind.stream_kind()
    }
}

/// Rejects anything that is not an open stream handle.
///
/// `index` is the argument position reported back to the caller.
pub fn check_stream(handle: &Handle, index: usize, op: &'static str) -> Result<StreamKind> {
    match handle.stream_kind() {
        Some(kind) if handle.is_open() => Ok(kind),
        Some(_) => Err(StreamError::argument(index, op, "stream handle is closed")),
        None => Err(StreamError::argument(index, op, "expected stream handle")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_three_stream_kinds() {
        let all = [
            HandleKind::Tcp,
            HandleKind::Tty,
            HandleKind::Pipe,
            HandleKind::Udp,
            HandleKind::Timer,
            HandleKind::Idle,
            HandleKind::Prepare,
            HandleKind::Check,
            HandleKind::Signal,
            HandleKind::Process,
            HandleKind::FsEvent,
            HandleKind::FsPoll,
            HandleKind::Poll,
            HandleKind::Async,
        ];
        let streams: Vec<_> = all.iter().filter(|k| k.is_stream()).collect();
        assert_eq!(
            streams,
            vec![&HandleKind::Tcp, &HandleKind::Tty, &HandleKind::Pipe]
        );
    }

    #[test]
    fn test_check_stream() {
        let tcp = Handle::new(HandleId(1), HandleKind::Tcp);
        assert_eq!(check_stream(&tcp, 1, "write").unwrap(), StreamKind::Tcp);

        let udp = Handle::new(HandleId(2), HandleKind::Udp);
        let err = check_stream(&udp, 3, "write2").unwrap_err();
        assert!(matches!(err, StreamError::Argument { index: 3, op: "write2", .. }));

        tcp.mark_closed();
        assert!(check_stream(&tcp, 1, "write").is_err());
    }

    #[test]
    fn test_slot_replacement() {
        let pipe = Handle::new(HandleId(4), HandleKind::Pipe);
        assert!(pipe.callback(Slot::Read).is_none());

        let table = crate::continuation::CallbackTable::new();
        use crate::continuation::ContinuationTable;
        let first = table.register(Box::new(|_| {}));
        let second = table.register(Box::new(|_| {}));

        assert_eq!(pipe.install(Slot::Read, first), None);
        assert_eq!(pipe.install(Slot::Read, second), Some(first));
        assert_eq!(pipe.callback(Slot::Read), Some(second));
        assert_eq!(pipe.callback(Slot::Connection), None);
        assert_eq!(pipe.clear(Slot::Read), Some(second));
    }
}
