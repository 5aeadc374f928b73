//! The mio-backed native loop.
//!
//! The reactor owns every endpoint, registers interest with the poller only
//! while something is waiting on a handle, and delivers results through the
//! callbacks handed to [`NativeStreams`]. Registration is edge-triggered, so
//! every readiness event is drained until the socket reports `WouldBlock`.
//!
//! ```text
//! run_once():
//!   poll(timeout) ──> for each Readiness
//!       writable ──> flush queued writes ──> pending shutdown
//!       readable ──> listener: accept up to backlog ──> connection callback
//!                └─> stream:   alloc ──> read ──> read callback
//!   fed handles  ──> drain again (after accept / read_start)
//!   completions  ──> write / shutdown callbacks, in issue order
//! ```
//!
//! No internal lock is held while a user callback runs, so callbacks are free
//! to issue further operations on the same loop.

use std::{
    collections::{HashMap, VecDeque},
    io,
    net::SocketAddr,
    os::fd::{AsRawFd, BorrowedFd, OwnedFd},
    path::Path,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    time::Duration,
};

use mio::{
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
    Interest, Registry, Token,
};

use crate::{
    buffer::ReadBuffer,
    error::Result,
    handle::{Handle, HandleId, HandleRef, StreamKind},
    native::{AllocCallback, ConnectionCallback, NativeStreams, ReadCallback, StatusCallback},
    net::{ipc, Accepted, Io},
    poll::PollHandle,
    status::{
        from_io_error, EAGAIN, EBADF, EBUSY, ECANCELED, EINVAL, ENOTCONN, EOF, EPIPE,
    },
    stream::{
        config::LoopConfig,
        traits::{LogLevel, Logger},
    },
};

pub const DEFAULT_EVENTS_CAPACITY: usize = 1024;
pub const DEFAULT_POLL_TIMEOUT_MS: u64 = 100;
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

type ReadCallbacks = Arc<Mutex<(AllocCallback, ReadCallback)>>;
type SharedConnectionCallback = Arc<Mutex<ConnectionCallback>>;

struct PendingWrite {
    data: Vec<u8>,
    offset: usize,
    send_fd: Option<OwnedFd>,
    cb: StatusCallback,
}

struct NativeHandle {
    kind: StreamKind,
    io: Io,
    registered: Option<Interest>,
    reading: Option<ReadCallbacks>,
    on_connection: Option<SharedConnectionCallback>,
    backlog: usize,
    pending: VecDeque<Accepted>,
    writes: VecDeque<PendingWrite>,
    shutdown: Option<StatusCallback>,
    write_shut: bool,
    read_eof: bool,
    ipc: bool,
}

impl NativeHandle {
    fn new(kind: StreamKind, io: Io, ipc: bool) -> Self {
        Self {
            kind,
            io,
            registered: None,
            reading: None,
            on_connection: None,
            backlog: 0,
            pending: VecDeque::new(),
            writes: VecDeque::new(),
            shutdown: None,
            write_shut: false,
            read_eof: false,
            ipc,
        }
    }

    fn readable(&self) -> bool {
        self.io.is_connected() && !self.read_eof
    }

    fn writable(&self) -> bool {
        self.io.is_connected() && !self.write_shut && self.shutdown.is_none()
    }

    fn desired_interest(&self) -> Option<Interest> {
        let read = self.reading.is_some() || self.on_connection.is_some();
        let write = !self.writes.is_empty() || self.shutdown.is_some();
        match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Writes as much of the queue as the socket takes, then performs a
    /// pending shutdown once the queue is empty. Finished requests are
    /// appended to `completions`.
    fn flush(&mut self, completions: &mut VecDeque<(StatusCallback, i32)>) {
        while let Some(w) = self.writes.front_mut() {
            if w.offset >= w.data.len() && w.send_fd.is_none() {
                if let Some(done) = self.writes.pop_front() {
                    completions.push_back((done.cb, 0));
                }
                continue;
            }

            let chunk = &w.data[w.offset..];
            let result = match (self.ipc, self.io.raw_fd()) {
                (true, Some(socket)) => {
                    ipc::send(socket, chunk, w.send_fd.as_ref().map(AsRawFd::as_raw_fd))
                }
                _ => self.io.write(chunk),
            };

            match result {
                Ok(0) if !chunk.is_empty() => break,
                Ok(n) => {
                    w.offset += n;
                    w.send_fd = None;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if let Some(failed) = self.writes.pop_front() {
                        completions.push_back((failed.cb, from_io_error(&e)));
                    }
                }
            }
        }

        if self.writes.is_empty() {
            if let Some(cb) = self.shutdown.take() {
                let status = match self.io.shutdown_write() {
                    Ok(()) => 0,
                    Err(e) => from_io_error(&e),
                };
                self.write_shut = true;
                completions.push_back((cb, status));
            }
        }
    }

    /// Completes everything still queued with `ECANCELED`.
    fn cancel(&mut self, completions: &mut VecDeque<(StatusCallback, i32)>) {
        for w in self.writes.drain(..) {
            completions.push_back((w.cb, ECANCELED));
        }
        if let Some(cb) = self.shutdown.take() {
            completions.push_back((cb, ECANCELED));
        }
    }
}

#[derive(Default)]
struct LoopState {
    handles: HashMap<HandleId, NativeHandle>,
    completions: VecDeque<(StatusCallback, i32)>,
    fed: VecDeque<HandleId>,
}

impl LoopState {
    fn has_work(&self) -> bool {
        !self.completions.is_empty() || !self.fed.is_empty()
    }
}

#[derive(Clone, Copy)]
enum ReadStep {
    Retry,
    Deliver(isize),
}

pub struct Reactor {
    poll_handle: Mutex<PollHandle>,
    registry: Registry,
    waker: Arc<mio::Waker>,
    state: Mutex<LoopState>,
    next_id: AtomicUsize,
    running: AtomicBool,
    config: LoopConfig,
    logger: Arc<dyn Logger>,
}

impl Reactor {
    pub fn new(config: LoopConfig) -> anyhow::Result<Self> {
        let poll_handle = PollHandle::new(config.events_capacity)?;
        let registry = poll_handle.registry().try_clone()?;
        let waker = poll_handle.waker();
        Ok(Self {
            poll_handle: Mutex::new(poll_handle),
            registry,
            waker,
            state: Mutex::new(LoopState::default()),
            next_id: AtomicUsize::new(1),
            running: AtomicBool::new(false),
            logger: Arc::clone(&config.logger),
            config,
        })
    }

    pub fn config(&self) -> &LoopConfig {
        &self.config
    }

    /// Runs until [`stop`](Self::stop) is called.
    pub fn run(&self) -> anyhow::Result<()> {
        self.running.store(true, Ordering::SeqCst);
        self.logger.log(LogLevel::Info, "Event loop started");

        while self.running.load(Ordering::SeqCst) {
            self.run_once(Some(self.config.poll_timeout()))?;
        }

        self.logger.log(LogLevel::Info, "Event loop stopped");
        Ok(())
    }

    /// One loop iteration. Returns the number of events and completions
    /// dispatched.
    ///
    /// The poll does not block when completions or re-drains are already
    /// queued.
    pub fn run_once(&self, timeout: Option<Duration>) -> anyhow::Result<usize> {
        let timeout = if self.lock_state().has_work() {
            Some(Duration::ZERO)
        } else {
            timeout
        };

        let events = self
            .poll_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .poll(timeout)?;

        let mut dispatched = 0;
        for event in &events {
            let id = HandleId(event.token().0);
            if event.is_error() {
                self.logger
                    .log(LogLevel::Debug, &format!("Error condition on {:?}", id));
            }
            if event.wants_write() {
                self.on_writable(id);
            }
            if event.wants_read() {
                self.on_readable(id);
            }
            dispatched += 1;
        }

        let fed: Vec<HandleId> = self.lock_state().fed.drain(..).collect();
        for id in fed {
            self.on_readable(id);
        }

        let completions: Vec<_> = self.lock_state().completions.drain(..).collect();
        for (cb, status) in completions {
            cb(status);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    pub fn stop(&self) -> anyhow::Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(self.waker.wake()?)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True while any handle is waiting on I/O or callbacks are queued.
    pub fn is_alive(&self) -> bool {
        let state = self.lock_state();
        state.has_work() || state.handles.values().any(|h| h.registered.is_some())
    }

    pub fn tcp_listen(&self, addr: SocketAddr) -> Result<HandleRef> {
        let listener = TcpListener::bind(addr)?;
        Ok(self.insert(StreamKind::Tcp, Io::TcpListener(listener), false))
    }

    /// Connects to `addr`. The connect itself blocks; the resulting stream
    /// is non-blocking.
    pub fn tcp_connect(&self, addr: SocketAddr) -> Result<HandleRef> {
        let stream = std::net::TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        stream.set_nodelay(true)?;
        Ok(self.insert(StreamKind::Tcp, Io::Tcp(TcpStream::from_std(stream)), false))
    }

    /// An unconnected TCP handle, ready to be passed to `accept`.
    pub fn tcp_init(&self) -> HandleRef {
        self.insert(StreamKind::Tcp, Io::Idle, false)
    }

    pub fn pipe_bind(&self, path: impl AsRef<Path>) -> Result<HandleRef> {
        let listener = UnixListener::bind(path)?;
        Ok(self.insert(StreamKind::Pipe, Io::PipeListener(listener), false))
    }

    pub fn pipe_connect(&self, path: impl AsRef<Path>, ipc: bool) -> Result<HandleRef> {
        let stream = std::os::unix::net::UnixStream::connect(path)?;
        stream.set_nonblocking(true)?;
        Ok(self.insert(StreamKind::Pipe, Io::Pipe(UnixStream::from_std(stream)), ipc))
    }

    /// An unconnected pipe handle. `ipc` pipes can carry handles.
    pub fn pipe_init(&self, ipc: bool) -> HandleRef {
        self.insert(StreamKind::Pipe, Io::Idle, ipc)
    }

    /// Two connected pipe handles.
    pub fn pipe_pair(&self, ipc: bool) -> Result<(HandleRef, HandleRef)> {
        let (a, b) = UnixStream::pair()?;
        Ok((
            self.insert(StreamKind::Pipe, Io::Pipe(a), ipc),
            self.insert(StreamKind::Pipe, Io::Pipe(b), ipc),
        ))
    }

    pub fn local_addr(&self, handle: HandleId) -> Option<SocketAddr> {
        match &self.lock_state().handles.get(&handle)?.io {
            Io::TcpListener(l) => l.local_addr().ok(),
            Io::Tcp(s) => s.local_addr().ok(),
            _ => None,
        }
    }

    /// Connections or received handles waiting for `accept`.
    pub fn pending_count(&self, handle: HandleId) -> usize {
        self.lock_state()
            .handles
            .get(&handle)
            .map_or(0, |h| h.pending.len())
    }

    fn insert(&self, kind: StreamKind, io: Io, ipc: bool) -> HandleRef {
        let id = HandleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock_state()
            .handles
            .insert(id, NativeHandle::new(kind, io, ipc));
        self.logger
            .log(LogLevel::Debug, &format!("Opened {:?} handle {:?}", kind, id));
        Handle::new(id, kind.into())
    }

    fn lock_state(&self) -> MutexGuard<'_, LoopState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Brings the poller registration in line with what the handle waits on.
    fn sync_interest(&self, id: HandleId, h: &mut NativeHandle) {
        let desired = h.desired_interest();
        if desired == h.registered {
            return;
        }
        let registered = h.registered;
        let Some(source) = h.io.source() else {
            return;
        };

        let token = Token(id.as_usize());
        let result = match (registered, desired) {
            (None, Some(interest)) => self.registry.register(source, token, interest),
            (Some(_), Some(interest)) => self.registry.reregister(source, token, interest),
            (Some(_), None) => self.registry.deregister(source),
            (None, None) => Ok(()),
        };

        match result {
            Ok(()) => h.registered = desired,
            Err(e) => self.logger.log(
                LogLevel::Error,
                &format!("Failed to update interest for {:?}: {}", id, e),
            ),
        }
    }

    fn on_writable(&self, id: HandleId) {
        let mut state = self.lock_state();
        let LoopState {
            handles,
            completions,
            ..
        } = &mut *state;
        if let Some(h) = handles.get_mut(&id) {
            h.flush(completions);
            self.sync_interest(id, h);
        }
    }

    fn on_readable(&self, id: HandleId) {
        let (listening, reading) = match self.lock_state().handles.get(&id) {
            Some(h) => (h.on_connection.clone(), h.reading.is_some()),
            None => return,
        };
        if let Some(callback) = listening {
            self.drain_accepts(id, callback);
        } else if reading {
            self.drain_reads(id);
        }
    }

    fn drain_accepts(&self, id: HandleId, callback: SharedConnectionCallback) {
        let mut notify = Vec::new();
        {
            let mut state = self.lock_state();
            let Some(h) = state.handles.get_mut(&id) else {
                return;
            };
            while h.pending.len() < h.backlog {
                match h.io.accept() {
                    Ok(io) => {
                        h.pending.push_back(Accepted::Io(io));
                        notify.push(0);
                    }
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => {
                        self.logger.log(
                            LogLevel::Warn,
                            &format!("Accept failed on {:?}: {}", id, e),
                        );
                        notify.push(from_io_error(&e));
                        break;
                    }
                }
            }
        }

        for status in notify {
            let mut cb = callback.lock().unwrap_or_else(PoisonError::into_inner);
            (*cb)(status);
        }
    }

    fn drain_reads(&self, id: HandleId) {
        loop {
            let callbacks = match self.lock_state().handles.get(&id) {
                Some(h) => match &h.reading {
                    Some(callbacks) => Arc::clone(callbacks),
                    None => return,
                },
                None => return,
            };

            let mut buffer: ReadBuffer = {
                let mut guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                (guard.0)(self.config.read_buffer_size)
            };

            let step = {
                let mut state = self.lock_state();
                let Some(h) = state.handles.get_mut(&id) else {
                    return;
                };
                let step = Self::read_into(h, &mut buffer);
                if let ReadStep::Deliver(nread) = step {
                    if nread < 0 {
                        h.reading = None;
                        if nread == EOF as isize {
                            h.read_eof = true;
                        }
                        self.sync_interest(id, h);
                    }
                }
                step
            };

            match step {
                ReadStep::Retry => continue,
                ReadStep::Deliver(nread) => {
                    {
                        let mut guard = callbacks.lock().unwrap_or_else(PoisonError::into_inner);
                        (guard.1)(nread, buffer);
                    }
                    if nread <= 0 {
                        return;
                    }
                }
            }
        }
    }

    fn read_into(h: &mut NativeHandle, buffer: &mut ReadBuffer) -> ReadStep {
        let result = match (h.ipc, h.io.raw_fd()) {
            (true, Some(socket)) => ipc::recv(socket, buffer).map(|(n, fds)| {
                h.pending.extend(fds.into_iter().map(Accepted::Fd));
                n
            }),
            _ => h.io.read(buffer),
        };

        match result {
            Ok(0) => ReadStep::Deliver(EOF as isize),
            Ok(n) => ReadStep::Deliver(n as isize),
            // Drained. Reported as a zero-byte read, which ends the cycle.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => ReadStep::Deliver(0),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
            Err(e) => ReadStep::Deliver(from_io_error(&e) as isize),
        }
    }

    /// Queues a write and flushes what the socket accepts right away.
    fn enqueue(&self, handle: HandleId, write: PendingWrite) -> i32 {
        let mut state = self.lock_state();
        let LoopState {
            handles,
            completions,
            ..
        } = &mut *state;
        let Some(h) = handles.get_mut(&handle) else {
            return EBADF;
        };
        h.writes.push_back(write);
        h.flush(completions);
        self.sync_interest(handle, h);
        0
    }
}

impl NativeStreams for Reactor {
    fn shutdown(&self, handle: HandleId, cb: StatusCallback) -> i32 {
        let mut state = self.lock_state();
        let LoopState {
            handles,
            completions,
            ..
        } = &mut *state;
        let Some(h) = handles.get_mut(&handle) else {
            return EBADF;
        };
        if !h.writable() {
            return ENOTCONN;
        }
        h.shutdown = Some(cb);
        h.flush(completions);
        self.sync_interest(handle, h);
        0
    }

    fn listen(&self, handle: HandleId, backlog: i32, cb: ConnectionCallback) -> i32 {
        let mut state = self.lock_state();
        let Some(h) = state.handles.get_mut(&handle) else {
            return EBADF;
        };
        if !h.io.is_listener() || backlog < 0 {
            return EINVAL;
        }
        h.backlog = usize::try_from(backlog).unwrap_or(0).max(1);
        h.on_connection = Some(Arc::new(Mutex::new(cb)));
        self.sync_interest(handle, h);
        state.fed.push_back(handle);
        0
    }

    fn accept(&self, server: HandleId, client: HandleId) -> i32 {
        let mut state = self.lock_state();

        let client_kind = match state.handles.get(&client) {
            Some(c) if !c.io.is_idle() => return EBUSY,
            Some(c) => c.kind,
            None => return EBADF,
        };

        let accepted = {
            let Some(s) = state.handles.get_mut(&server) else {
                return EBADF;
            };
            if !s.io.is_listener() && !s.ipc {
                return EINVAL;
            }
            match s.pending.front().map(Accepted::kind) {
                None => return EAGAIN,
                Some(Some(kind)) if kind != client_kind => return EINVAL,
                Some(_) => {}
            }
            match s.pending.pop_front() {
                Some(accepted) => accepted,
                None => return EAGAIN,
            }
        };

        let io = match accepted.into_io(client_kind) {
            Ok(io) => io,
            Err(e) => return from_io_error(&e),
        };
        if let Some(c) = state.handles.get_mut(&client) {
            c.io = io;
        }
        state.fed.push_back(server);
        drop(state);

        self.logger.log(
            LogLevel::Debug,
            &format!("Accepted connection from {:?} onto {:?}", server, client),
        );
        0
    }

    fn read_start(&self, handle: HandleId, alloc: AllocCallback, read: ReadCallback) -> i32 {
        let mut state = self.lock_state();
        let Some(h) = state.handles.get_mut(&handle) else {
            return EBADF;
        };
        if !h.readable() {
            return ENOTCONN;
        }
        h.reading = Some(Arc::new(Mutex::new((alloc, read))));
        self.sync_interest(handle, h);
        state.fed.push_back(handle);
        0
    }

    fn read_stop(&self, handle: HandleId) -> i32 {
        let mut state = self.lock_state();
        let Some(h) = state.handles.get_mut(&handle) else {
            return EBADF;
        };
        h.reading = None;
        self.sync_interest(handle, h);
        0
    }

    fn write(&self, handle: HandleId, data: Vec<u8>, cb: StatusCallback) -> i32 {
        match self.lock_state().handles.get(&handle) {
            None => return EBADF,
            Some(h) if h.io.is_idle() => return EBADF,
            Some(h) if !h.writable() => return EPIPE,
            Some(_) => {}
        }
        self.enqueue(
            handle,
            PendingWrite {
                data,
                offset: 0,
                send_fd: None,
                cb,
            },
        )
    }

    fn write2(&self, handle: HandleId, data: Vec<u8>, send_handle: HandleId, cb: StatusCallback) -> i32 {
        let send_fd = {
            let state = self.lock_state();
            match state.handles.get(&handle) {
                None => return EBADF,
                Some(h) if h.io.is_idle() => return EBADF,
                Some(h) if !h.ipc || data.is_empty() => return EINVAL,
                Some(h) if !h.writable() => return EPIPE,
                Some(_) => {}
            }
            let Some(raw) = state.handles.get(&send_handle).and_then(|s| s.io.raw_fd()) else {
                return EBADF;
            };
            // SAFETY: `raw` belongs to a handle that stays registered while
            // the state lock is held.
            match unsafe { BorrowedFd::borrow_raw(raw) }.try_clone_to_owned() {
                Ok(fd) => fd,
                Err(e) => return from_io_error(&e),
            }
        };
        self.enqueue(
            handle,
            PendingWrite {
                data,
                offset: 0,
                send_fd: Some(send_fd),
                cb,
            },
        )
    }

    fn try_write(&self, handle: HandleId, data: &[u8]) -> i32 {
        let mut state = self.lock_state();
        let Some(h) = state.handles.get_mut(&handle) else {
            return EBADF;
        };
        if h.io.is_idle() {
            return EBADF;
        }
        if !h.writable() {
            return EPIPE;
        }
        if !h.writes.is_empty() {
            return EAGAIN;
        }
        loop {
            match h.io.write(data) {
                Ok(n) => return i32::try_from(n).unwrap_or(i32::MAX),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return EAGAIN,
                Err(e) => return from_io_error(&e),
            }
        }
    }

    fn is_readable(&self, handle: HandleId) -> bool {
        self.lock_state()
            .handles
            .get(&handle)
            .is_some_and(NativeHandle::readable)
    }

    fn is_writable(&self, handle: HandleId) -> bool {
        self.lock_state()
            .handles
            .get(&handle)
            .is_some_and(NativeHandle::writable)
    }

    fn set_blocking(&self, handle: HandleId, blocking: bool) -> i32 {
        let mut state = self.lock_state();
        let Some(h) = state.handles.get_mut(&handle) else {
            return EBADF;
        };
        let Some(fd) = h.io.raw_fd() else {
            return EBADF;
        };
        // Accepting drains until WouldBlock, which a blocking listener never reports.
        if blocking && h.io.is_listener() {
            return EINVAL;
        }
        match ipc::set_nonblocking_fd(fd, !blocking) {
            Ok(()) => 0,
            Err(e) => from_io_error(&e),
        }
    }

    fn close(&self, handle: HandleId) -> i32 {
        let removed = {
            let mut state = self.lock_state();
            let LoopState {
                handles,
                completions,
                ..
            } = &mut *state;
            let Some(mut h) = handles.remove(&handle) else {
                return EBADF;
            };
            if h.registered.is_some() {
                if let Some(source) = h.io.source() {
                    if let Err(e) = self.registry.deregister(source) {
                        self.logger.log(
                            LogLevel::Warn,
                            &format!("Failed to deregister {:?}: {}", handle, e),
                        );
                    }
                }
            }
            h.cancel(completions);
            h
        };
        self.logger
            .log(LogLevel::Debug, &format!("Closed handle {:?}", handle));
        drop(removed);
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{EAGAIN, EBUSY, EINVAL};
    use std::{
        sync::atomic::AtomicI32,
        thread,
        time::Instant,
    };

    fn reactor() -> Reactor {
        Reactor::new(LoopConfig::default()).unwrap()
    }

    fn drive(reactor: &Reactor, done: impl Fn() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "timed out driving the loop");
            reactor.run_once(Some(Duration::from_millis(10))).unwrap();
        }
    }

    fn status_cell() -> (Arc<AtomicI32>, StatusCallback) {
        let cell = Arc::new(AtomicI32::new(i32::MAX));
        let clone = cell.clone();
        (cell, Box::new(move |status| clone.store(status, Ordering::SeqCst)))
    }

    fn collect_reads(sink: Arc<Mutex<Vec<(isize, Vec<u8>)>>>) -> (AllocCallback, ReadCallback) {
        (
            Box::new(ReadBuffer::unpooled),
            Box::new(move |nread, buf| {
                let data = if nread > 0 {
                    buf[..nread as usize].to_vec()
                } else {
                    Vec::new()
                };
                sink.lock().unwrap().push((nread, data));
            }),
        )
    }

    /// Writes until the socket buffer is full.
    fn fill(reactor: &Reactor, handle: HandleId) {
        let chunk = vec![0u8; 64 * 1024];
        while reactor.try_write(handle, &chunk) > 0 {}
    }

    #[test]
    fn test_reactor_creation() {
        let reactor = reactor();
        assert!(!reactor.is_running());
        assert!(!reactor.is_alive());
    }

    #[test]
    fn test_reactor_start_stop() {
        let reactor = Arc::new(reactor());
        let runner = reactor.clone();
        let handle = thread::spawn(move || runner.run());

        thread::sleep(Duration::from_millis(50));
        reactor.stop().unwrap();
        handle.join().unwrap().unwrap();
        assert!(!reactor.is_running());
    }

    #[test]
    fn test_write_completes_in_dispatch() {
        let reactor = reactor();
        let (a, b) = reactor.pipe_pair(false).unwrap();
        let (status, cb) = status_cell();

        assert_eq!(reactor.write(a.id(), b"ping".to_vec(), cb), 0);
        assert_eq!(status.load(Ordering::SeqCst), i32::MAX);

        drive(&reactor, || status.load(Ordering::SeqCst) != i32::MAX);
        assert_eq!(status.load(Ordering::SeqCst), 0);

        let reads = Arc::new(Mutex::new(Vec::new()));
        let (alloc, read) = collect_reads(reads.clone());
        assert_eq!(reactor.read_start(b.id(), alloc, read), 0);
        drive(&reactor, || !reads.lock().unwrap().is_empty());
        assert_eq!(reads.lock().unwrap()[0], (4, b"ping".to_vec()));
    }

    #[test]
    fn test_peer_close_delivers_eof() {
        let reactor = reactor();
        let (a, b) = reactor.pipe_pair(false).unwrap();
        let reads = Arc::new(Mutex::new(Vec::new()));
        let (alloc, read) = collect_reads(reads.clone());

        reactor.read_start(a.id(), alloc, read);
        assert_eq!(reactor.close(b.id()), 0);
        drive(&reactor, || !reads.lock().unwrap().is_empty());

        assert_eq!(reads.lock().unwrap()[0].0, EOF as isize);
        assert!(!reactor.is_readable(a.id()));
        assert_eq!(
            reactor.read_start(a.id(), Box::new(ReadBuffer::unpooled), Box::new(|_, _| {})),
            ENOTCONN
        );
    }

    #[test]
    fn test_try_write_refuses_behind_queue() {
        let reactor = reactor();
        let (a, _b) = reactor.pipe_pair(false).unwrap();
        fill(&reactor, a.id());

        let (status, cb) = status_cell();
        assert_eq!(reactor.write(a.id(), vec![1; 1024 * 1024], cb), 0);
        assert_eq!(reactor.try_write(a.id(), b"x"), EAGAIN);

        assert_eq!(reactor.close(a.id()), 0);
        reactor.run_once(Some(Duration::ZERO)).unwrap();
        assert_eq!(status.load(Ordering::SeqCst), ECANCELED);
    }

    #[test]
    fn test_shutdown_rules() {
        let reactor = reactor();
        let (a, _b) = reactor.pipe_pair(false).unwrap();
        let idle = reactor.tcp_init();

        let (first, cb) = status_cell();
        assert_eq!(reactor.shutdown(a.id(), cb), 0);
        assert!(!reactor.is_writable(a.id()));
        let (_, cb) = status_cell();
        assert_eq!(reactor.shutdown(a.id(), cb), ENOTCONN);
        let (_, cb) = status_cell();
        assert_eq!(reactor.shutdown(idle.id(), cb), ENOTCONN);

        drive(&reactor, || first.load(Ordering::SeqCst) != i32::MAX);
        assert_eq!(first.load(Ordering::SeqCst), 0);

        let (_, cb) = status_cell();
        assert_eq!(reactor.write(a.id(), b"late".to_vec(), cb), EPIPE);
    }

    #[test]
    fn test_accept_rules() {
        let reactor = reactor();
        let server = reactor.tcp_listen("127.0.0.1:0".parse().unwrap()).unwrap();
        let client = reactor.tcp_init();
        let pipe = reactor.pipe_init(false);

        assert_eq!(reactor.accept(server.id(), client.id()), EAGAIN);
        assert_eq!(reactor.listen(client.id(), 8, Box::new(|_| {})), EINVAL);
        assert_eq!(reactor.listen(server.id(), -1, Box::new(|_| {})), EINVAL);

        let connections = Arc::new(AtomicUsize::new(0));
        let counter = connections.clone();
        assert_eq!(
            reactor.listen(
                server.id(),
                8,
                Box::new(move |status| {
                    assert_eq!(status, 0);
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            ),
            0
        );

        let addr = reactor.local_addr(server.id()).unwrap();
        let _peer = std::net::TcpStream::connect(addr).unwrap();
        drive(&reactor, || connections.load(Ordering::SeqCst) == 1);

        assert_eq!(reactor.pending_count(server.id()), 1);
        assert_eq!(reactor.accept(server.id(), pipe.id()), EINVAL);
        assert_eq!(reactor.accept(server.id(), client.id()), 0);
        assert!(reactor.is_writable(client.id()));
        assert_eq!(reactor.accept(server.id(), client.id()), EBUSY);
    }

    #[test]
    fn test_write2_requires_ipc() {
        let reactor = reactor();
        let (a, _b) = reactor.pipe_pair(false).unwrap();
        let (c, _d) = reactor.pipe_pair(true).unwrap();

        let (_, cb) = status_cell();
        assert_eq!(reactor.write2(a.id(), b"h".to_vec(), c.id(), cb), EINVAL);
        let (_, cb) = status_cell();
        assert_eq!(reactor.write2(c.id(), Vec::new(), a.id(), cb), EINVAL);
        let (_, cb) = status_cell();
        assert_eq!(reactor.write2(c.id(), b"h".to_vec(), HandleId(999), cb), EBADF);
    }

    #[test]
    fn test_set_blocking() {
        let reactor = reactor();
        let (a, _b) = reactor.pipe_pair(false).unwrap();
        let idle = reactor.pipe_init(false);

        assert_eq!(reactor.set_blocking(a.id(), true), 0);
        assert_eq!(reactor.set_blocking(a.id(), false), 0);
        assert_eq!(reactor.set_blocking(idle.id(), true), EBADF);

        let server = reactor.tcp_listen("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_eq!(reactor.set_blocking(server.id(), true), EINVAL);
        assert_eq!(reactor.set_blocking(server.id(), false), 0);
    }

    #[test]
    fn test_blocking_read_start_does_not_stall() {
        let reactor = Arc::new(reactor());
        let (a, _b) = reactor.pipe_pair(false).unwrap();
        let reads = Arc::new(Mutex::new(Vec::new()));
        let (alloc, read) = collect_reads(reads.clone());

        assert_eq!(reactor.set_blocking(a.id(), true), 0);
        assert_eq!(reactor.read_start(a.id(), alloc, read), 0);

        let (tx, rx) = std::sync::mpsc::channel();
        let runner = reactor.clone();
        thread::spawn(move || {
            let result = runner.run_once(Some(Duration::from_millis(10)));
            let _ = tx.send(result.is_ok());
        });

        assert_eq!(rx.recv_timeout(Duration::from_secs(3)), Ok(true));
        assert!(reads.lock().unwrap().iter().all(|(nread, _)| *nread == 0));
    }

    #[test]
    fn test_blocking_mode_delivers_every_byte() {
        let reactor = Reactor::new(LoopConfig::builder().read_buffer_size(16).build()).unwrap();
        let (a, b) = reactor.pipe_pair(false).unwrap();
        let payload: Vec<u8> = (0..64u8).collect();
        assert_eq!(reactor.try_write(a.id(), &payload), 64);

        let reads = Arc::new(Mutex::new(Vec::new()));
        let (alloc, read) = collect_reads(reads.clone());
        assert_eq!(reactor.set_blocking(b.id(), true), 0);
        assert_eq!(reactor.read_start(b.id(), alloc, read), 0);

        let received = || -> Vec<u8> {
            reads
                .lock()
                .unwrap()
                .iter()
                .flat_map(|(_, data)| data.clone())
                .collect()
        };
        drive(&reactor, || received().len() == payload.len());
        assert_eq!(received(), payload);
    }

    #[test]
    fn test_unknown_handle() {
        let reactor = reactor();
        let ghost = HandleId(42);
        let (_, cb) = status_cell();

        assert_eq!(reactor.write(ghost, b"x".to_vec(), cb), EBADF);
        assert_eq!(reactor.try_write(ghost, b"x"), EBADF);
        assert_eq!(reactor.read_stop(ghost), EBADF);
        assert_eq!(reactor.close(ghost), EBADF);
        assert!(!reactor.is_readable(ghost));
        assert!(!reactor.is_writable(ghost));
    }
}
