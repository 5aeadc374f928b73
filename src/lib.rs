//! # Mill-Stream
//! Callback-driven stream operations (TCP, pipes, TTYs) on top of a native event loop.
//!
//! Every operation is issued immediately and returns without waiting. Its result comes back
//! later, from inside the loop's dispatch, as a list of [`Value`]s handed to a caller-supplied
//! continuation. Nothing is retained by the caller between the call and the callback: the
//! crate keeps the continuation registered, keeps the request record alive, and releases
//! both exactly once.
//!
//! ## Result convention
//!
//! Continuations always receive one of these shapes:
//!
//! ```text
//! [Nil]           one-shot success (shutdown, write, write2) or a new connection
//! [Nil, Bytes]    data read from the stream
//! []              end of stream
//! [Error]         the operation failed; the error carries the native code and name
//! ```
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────┐    ┌──────────────────┐    ┌───────────────┐
//! │ EventLoop   │───▶│ Streams          │───▶│ NativeStreams │
//! └─────────────┘    │  RequestManager  │    │  (Reactor)    │
//!                    │  CallbackTable   │    └───────┬───────┘
//!                    │  BufferPool      │            │
//!                    └──────────────────┘            ▼
//!                                            ┌───────────────┐
//!                                            │ PollHandle    │
//!                                            │ (mio::Poll)   │
//!                                            └───────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mill_stream::{EventLoop, Value};
//!
//! fn main() -> anyhow::Result<()> {
//!     let event_loop = EventLoop::default();
//!     let server = event_loop.tcp_listen("127.0.0.1:7000".parse()?)?;
//!
//!     let streams = event_loop.streams().clone();
//!     let reactor = event_loop.reactor().clone();
//!     let listener = server.clone();
//!
//!     streams.clone().listen(&server, 128, Box::new(move |args| {
//!         if !args.first().is_some_and(Value::is_nil) {
//!             return;
//!         }
//!         let client = reactor.tcp_init();
//!         if streams.accept(&listener, &client).is_err() {
//!             return;
//!         }
//!         let echo = streams.clone();
//!         let conn = client.clone();
//!         let _ = streams.read_start(&client, Box::new(move |args| match args.as_slice() {
//!             [Value::Nil, Value::Bytes(data)] => {
//!                 let _ = echo.write(&conn, data, None);
//!             }
//!             _ => {
//!                 let _ = echo.close(&conn);
//!             }
//!         }));
//!     }))?;
//!
//!     event_loop.run()
//! }
//! ```
//!
//! - [`EventLoop`]: owns the reactor and the stream operations bound to it
//! - [`Streams`]: shutdown, listen, accept, read, write and the synchronous queries
//! - [`reactor`]: the mio-backed native loop
//! - [`native`]: the primitives any native loop has to provide
//! - [`status`]: native status codes and their translation
//! - [`error`]: Error types and result handling

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

pub mod buffer;
pub mod continuation;
pub mod error;
pub mod event;
pub mod handle;
pub mod native;
mod net;
pub mod poll;
pub mod reactor;
pub mod request;
pub mod status;
pub mod stream;
pub mod value;

pub use continuation::Continuation;
pub use error::StreamError;
pub use handle::{Handle, HandleId, HandleKind, HandleRef, StreamKind};
pub use status::StatusError;
pub use stream::{config::LoopConfig, Streams};
pub use value::{Outcome, Value};

use crate::{error::Result, reactor::Reactor};

/// A convenient prelude module that re-exports commonly used types and traits.
///
/// ```rust
/// use mill_stream::prelude::*;
/// ```
///
/// This brings into scope:
/// - [`EventLoop`], [`Streams`] and [`LoopConfig`]
/// - [`Value`] and [`Outcome`] - what continuations receive
/// - [`Handle`] and its kinds
/// - [`Logger`](stream::traits::Logger) and [`LogLevel`](stream::traits::LogLevel)
pub mod prelude {
    pub use crate::continuation::{CallbackRef, Continuation, ContinuationTable};
    pub use crate::error::StreamError;
    pub use crate::handle::{Handle, HandleId, HandleKind, HandleRef, StreamKind};
    pub use crate::native::NativeStreams;
    pub use crate::reactor::{self, Reactor};
    pub use crate::status::{StatusError, StatusFormatter};
    pub use crate::stream::config::LoopConfig;
    pub use crate::stream::traits::{LogFacade, LogLevel, Logger, NoOpLogger};
    pub use crate::stream::Streams;
    pub use crate::value::{Outcome, Value};
    pub use crate::EventLoop;
}

/// The main entry point: a native loop plus the stream operations bound to it.
///
/// `EventLoop` provides:
/// - Handle constructors for TCP and pipe streams
/// - The stream operations through [`streams()`](Self::streams)
/// - Running and stopping the loop
///
/// Continuations only ever run on the thread driving [`run()`](Self::run) or
/// [`run_once()`](Self::run_once).
///
/// ## Example
///
/// Basic usage with default configuration:
///
/// ```rust,no_run
/// use mill_stream::{EventLoop, Value};
/// use std::time::Duration;
///
/// let event_loop = EventLoop::default();
/// let (left, right) = event_loop.pipe_pair(false)?;
///
/// event_loop.streams().read_start(&right, Box::new(|args| {
///     if let [Value::Nil, Value::Bytes(data)] = args.as_slice() {
///         println!("got {:?}", data);
///     }
/// }))?;
/// event_loop.streams().write(&left, b"ping", None)?;
/// event_loop.run_once(Some(Duration::from_millis(10)))?;
/// # Ok::<(), anyhow::Error>(())
/// ```
///
/// Custom configuration:
///
/// ```rust,no_run
/// use mill_stream::{EventLoop, LoopConfig};
/// use std::time::Duration;
///
/// let config = LoopConfig::builder()
///     .events_capacity(512)
///     .poll_timeout(Duration::from_millis(20))
///     .read_buffer_size(16 * 1024)
///     .build();
/// let event_loop = EventLoop::new(config)?;
/// # Ok::<(), anyhow::Error>(())
/// ```
pub struct EventLoop {
    reactor: Arc<Reactor>,
    streams: Streams<Reactor>,
}

impl Default for EventLoop {
    /// Creates a new `EventLoop` with [`LoopConfig::default()`].
    ///
    /// # Panics
    ///
    /// Panics if the poller cannot be created.
    fn default() -> Self {
        Self::new(LoopConfig::default()).unwrap()
    }
}

impl EventLoop {
    /// Creates a new `EventLoop` from `config`.
    ///
    /// ## Errors
    ///
    /// Returns an error if the poller or its waker cannot be created.
    pub fn new(config: LoopConfig) -> anyhow::Result<Self> {
        let reactor = Arc::new(Reactor::new(config.clone())?);
        let streams = Streams::new(Arc::clone(&reactor), &config);
        Ok(Self { reactor, streams })
    }

    /// The stream operations bound to this loop. Clone it to use it inside
    /// a continuation.
    pub fn streams(&self) -> &Streams<Reactor> {
        &self.streams
    }

    pub fn reactor(&self) -> &Arc<Reactor> {
        &self.reactor
    }

    /// Binds a listening TCP handle.
    pub fn tcp_listen(&self, addr: SocketAddr) -> Result<HandleRef> {
        self.reactor.tcp_listen(addr)
    }

    pub fn tcp_connect(&self, addr: SocketAddr) -> Result<HandleRef> {
        self.reactor.tcp_connect(addr)
    }

    /// An unconnected TCP handle for `accept`.
    pub fn tcp_init(&self) -> HandleRef {
        self.reactor.tcp_init()
    }

    /// Binds a listening pipe at `path`.
    pub fn pipe_bind(&self, path: impl AsRef<Path>) -> Result<HandleRef> {
        self.reactor.pipe_bind(path)
    }

    pub fn pipe_connect(&self, path: impl AsRef<Path>, ipc: bool) -> Result<HandleRef> {
        self.reactor.pipe_connect(path, ipc)
    }

    /// An unconnected pipe handle for `accept`. Pass `ipc` to receive
    /// handles sent with `write2`.
    pub fn pipe_init(&self, ipc: bool) -> HandleRef {
        self.reactor.pipe_init(ipc)
    }

    pub fn pipe_pair(&self, ipc: bool) -> Result<(HandleRef, HandleRef)> {
        self.reactor.pipe_pair(ipc)
    }

    /// Runs the event loop, blocking the current thread and dispatching events
    /// until [`stop()`](Self::stop) is called.
    ///
    /// ## Errors
    ///
    /// Returns an error if polling fails.
    pub fn run(&self) -> anyhow::Result<()> {
        self.reactor.run()
    }

    /// Runs a single iteration, waiting at most `timeout` for I/O.
    pub fn run_once(&self, timeout: Option<Duration>) -> anyhow::Result<usize> {
        self.reactor.run_once(timeout)
    }

    /// Signals the event loop to stop.
    ///
    /// Safe to call from any thread; [`run()`](Self::run) returns after the
    /// current iteration.
    ///
    /// ## Example
    ///
    /// ```rust,no_run
    /// use mill_stream::EventLoop;
    /// use std::sync::Arc;
    /// use std::thread;
    ///
    /// let event_loop = Arc::new(EventLoop::default());
    /// let runner = Arc::clone(&event_loop);
    ///
    /// let handle = thread::spawn(move || runner.run());
    ///
    /// thread::sleep(std::time::Duration::from_secs(1));
    /// event_loop.stop()?;
    /// let _ = handle.join();
    /// # Ok::<(), anyhow::Error>(())
    /// ```
    pub fn stop(&self) -> anyhow::Result<()> {
        self.reactor.stop()
    }
}
