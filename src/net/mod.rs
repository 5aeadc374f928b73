//! OS-level stream endpoints owned by the reactor.
//!
//! Every stream handle in the loop wraps one [`Io`] value. A freshly
//! initialised handle is `Idle` until it is bound, connected, or receives a
//! connection through `accept`.
//!
//! ```text
//!   tcp_init / pipe_init ──> Idle ──accept──> Tcp / Pipe
//!   tcp_listen / pipe_bind ──> TcpListener / PipeListener
//!   tcp_connect / pipe_connect / pipe_pair ──> Tcp / Pipe
//! ```

pub(crate) mod ipc;

use std::{
    io::{self, Write},
    net::Shutdown,
    os::fd::{AsRawFd, OwnedFd, RawFd},
};

use mio::{
    event::Source,
    net::{TcpListener, TcpStream, UnixListener, UnixStream},
};
use nix::sys::socket::{
    getsockname, getsockopt, recv, sockopt, AddressFamily, MsgFlags, SockaddrLike, SockaddrStorage,
};

use crate::handle::StreamKind;

pub(crate) enum Io {
    Idle,
    TcpListener(TcpListener),
    Tcp(TcpStream),
    PipeListener(UnixListener),
    Pipe(UnixStream),
}

/// A connection waiting on a listening or IPC handle for `accept`.
pub(crate) enum Accepted {
    Io(Io),
    /// A descriptor received over an IPC pipe; its type is only fixed once
    /// the client handle it lands on is known.
    Fd(OwnedFd),
}

impl Io {
    pub fn source(&mut self) -> Option<&mut dyn Source> {
        match self {
            Io::Idle => None,
            Io::TcpListener(l) => Some(l),
            Io::Tcp(s) => Some(s),
            Io::PipeListener(l) => Some(l),
            Io::Pipe(s) => Some(s),
        }
    }

    pub fn raw_fd(&self) -> Option<RawFd> {
        match self {
            Io::Idle => None,
            Io::TcpListener(l) => Some(l.as_raw_fd()),
            Io::Tcp(s) => Some(s.as_raw_fd()),
            Io::PipeListener(l) => Some(l.as_raw_fd()),
            Io::Pipe(s) => Some(s.as_raw_fd()),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Io::Idle)
    }

    pub fn is_listener(&self) -> bool {
        matches!(self, Io::TcpListener(_) | Io::PipeListener(_))
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Io::Tcp(_) | Io::Pipe(_))
    }

    /// Reads without waiting, whatever the descriptor's blocking mode.
    pub fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.raw_fd() {
            Some(fd) if self.is_connected() => Ok(recv(fd, buf, MsgFlags::MSG_DONTWAIT)?),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Io::Tcp(s) => s.write(buf),
            Io::Pipe(s) => s.write(buf),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub fn shutdown_write(&self) -> io::Result<()> {
        match self {
            Io::Tcp(s) => s.shutdown(Shutdown::Write),
            Io::Pipe(s) => s.shutdown(Shutdown::Write),
            _ => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    pub fn accept(&self) -> io::Result<Io> {
        match self {
            Io::TcpListener(l) => {
                let (stream, _) = l.accept()?;
                Ok(Io::Tcp(stream))
            }
            Io::PipeListener(l) => {
                let (stream, _) = l.accept()?;
                Ok(Io::Pipe(stream))
            }
            _ => Err(io::ErrorKind::InvalidInput.into()),
        }
    }

    /// Adopts a received descriptor as a handle of `kind`.
    ///
    /// Fails with `InvalidInput` when the socket family does not match the
    /// requested kind.
    pub fn from_fd(kind: StreamKind, fd: OwnedFd) -> io::Result<Io> {
        let addr: SockaddrStorage = getsockname(fd.as_raw_fd())?;
        let listening = getsockopt(&fd, sockopt::AcceptConn)?;
        ipc::set_nonblocking_fd(fd.as_raw_fd(), true)?;

        match (kind, addr.family()) {
            (StreamKind::Tcp, Some(AddressFamily::Inet | AddressFamily::Inet6)) => Ok(if listening {
                Io::TcpListener(TcpListener::from_std(fd.into()))
            } else {
                Io::Tcp(TcpStream::from_std(fd.into()))
            }),
            (StreamKind::Pipe, Some(AddressFamily::Unix)) => Ok(if listening {
                Io::PipeListener(UnixListener::from_std(fd.into()))
            } else {
                Io::Pipe(UnixStream::from_std(fd.into()))
            }),
            _ => Err(io::ErrorKind::InvalidInput.into()),
        }
    }
}

impl Accepted {
    pub fn into_io(self, kind: StreamKind) -> io::Result<Io> {
        match self {
            Accepted::Io(io) => Ok(io),
            Accepted::Fd(fd) => Io::from_fd(kind, fd),
        }
    }

    /// Kind of the queued connection, when it is already known.
    pub fn kind(&self) -> Option<StreamKind> {
        match self {
            Accepted::Io(Io::Tcp(_) | Io::TcpListener(_)) => Some(StreamKind::Tcp),
            Accepted::Io(Io::Pipe(_) | Io::PipeListener(_)) => Some(StreamKind::Pipe),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_rejects_io() {
        let mut io = Io::Idle;
        assert!(io.source().is_none());
        assert_eq!(
            io.read(&mut [0u8; 4]).unwrap_err().kind(),
            io::ErrorKind::NotConnected
        );
        assert!(io.shutdown_write().is_err());
    }

    #[test]
    fn test_pair_read_write() {
        let (a, b) = UnixStream::pair().unwrap();
        let mut a = Io::Pipe(a);
        let mut b = Io::Pipe(b);
        assert!(a.is_connected());

        assert_eq!(a.write(b"abc").unwrap(), 3);
        let mut buf = [0u8; 8];
        assert_eq!(b.read(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
    }

    #[test]
    fn test_read_does_not_wait_on_blocking_socket() {
        let (a, _b) = UnixStream::pair().unwrap();
        let mut a = Io::Pipe(a);
        ipc::set_nonblocking_fd(a.raw_fd().unwrap(), false).unwrap();

        assert_eq!(
            a.read(&mut [0u8; 4]).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn test_from_fd_checks_family() {
        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        let fd: OwnedFd = a.into();
        assert_eq!(
            Io::from_fd(StreamKind::Tcp, fd).err().map(|e| e.kind()),
            Some(io::ErrorKind::InvalidInput)
        );

        let (a, _b) = std::os::unix::net::UnixStream::pair().unwrap();
        let io = Io::from_fd(StreamKind::Pipe, a.into()).unwrap();
        assert!(io.is_connected());
    }
}
