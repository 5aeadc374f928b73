//! Native status codes and their translation into [`StatusError`] values.
//!
//! The reactor reports every result as a plain `i32`/`isize`, the same way a
//! libuv loop does: zero (or a positive byte count) is success, a negative
//! value is `-errno`, and [`EOF`] is reserved for end of stream. All
//! completion handlers translate through a single [`StatusFormatter`] so the
//! error text is identical no matter which operation produced it.

use std::{fmt, io};

use nix::errno::Errno;

/// End of stream. Not an error for reads, an error everywhere else.
pub const EOF: i32 = -4095;

pub const EACCES: i32 = -(Errno::EACCES as i32);
pub const EADDRINUSE: i32 = -(Errno::EADDRINUSE as i32);
pub const EAGAIN: i32 = -(Errno::EAGAIN as i32);
pub const EALREADY: i32 = -(Errno::EALREADY as i32);
pub const EBADF: i32 = -(Errno::EBADF as i32);
pub const EBUSY: i32 = -(Errno::EBUSY as i32);
pub const ECANCELED: i32 = -(Errno::ECANCELED as i32);
pub const ECONNABORTED: i32 = -(Errno::ECONNABORTED as i32);
pub const ECONNREFUSED: i32 = -(Errno::ECONNREFUSED as i32);
pub const ECONNRESET: i32 = -(Errno::ECONNRESET as i32);
pub const EINTR: i32 = -(Errno::EINTR as i32);
pub const EINVAL: i32 = -(Errno::EINVAL as i32);
pub const EIO: i32 = -(Errno::EIO as i32);
pub const EISCONN: i32 = -(Errno::EISCONN as i32);
pub const EMFILE: i32 = -(Errno::EMFILE as i32);
pub const ENOBUFS: i32 = -(Errno::ENOBUFS as i32);
pub const ENOENT: i32 = -(Errno::ENOENT as i32);
pub const ENOMEM: i32 = -(Errno::ENOMEM as i32);
pub const ENOTCONN: i32 = -(Errno::ENOTCONN as i32);
pub const ENOTSOCK: i32 = -(Errno::ENOTSOCK as i32);
pub const ENOTSUP: i32 = -(Errno::EOPNOTSUPP as i32);
pub const EPIPE: i32 = -(Errno::EPIPE as i32);
pub const ETIMEDOUT: i32 = -(Errno::ETIMEDOUT as i32);

const KNOWN: &[(i32, &str, &str)] = &[
    (EOF, "EOF", "end of file"),
    (EACCES, "EACCES", "permission denied"),
    (EADDRINUSE, "EADDRINUSE", "address already in use"),
    (EAGAIN, "EAGAIN", "resource temporarily unavailable"),
    (EALREADY, "EALREADY", "connection already in progress"),
    (EBADF, "EBADF", "bad file descriptor"),
    (EBUSY, "EBUSY", "resource busy or locked"),
    (ECANCELED, "ECANCELED", "operation canceled"),
    (ECONNABORTED, "ECONNABORTED", "software caused connection abort"),
    (ECONNREFUSED, "ECONNREFUSED", "connection refused"),
    (ECONNRESET, "ECONNRESET", "connection reset by peer"),
    (EINTR, "EINTR", "interrupted system call"),
    (EINVAL, "EINVAL", "invalid argument"),
    (EIO, "EIO", "i/o error"),
    (EISCONN, "EISCONN", "socket is already connected"),
    (EMFILE, "EMFILE", "too many open files"),
    (ENOBUFS, "ENOBUFS", "no buffer space available"),
    (ENOENT, "ENOENT", "no such file or directory"),
    (ENOMEM, "ENOMEM", "not enough memory"),
    (ENOTCONN, "ENOTCONN", "socket is not connected"),
    (ENOTSOCK, "ENOTSOCK", "socket operation on non-socket"),
    (ENOTSUP, "ENOTSUP", "operation not supported on socket"),
    (EPIPE, "EPIPE", "broken pipe"),
    (ETIMEDOUT, "ETIMEDOUT", "connection timed out"),
];

/// A translated native error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusError {
    pub code: i32,
    pub name: &'static str,
    pub message: &'static str,
}

impl StatusError {
    pub fn is_eof(&self) -> bool {
        self.code == EOF
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.message)
    }
}

impl std::error::Error for StatusError {}

/// Turns a negative native status into the runtime's error value.
pub trait StatusFormatter: Send + Sync {
    fn format(&self, code: i32) -> StatusError;
}

/// Formatter using libuv's error names and messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultFormatter;

impl StatusFormatter for DefaultFormatter {
    fn format(&self, code: i32) -> StatusError {
        match KNOWN.iter().find(|(known, _, _)| *known == code) {
            Some(&(code, name, message)) => StatusError {
                code,
                name,
                message,
            },
            None => StatusError {
                code,
                name: "UNKNOWN",
                message: "unknown error",
            },
        }
    }
}

/// Maps an I/O error coming out of mio/std into a native status code.
pub fn from_io_error(err: &io::Error) -> i32 {
    if let Some(errno) = err.raw_os_error() {
        return -errno;
    }
    match err.kind() {
        io::ErrorKind::UnexpectedEof => EOF,
        io::ErrorKind::WouldBlock => EAGAIN,
        io::ErrorKind::NotConnected => ENOTCONN,
        io::ErrorKind::BrokenPipe => EPIPE,
        io::ErrorKind::ConnectionReset => ECONNRESET,
        io::ErrorKind::ConnectionRefused => ECONNREFUSED,
        io::ErrorKind::InvalidInput => EINVAL,
        io::ErrorKind::Unsupported => ENOTSUP,
        io::ErrorKind::Interrupted => EINTR,
        io::ErrorKind::WriteZero => EPIPE,
        _ => EIO,
    }
}
