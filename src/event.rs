use mio::{event::Event, Token};
use std::fmt;

/// Readiness reported for one handle, detached from the mio event buffer so
/// it can outlive the next poll.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    token: Token,
    readable: bool,
    writable: bool,
    read_closed: bool,
    write_closed: bool,
    error: bool,
}

impl fmt::Debug for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Readiness")
            .field("token", &self.token)
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("read_closed", &self.read_closed)
            .field("write_closed", &self.write_closed)
            .field("error", &self.error)
            .finish()
    }
}

impl Readiness {
    pub fn token(&self) -> Token {
        self.token
    }

    /// Readable, or a condition that a read will surface (hangup, error).
    pub fn wants_read(&self) -> bool {
        self.readable || self.read_closed || self.error
    }

    /// Writable, or a condition that a write will surface.
    pub fn wants_write(&self) -> bool {
        self.writable || self.write_closed || self.error
    }

    pub fn is_error(&self) -> bool {
        self.error
    }
}

impl From<&Event> for Readiness {
    fn from(event: &Event) -> Self {
        Self {
            token: event.token(),
            readable: event.is_readable(),
            writable: event.is_writable(),
            read_closed: event.is_read_closed(),
            write_closed: event.is_write_closed(),
            error: event.is_error(),
        }
    }
}

#[cfg(test)]
impl Readiness {
    pub(crate) fn new(token: Token, readable: bool, writable: bool) -> Self {
        Self {
            token,
            readable,
            writable,
            read_closed: false,
            write_closed: false,
            error: false,
        }
    }
}
