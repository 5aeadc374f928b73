//! Errors raised by the stream operations before or instead of a native call.

use std::{fmt, io, result::Result as StdResult};

use crate::{continuation::CallbackRef, request::RequestId, status::StatusError};

pub type Result<T> = StdResult<T, StreamError>;

#[derive(Debug)]
pub enum StreamError {
    /// A caller-supplied argument was rejected before anything was issued.
    Argument {
        index: usize,
        op: &'static str,
        expected: &'static str,
    },
    /// The native layer refused the call when it was issued.
    Status {
        op: &'static str,
        error: StatusError,
    },
    UnknownCallback(CallbackRef),
    CallbackBusy(CallbackRef),
    AlreadyFulfilled(RequestId),
    Io(io::Error),
}

impl StreamError {
    pub fn argument(index: usize, op: &'static str, expected: &'static str) -> Self {
        StreamError::Argument {
            index,
            op,
            expected,
        }
    }

    /// The translated native error, if this is a native rejection.
    pub fn status(&self) -> Option<&StatusError> {
        match self {
            StreamError::Status { error, .. } => Some(error),
            _ => None,
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, StreamError::Argument { .. })
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Argument {
                index,
                op,
                expected,
            } => write!(f, "bad argument #{} to '{}' ({})", index, op, expected),
            StreamError::Status { op, error } => write!(f, "{} failed: {}", op, error),
            StreamError::UnknownCallback(r) => write!(f, "Unknown callback reference {:?}", r),
            StreamError::CallbackBusy(r) => write!(f, "Callback {:?} is already running", r),
            StreamError::AlreadyFulfilled(id) => write!(f, "Request {:?} already fulfilled", id),
            StreamError::Io(e) => write!(f, "IO Error: {}", e),
        }
    }
}

impl std::error::Error for StreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StreamError::Status { error, .. } => Some(error),
            StreamError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StreamError {
    fn from(err: io::Error) -> Self {
        StreamError::Io(err)
    }
}
