//! Values passed to continuations and the mapping from I/O results to them.

use crate::status::{StatusError, StatusFormatter, EOF};

/// A value handed to a continuation.
///
/// `Nil` doubles as the "no error" marker that leads every successful
/// result list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Nil,
    Integer(i64),
    Bytes(Vec<u8>),
    Error(StatusError),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_error(&self) -> Option<&StatusError> {
        match self {
            Value::Error(err) => Some(err),
            _ => None,
        }
    }
}

/// Tagged result of a stream operation.
///
/// The tag decides how many values the continuation receives:
///
/// ```text
/// Done(extra)  -> [Nil, extra...]
/// Data(bytes)  -> [Nil, Bytes]
/// Eof          -> []
/// Error(e)     -> [Error(e)]
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done(Vec<Value>),
    Data(Vec<u8>),
    Eof,
    Error(StatusError),
}

impl Outcome {
    /// Outcome of a one-shot completion. Any negative status, `EOF`
    /// included, is an error here.
    pub fn from_status(status: i32, extra: Vec<Value>, formatter: &dyn StatusFormatter) -> Self {
        if status < 0 {
            Outcome::Error(formatter.format(status))
        } else {
            Outcome::Done(extra)
        }
    }

    /// Outcome of a read notification. Returns `None` for a zero-byte read,
    /// which carries no information and is never delivered.
    pub fn from_read(nread: isize, data: &[u8], formatter: &dyn StatusFormatter) -> Option<Self> {
        if nread > 0 {
            let len = (nread as usize).min(data.len());
            return Some(Outcome::Data(data[..len].to_vec()));
        }
        if nread == 0 {
            return None;
        }
        if nread == EOF as isize {
            return Some(Outcome::Eof);
        }
        let code = i32::try_from(nread).unwrap_or(i32::MIN);
        Some(Outcome::Error(formatter.format(code)))
    }

    pub fn into_args(self) -> Vec<Value> {
        match self {
            Outcome::Done(extra) => {
                let mut args = Vec::with_capacity(extra.len() + 1);
                args.push(Value::Nil);
                args.extend(extra);
                args
            }
            Outcome::Data(bytes) => vec![Value::Nil, Value::Bytes(bytes)],
            Outcome::Eof => Vec::new(),
            Outcome::Error(err) => vec![Value::Error(err)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::{DefaultFormatter, ECONNRESET, EPIPE};

    #[test]
    fn test_completion_args() {
        let ok = Outcome::from_status(0, vec![Value::Integer(7)], &DefaultFormatter);
        assert_eq!(ok.into_args(), vec![Value::Nil, Value::Integer(7)]);

        let err = Outcome::from_status(EPIPE, vec![Value::Integer(7)], &DefaultFormatter);
        let args = err.into_args();
        assert_eq!(args.len(), 1);
        assert_eq!(args[0].as_error().map(|e| e.name), Some("EPIPE"));
    }

    #[test]
    fn test_completion_treats_eof_as_error() {
        let args = Outcome::from_status(EOF, Vec::new(), &DefaultFormatter).into_args();
        assert_eq!(args.len(), 1);
        assert!(args[0].as_error().is_some_and(|e| e.is_eof()));
    }

    #[test]
    fn test_read_outcomes() {
        let buf = b"hello world";
        assert_eq!(
            Outcome::from_read(5, buf, &DefaultFormatter),
            Some(Outcome::Data(b"hello".to_vec()))
        );
        assert_eq!(Outcome::from_read(0, buf, &DefaultFormatter), None);
        assert_eq!(
            Outcome::from_read(EOF as isize, buf, &DefaultFormatter),
            Some(Outcome::Eof)
        );
        assert!(matches!(
            Outcome::from_read(ECONNRESET as isize, buf, &DefaultFormatter),
            Some(Outcome::Error(e)) if e.code == ECONNRESET
        ));
        assert!(Outcome::Eof.into_args().is_empty());
    }
}
