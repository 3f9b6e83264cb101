use std::error::Error as StdError;
use std::fmt;

/// Error type for the upstream log, DLQ and delayed-delivery stores.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Source(SourceErrorKind),
    Dlq(StoreErrorKind),
    Delayed(StoreErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceErrorKind {
    /// The consumer group has not been created on the stream.
    NoGroup,
    /// The log could not be reached.
    Unavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    Unavailable,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.error_kind {
            ErrorKind::Source(kind) => write!(f, "Event source error: {:?}", kind)?,
            ErrorKind::Dlq(kind) => write!(f, "DLQ store error: {:?}", kind)?,
            ErrorKind::Delayed(kind) => write!(f, "Delayed store error: {:?}", kind)?,
        }
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn source_error(kind: SourceErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Source(kind),
    }
}

pub fn dlq_error(kind: StoreErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Dlq(kind),
    }
}

pub fn delayed_error(kind: StoreErrorKind, message: &str) -> Error {
    Error {
        source: Some(message.to_string().into()),
        error_kind: ErrorKind::Delayed(kind),
    }
}
