use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::protobuf::varint::VarintError;

/// Errors reading or writing Protocol Buffers messages.
#[derive(Debug)]
pub struct ProtobufError {
    kind: ErrorKind,
    message: Option<&'static str>,
    field: Option<u64>,
}

impl ProtobufError {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            field: None,
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Return the name of the message type that was being read.
    pub fn message(&self) -> Option<&str> {
        self.message
    }

    /// Return the number of the field that was being read.
    pub fn field(&self) -> Option<u64> {
        self.field
    }

    /// Associate a message type and/or field number with this error.
    ///
    /// Context that is already set is kept, so that errors report the
    /// innermost message in which they occurred.
    pub fn with_context(mut self, message: Option<&'static str>, field: Option<u64>) -> Self {
        if self.message.is_none() {
            self.message = message;
            self.field = field;
        }
        self
    }
}

impl Display for ProtobufError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match (self.message, self.field) {
            (Some(message), Some(field)) => {
                write!(f, "in message {} field {}: {}", message, field, self.kind)
            }
            (Some(message), None) => write!(f, "in message {}: {}", message, self.kind),
            (None, _) => write!(f, "{}", self.kind),
        }
    }
}

impl Error for ProtobufError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.kind {
            ErrorKind::IoError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProtobufError {
    fn from(val: std::io::Error) -> Self {
        Self::new(ErrorKind::IoError(val))
    }
}

impl From<VarintError> for ProtobufError {
    fn from(val: VarintError) -> Self {
        match val {
            VarintError::Eof => Self::new(ErrorKind::Eof),
            VarintError::InvalidVarint => Self::new(ErrorKind::InvalidVarint),
            VarintError::IoError(err) => Self::new(ErrorKind::IoError(err)),
        }
    }
}

/// Enum describing the kind of a [`ProtobufError`] error.
#[derive(Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An IO error occured while reading or writing the message.
    IoError(std::io::Error),

    /// A varint contained more than 64 bits of value data, or was truncated.
    InvalidVarint,

    /// The end of the input was reached in the middle of a value.
    Eof,

    /// A field was read with a type that doesn't match its wire type.
    FieldTypeMismatch,

    /// A field has one of the two wire type values that Protocol Buffers
    /// leaves unassigned.
    InvalidWireType,

    /// Deprecated group fields were encountered. These cannot be preserved
    /// when a message is re-encoded.
    UnsupportedGroup,

    /// Attempted to read a field value which has already been read.
    FieldAlreadyConsumed,

    /// A string field contained invalid UTF-8.
    InvalidUtf8,

    /// A variable length field was neither read nor skipped.
    FieldNotConsumed,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::IoError(err) => write!(f, "io error: {err}"),
            ErrorKind::InvalidVarint => write!(f, "invalid varint"),
            ErrorKind::Eof => write!(f, "unexpected end of input"),
            ErrorKind::FieldTypeMismatch => write!(f, "field type mismatch"),
            ErrorKind::InvalidWireType => write!(f, "invalid wire type"),
            ErrorKind::UnsupportedGroup => write!(f, "group fields are not supported"),
            ErrorKind::FieldAlreadyConsumed => write!(f, "field already consumed"),
            ErrorKind::InvalidUtf8 => write!(f, "invalid UTF-8 in string"),
            ErrorKind::FieldNotConsumed => {
                write!(f, "variable-length field not consumed or skipped")
            }
        }
    }
}
