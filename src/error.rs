//! Error types for pg2scidb.

use std::fmt;
use std::io;

use thiserror::Error;

/// Position of a value inside the dump: row index plus attribute slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub row: u64,
    pub attribute: usize,
    pub name: Option<String>,
}

impl Location {
    pub fn new(row: u64, attribute: usize, name: Option<&str>) -> Self {
        Self {
            row,
            attribute,
            name: name.map(str::to_string),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}, attribute {}", self.row, self.attribute)?;
        if let Some(name) = &self.name {
            write!(f, " ({})", name)?;
        }
        Ok(())
    }
}

/// Why a single field could not be decoded or re-encoded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// Fixed-width column whose length prefix disagrees with the type.
    #[error("expected {expected} bytes for {ty}, got {got}")]
    WidthMismatch {
        ty: &'static str,
        expected: usize,
        got: usize,
    },

    /// Variable-width value longer than the configured bound.
    #[error("field length {len} exceeds limit of {max} bytes")]
    TooLong { len: usize, max: usize },

    /// Length prefix below -1.
    #[error("invalid field length {0}")]
    NegativeLength(i32),

    /// SQL NULL for an attribute declared NOT NULL.
    #[error("NULL value in a NOT NULL attribute")]
    UnexpectedNull,

    /// Value not representable in the target type.
    #[error("value {value} is out of range for {target}")]
    OutOfRange { value: String, target: &'static str },

    /// Corrupt or unsupported encoding.
    #[error("invalid {ty} value: {message}")]
    Invalid { ty: &'static str, message: String },
}

/// Coarse classification, used for exit codes and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Io,
    Format,
    Decode,
    Encode,
    Schema,
    Config,
}

/// The main error type for a conversion run.
#[derive(Debug, Error)]
pub enum ConvertError {
    /// Reading the input stream failed.
    #[error("IO error at byte {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Writing the output stream failed.
    #[error("Write error after {written} bytes: {source}")]
    Write {
        written: u64,
        #[source]
        source: io::Error,
    },

    /// Header mismatch, bad row framing, or truncated input.
    #[error("Format error at byte {offset}: {message}")]
    Format { offset: u64, message: String },

    /// A field could not be interpreted as its attribute's source type.
    #[error("Decode error at {location} (byte {offset}): {source}")]
    Decode {
        location: Location,
        offset: u64,
        #[source]
        source: FieldError,
    },

    /// A decoded value could not be written in the target layout.
    #[error("Encode error at {location} (byte {offset}): {source}")]
    Encode {
        location: Location,
        /// Input offset of the field the value came from.
        offset: u64,
        #[source]
        source: FieldError,
    },

    /// The attribute schema is malformed or unsupported.
    #[error("Schema error: {0}")]
    Schema(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ConvertError {
    pub fn io(offset: u64, source: io::Error) -> Self {
        Self::Io { offset, source }
    }

    pub fn format(offset: u64, message: impl Into<String>) -> Self {
        Self::Format {
            offset,
            message: message.into(),
        }
    }

    /// Input ended while `needed` more bytes were expected.
    pub fn truncated(offset: u64, needed: usize) -> Self {
        Self::format(
            offset,
            format!("unexpected end of input, {} more byte(s) expected", needed),
        )
    }

    /// Decode failure; the driver fills in the location.
    pub fn decode(offset: u64, source: FieldError) -> Self {
        Self::Decode {
            location: Location::default(),
            offset,
            source,
        }
    }

    /// Encode failure; the driver fills in the location and offset.
    pub fn encode(source: FieldError) -> Self {
        Self::Encode {
            location: Location::default(),
            offset: 0,
            source,
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    /// Attach a row/attribute location to decode and encode errors.
    pub fn located(self, location: Location) -> Self {
        match self {
            Self::Decode { offset, source, .. } => Self::Decode {
                location,
                offset,
                source,
            },
            Self::Encode { offset, source, .. } => Self::Encode {
                location,
                offset,
                source,
            },
            other => other,
        }
    }

    /// Attach the input offset of the field an encode error belongs to.
    ///
    /// Other variants record their offset where they are raised.
    pub fn with_offset(self, offset: u64) -> Self {
        match self {
            Self::Encode {
                location, source, ..
            } => Self::Encode {
                location,
                offset,
                source,
            },
            other => other,
        }
    }

    /// Input byte offset the error refers to, when there is one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Self::Io { offset, .. }
            | Self::Format { offset, .. }
            | Self::Decode { offset, .. }
            | Self::Encode { offset, .. } => Some(*offset),
            Self::Write { .. } | Self::Schema(_) | Self::Config(_) => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Write { .. } => ErrorKind::Io,
            Self::Format { .. } => ErrorKind::Format,
            Self::Decode { .. } => ErrorKind::Decode,
            Self::Encode { .. } => ErrorKind::Encode,
            Self::Schema(_) => ErrorKind::Schema,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            Self::Decode { location, .. } | Self::Encode { location, .. } => Some(location),
            _ => None,
        }
    }
}

/// Process exit code for an error kind.
pub fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Io => 3,
        ErrorKind::Format => 4,
        ErrorKind::Decode => 5,
        ErrorKind::Encode => 6,
        ErrorKind::Schema => 2,
        ErrorKind::Config => 2,
    }
}

/// Result type alias for conversion operations.
pub type ConvertResult<T> = Result<T, ConvertError>;
