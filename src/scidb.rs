//! SciDB binary load format.
//!
//! Values are written back to back with no row delimiter. Numbers are
//! little-endian. A nullable attribute carries one indicator byte before its
//! value: `0xFF` when present, otherwise the missing-reason code. The value
//! slot follows either way.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::error::{ConvertError, ConvertResult};
use crate::postgres::PgType;

/// Indicator byte for a present value.
pub const PRESENT: u8 = 0xFF;

/// Indicator byte for a missing value (reason code 0).
pub const MISSING: u8 = 0x00;

/// Target attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScidbType {
    Bool,
    Char,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float,
    Double,
    String,
    Binary,
    Datetime,
    Datetimetz,
}

impl ScidbType {
    pub fn name(&self) -> &'static str {
        match self {
            ScidbType::Bool => "bool",
            ScidbType::Char => "char",
            ScidbType::Int8 => "int8",
            ScidbType::Int16 => "int16",
            ScidbType::Int32 => "int32",
            ScidbType::Int64 => "int64",
            ScidbType::Uint8 => "uint8",
            ScidbType::Uint16 => "uint16",
            ScidbType::Uint32 => "uint32",
            ScidbType::Uint64 => "uint64",
            ScidbType::Float => "float",
            ScidbType::Double => "double",
            ScidbType::String => "string",
            ScidbType::Binary => "binary",
            ScidbType::Datetime => "datetime",
            ScidbType::Datetimetz => "datetimetz",
        }
    }

    /// Bytes in the value slot, or `None` for length-prefixed types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            ScidbType::Bool | ScidbType::Char | ScidbType::Int8 | ScidbType::Uint8 => Some(1),
            ScidbType::Int16 | ScidbType::Uint16 => Some(2),
            ScidbType::Int32 | ScidbType::Uint32 | ScidbType::Float => Some(4),
            ScidbType::Int64 | ScidbType::Uint64 | ScidbType::Double | ScidbType::Datetime => {
                Some(8)
            }
            ScidbType::Datetimetz => Some(16),
            ScidbType::String | ScidbType::Binary => None,
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            ScidbType::Int8
                | ScidbType::Int16
                | ScidbType::Int32
                | ScidbType::Int64
                | ScidbType::Uint8
                | ScidbType::Uint16
                | ScidbType::Uint32
                | ScidbType::Uint64
        )
    }

    /// Source type assumed when a schema names only the target type.
    pub fn default_source(&self) -> PgType {
        match self {
            ScidbType::Bool => PgType::Bool,
            ScidbType::Char => PgType::Char,
            ScidbType::Int8 | ScidbType::Int16 | ScidbType::Uint8 => PgType::Int2,
            ScidbType::Int32 | ScidbType::Uint16 => PgType::Int4,
            ScidbType::Int64 | ScidbType::Uint32 | ScidbType::Uint64 => PgType::Int8,
            ScidbType::Float => PgType::Float4,
            ScidbType::Double => PgType::Float8,
            ScidbType::String => PgType::Text,
            ScidbType::Binary => PgType::Bytea,
            ScidbType::Datetime => PgType::Timestamp,
            ScidbType::Datetimetz => PgType::Timestamptz,
        }
    }

    /// Whether a column of `source` can be loaded into this type.
    pub fn accepts(&self, source: PgType) -> bool {
        use PgType as P;
        match source {
            P::Bool => *self == ScidbType::Bool,
            P::Char => matches!(self, ScidbType::Char | ScidbType::Int8),
            P::Int2 | P::Int4 | P::Int8 => {
                self.is_integer() || matches!(self, ScidbType::Float | ScidbType::Double)
            }
            P::Float4 | P::Float8 | P::Numeric => {
                matches!(self, ScidbType::Float | ScidbType::Double)
            }
            P::Text => *self == ScidbType::String,
            P::Bytea => *self == ScidbType::Binary,
            P::Uuid => matches!(self, ScidbType::String | ScidbType::Binary),
            P::Date | P::Timestamp => *self == ScidbType::Datetime,
            P::Timestamptz => matches!(self, ScidbType::Datetime | ScidbType::Datetimetz),
        }
    }
}

impl fmt::Display for ScidbType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ScidbType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "bool" => ScidbType::Bool,
            "char" => ScidbType::Char,
            "int8" => ScidbType::Int8,
            "int16" => ScidbType::Int16,
            "int32" => ScidbType::Int32,
            "int64" => ScidbType::Int64,
            "uint8" => ScidbType::Uint8,
            "uint16" => ScidbType::Uint16,
            "uint32" => ScidbType::Uint32,
            "uint64" => ScidbType::Uint64,
            "float" => ScidbType::Float,
            "double" => ScidbType::Double,
            "string" => ScidbType::String,
            "binary" => ScidbType::Binary,
            "datetime" => ScidbType::Datetime,
            "datetimetz" => ScidbType::Datetimetz,
            other => return Err(format!("unknown SciDB type '{}'", other)),
        };
        Ok(ty)
    }
}

/// Byte-counting writer for the target stream.
pub struct TargetWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> TargetWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    pub fn write_all(&mut self, bytes: &[u8]) -> ConvertResult<()> {
        self.inner
            .write_all(bytes)
            .map_err(|source| ConvertError::Write {
                written: self.written,
                source,
            })?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    pub fn write_indicator(&mut self, present: bool) -> ConvertResult<()> {
        self.write_all(&[if present { PRESENT } else { MISSING }])
    }

    pub fn write_zeroes(&mut self, n: usize) -> ConvertResult<()> {
        const ZEROES: [u8; 16] = [0u8; 16];
        let mut remaining = n;
        while remaining > 0 {
            let take = remaining.min(ZEROES.len());
            self.write_all(&ZEROES[..take])?;
            remaining -= take;
        }
        Ok(())
    }

    /// `len:u32` (counting the terminator), bytes, `\0`.
    ///
    /// Callers check that `bytes.len() + 1` fits in a `u32`.
    pub fn write_string(&mut self, bytes: &[u8]) -> ConvertResult<()> {
        let len = (bytes.len() + 1) as u32;
        self.write_all(&len.to_le_bytes())?;
        self.write_all(bytes)?;
        self.write_all(&[0])
    }

    /// `len:u32`, bytes.
    pub fn write_binary(&mut self, bytes: &[u8]) -> ConvertResult<()> {
        self.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.write_all(bytes)
    }

    pub fn flush(&mut self) -> ConvertResult<()> {
        self.inner.flush().map_err(|source| ConvertError::Write {
            written: self.written,
            source,
        })
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::io;

    #[test]
    fn test_string_layout_counts_terminator() {
        let mut w = TargetWriter::new(Vec::new());
        w.write_string(b"abc").unwrap();
        assert_eq!(w.bytes_written(), 8);
        assert_eq!(w.into_inner(), vec![4, 0, 0, 0, b'a', b'b', b'c', 0]);
    }

    #[test]
    fn test_binary_and_indicator_layout() {
        let mut w = TargetWriter::new(Vec::new());
        w.write_indicator(true).unwrap();
        w.write_binary(&[0xDE, 0xAD]).unwrap();
        w.write_indicator(false).unwrap();
        w.write_zeroes(3).unwrap();
        assert_eq!(
            w.into_inner(),
            vec![0xFF, 2, 0, 0, 0, 0xDE, 0xAD, 0x00, 0, 0, 0]
        );
    }

    #[test]
    fn test_write_failure_reports_progress() {
        struct Full;
        impl Write for Full {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::Other, "no space"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut w = TargetWriter::new(Full);
        let err = w.write_zeroes(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(matches!(err, ConvertError::Write { written: 0, .. }));
    }

    #[test]
    fn test_type_names_round_trip() {
        for name in [
            "bool", "char", "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32",
            "uint64", "float", "double", "string", "binary", "datetime", "datetimetz",
        ] {
            let ty: ScidbType = name.parse().unwrap();
            assert_eq!(ty.name(), name);
        }
        assert!("int128".parse::<ScidbType>().is_err());
    }

    #[test]
    fn test_default_sources_are_accepted() {
        for ty in [
            ScidbType::Bool,
            ScidbType::Char,
            ScidbType::Int8,
            ScidbType::Int16,
            ScidbType::Int32,
            ScidbType::Int64,
            ScidbType::Uint8,
            ScidbType::Uint16,
            ScidbType::Uint32,
            ScidbType::Uint64,
            ScidbType::Float,
            ScidbType::Double,
            ScidbType::String,
            ScidbType::Binary,
            ScidbType::Datetime,
            ScidbType::Datetimetz,
        ] {
            assert!(ty.accepts(ty.default_source()), "{} rejects its default", ty);
        }
    }

    #[test]
    fn test_pairing_rules() {
        assert!(ScidbType::Int32.accepts(PgType::Int8));
        assert!(ScidbType::Double.accepts(PgType::Numeric));
        assert!(ScidbType::String.accepts(PgType::Uuid));
        assert!(!ScidbType::String.accepts(PgType::Int4));
        assert!(!ScidbType::Datetimetz.accepts(PgType::Timestamp));
        assert!(!ScidbType::Int64.accepts(PgType::Float8));
    }
}
