//! PostgreSQL binary COPY decoding.
//!
//! Layout of a `COPY ... TO ... WITH BINARY` payload:
//!
//! ```text
//! "PGCOPY\n\xFF\r\n\0"  flags:i32  ext_len:i32  ext[ext_len]
//! row*  := count:i16 [oid field] field{count}
//! field := len:i32 bytes[len]      (len = -1 is NULL)
//! trailer := -1:i16
//! ```
//!
//! All integers are big-endian. Decoding is strictly forward; nothing here
//! seeks or backtracks.

pub mod numeric;
pub mod temporal;

use std::fmt;
use std::str::FromStr;

use tracing::{debug, warn};

use crate::buffer::ByteSource;
use crate::error::{ConvertError, ConvertResult, FieldError};

/// The 11-byte file signature.
pub const SIGNATURE: &[u8; 11] = b"PGCOPY\n\xFF\r\n\0";

/// Flag bit 16: rows carry an OID field not included in the field count.
pub const FLAG_HAS_OIDS: u32 = 1 << 16;

/// Bits 17..31 are critical; a reader must abort when it sees one it does not know.
pub const CRITICAL_FLAGS: u32 = 0xFFFE_0000;

/// Largest value Postgres can store in one field (1 GiB).
pub const MAX_FIELD_LEN: usize = 1 << 30;

/// First allocation step for a variable-width field.
const FIELD_CHUNK: usize = 64 * 1024;

/// The decoded file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyHeader {
    pub flags: u32,
    pub extension_len: u32,
}

impl CopyHeader {
    pub fn has_oids(&self) -> bool {
        self.flags & FLAG_HAS_OIDS != 0
    }
}

/// Result of reading the per-row count word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldCount {
    /// A row with this many fields follows.
    Fields(u16),
    /// The -1 trailer.
    Trailer,
    /// The stream ended cleanly at a row boundary without a trailer.
    EndOfStream,
}

/// Consume and validate the header.
pub fn read_header<S: ByteSource>(src: &mut S) -> ConvertResult<CopyHeader> {
    let signature: [u8; 11] = src.read_array().map_err(|e| match e {
        ConvertError::Format { .. } => {
            ConvertError::format(0, "input too short for a COPY BINARY signature")
        }
        other => other,
    })?;
    if &signature != SIGNATURE {
        return Err(ConvertError::format(
            0,
            format!("bad COPY BINARY signature: {:?}", signature),
        ));
    }

    let flags_offset = src.offset();
    let flags = u32::from_be_bytes(src.read_array()?);
    if flags & CRITICAL_FLAGS != 0 {
        return Err(ConvertError::format(
            flags_offset,
            format!("unsupported critical header flags {:#010x}", flags & CRITICAL_FLAGS),
        ));
    }

    let ext_offset = src.offset();
    let extension_len = i32::from_be_bytes(src.read_array()?);
    let extension_len = u32::try_from(extension_len).map_err(|_| {
        ConvertError::format(
            ext_offset,
            format!("negative header extension length {}", extension_len),
        )
    })?;
    src.skip(extension_len as usize)?;

    debug!(flags, extension_len, "read COPY BINARY header");
    Ok(CopyHeader {
        flags,
        extension_len,
    })
}

/// Read the 16-bit field count that opens every row.
pub fn read_field_count<S: ByteSource>(src: &mut S) -> ConvertResult<FieldCount> {
    if src.at_eof()? {
        warn!(offset = src.offset(), "input ended without a COPY trailer");
        return Ok(FieldCount::EndOfStream);
    }
    let offset = src.offset();
    match i16::from_be_bytes(src.read_array()?) {
        // Nothing past the trailer is read; the stream may stay open.
        -1 => Ok(FieldCount::Trailer),
        n if n < 0 => Err(ConvertError::format(
            offset,
            format!("invalid field count {}", n),
        )),
        n => Ok(FieldCount::Fields(n as u16)),
    }
}

/// Read a field's length prefix. `None` is SQL NULL.
pub fn read_field_length<S: ByteSource>(
    src: &mut S,
    max_len: usize,
) -> ConvertResult<Option<usize>> {
    let offset = src.offset();
    let len = i32::from_be_bytes(src.read_array()?);
    if len == -1 {
        return Ok(None);
    }
    let len = usize::try_from(len)
        .map_err(|_| ConvertError::decode(offset, FieldError::NegativeLength(len)))?;
    if len > max_len {
        return Err(ConvertError::decode(
            offset,
            FieldError::TooLong { len, max: max_len },
        ));
    }
    Ok(Some(len))
}

/// Read one length-prefixed field into `buf`, returning its bytes or `None` for NULL.
///
/// Exactly the declared number of bytes is consumed.
pub fn read_field_binary<'b, S: ByteSource>(
    src: &mut S,
    buf: &'b mut Vec<u8>,
    max_len: usize,
) -> ConvertResult<Option<&'b [u8]>> {
    let Some(len) = read_field_length(src, max_len)? else {
        return Ok(None);
    };
    // Grow with the bytes that actually arrive, so a bogus length on a
    // truncated stream does not allocate the whole declared size up front.
    buf.clear();
    while buf.len() < len {
        let filled = buf.len();
        let step = (len - filled).min(FIELD_CHUNK.max(filled));
        buf.resize(filled + step, 0);
        src.read_exact(&mut buf[filled..])?;
    }
    Ok(Some(buf.as_slice()))
}

/// Skip one field, returning its length (`None` for NULL).
pub fn skip_field<S: ByteSource>(src: &mut S, max_len: usize) -> ConvertResult<Option<usize>> {
    let len = read_field_length(src, max_len)?;
    if let Some(len) = len {
        src.skip(len)?;
    }
    Ok(len)
}

/// Source column types understood by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PgType {
    Bool,
    /// The single-byte internal `"char"` type.
    Char,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Numeric,
    /// text, varchar, bpchar, name, json
    Text,
    Bytea,
    Uuid,
    Date,
    Timestamp,
    Timestamptz,
}

impl PgType {
    pub fn name(&self) -> &'static str {
        match self {
            PgType::Bool => "bool",
            PgType::Char => "\"char\"",
            PgType::Int2 => "int2",
            PgType::Int4 => "int4",
            PgType::Int8 => "int8",
            PgType::Float4 => "float4",
            PgType::Float8 => "float8",
            PgType::Numeric => "numeric",
            PgType::Text => "text",
            PgType::Bytea => "bytea",
            PgType::Uuid => "uuid",
            PgType::Date => "date",
            PgType::Timestamp => "timestamp",
            PgType::Timestamptz => "timestamptz",
        }
    }

    /// Binary width for fixed-width types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            PgType::Bool | PgType::Char => Some(1),
            PgType::Int2 => Some(2),
            PgType::Int4 | PgType::Float4 | PgType::Date => Some(4),
            PgType::Int8 | PgType::Float8 | PgType::Timestamp | PgType::Timestamptz => Some(8),
            PgType::Uuid => Some(16),
            PgType::Numeric | PgType::Text | PgType::Bytea => None,
        }
    }
}

impl fmt::Display for PgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PgType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ty = match s.trim().to_ascii_lowercase().as_str() {
            "bool" | "boolean" => PgType::Bool,
            "\"char\"" | "char1" => PgType::Char,
            "int2" | "smallint" => PgType::Int2,
            "int4" | "int" | "integer" => PgType::Int4,
            "int8" | "bigint" => PgType::Int8,
            "float4" | "real" => PgType::Float4,
            "float8" | "double" | "double precision" => PgType::Float8,
            "numeric" | "decimal" => PgType::Numeric,
            "text" | "varchar" | "character varying" | "char" | "character" | "bpchar"
            | "name" | "json" => PgType::Text,
            "bytea" => PgType::Bytea,
            "uuid" => PgType::Uuid,
            "date" => PgType::Date,
            "timestamp" | "timestamp without time zone" => PgType::Timestamp,
            "timestamptz" | "timestamp with time zone" => PgType::Timestamptz,
            other => return Err(format!("unknown PostgreSQL type '{}'", other)),
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{BufferedReader, RawReader};
    use crate::error::ErrorKind;
    use std::io::{self, Cursor, Read};

    /// Yields its bytes, then fails the way a still-open pipe would block.
    struct OpenStream(Cursor<Vec<u8>>);

    impl Read for OpenStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.0.read(buf)? {
                0 => Err(io::Error::new(io::ErrorKind::WouldBlock, "stream still open")),
                n => Ok(n),
            }
        }
    }

    fn header(flags: u32, ext: &[u8]) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&(ext.len() as i32).to_be_bytes());
        out.extend_from_slice(ext);
        out
    }

    fn reader(bytes: Vec<u8>) -> BufferedReader<Cursor<Vec<u8>>> {
        BufferedReader::with_capacity(16, Cursor::new(bytes))
    }

    #[test]
    fn test_read_header_plain() {
        let mut src = reader(header(0, &[]));
        let h = read_header(&mut src).unwrap();
        assert_eq!(h, CopyHeader { flags: 0, extension_len: 0 });
        assert!(!h.has_oids());
        assert_eq!(src.offset(), 19);
    }

    #[test]
    fn test_read_header_skips_extension() {
        let mut bytes = header(FLAG_HAS_OIDS | 0x0001, &[0xAA; 40]);
        bytes.extend_from_slice(&(-1i16).to_be_bytes());
        let mut src = reader(bytes);
        let h = read_header(&mut src).unwrap();
        assert!(h.has_oids());
        assert_eq!(h.extension_len, 40);
        assert_eq!(read_field_count(&mut src).unwrap(), FieldCount::Trailer);
    }

    #[test]
    fn test_read_header_rejects_bad_signature() {
        let mut bytes = header(0, &[]);
        bytes[0] = b'X';
        let err = read_header(&mut reader(bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_read_header_rejects_short_input() {
        let err = read_header(&mut reader(b"PGCO".to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_read_header_rejects_critical_flags() {
        let err = read_header(&mut reader(header(1 << 17, &[]))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("critical"));
    }

    #[test]
    fn test_read_header_rejects_negative_extension() {
        let mut bytes = SIGNATURE.to_vec();
        bytes.extend_from_slice(&0u32.to_be_bytes());
        bytes.extend_from_slice(&(-4i32).to_be_bytes());
        let err = read_header(&mut reader(bytes)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_field_count_variants() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3i16.to_be_bytes());
        bytes.extend_from_slice(&(-1i16).to_be_bytes());
        let mut src = reader(bytes);
        assert_eq!(read_field_count(&mut src).unwrap(), FieldCount::Fields(3));
        assert_eq!(read_field_count(&mut src).unwrap(), FieldCount::Trailer);
        assert_eq!(read_field_count(&mut src).unwrap(), FieldCount::EndOfStream);
    }

    #[test]
    fn test_field_count_partial_word_is_truncation() {
        let err = read_field_count(&mut reader(vec![0x00])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_field_count_rejects_other_negatives() {
        let err = read_field_count(&mut reader((-2i16).to_be_bytes().to_vec())).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_read_field_binary_value_and_null() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4i32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 42]);
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        let mut src = reader(bytes);
        let mut buf = Vec::new();
        assert_eq!(
            read_field_binary(&mut src, &mut buf, MAX_FIELD_LEN).unwrap(),
            Some(&[0u8, 0, 0, 42][..])
        );
        assert_eq!(read_field_binary(&mut src, &mut buf, MAX_FIELD_LEN).unwrap(), None);
        assert_eq!(src.offset(), 12);
    }

    #[test]
    fn test_read_field_binary_limits() {
        let mut src = reader((-7i32).to_be_bytes().to_vec());
        let err = read_field_length(&mut src, MAX_FIELD_LEN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Decode);

        let mut src = reader(100i32.to_be_bytes().to_vec());
        let err = read_field_length(&mut src, 99).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::Decode {
                source: FieldError::TooLong { len: 100, max: 99 },
                ..
            }
        ));
    }

    #[test]
    fn test_read_field_binary_truncated_body() {
        let mut bytes = 10i32.to_be_bytes().to_vec();
        bytes.extend_from_slice(b"abc");
        let mut buf = Vec::new();
        let err = read_field_binary(&mut reader(bytes), &mut buf, MAX_FIELD_LEN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_trailer_stops_reading() {
        let trailer = (-1i16).to_be_bytes().to_vec();

        let mut src = BufferedReader::new(OpenStream(Cursor::new(trailer.clone())));
        assert_eq!(read_field_count(&mut src).unwrap(), FieldCount::Trailer);
        assert_eq!(src.offset(), 2);

        let mut src = RawReader::new(OpenStream(Cursor::new(trailer)));
        assert_eq!(read_field_count(&mut src).unwrap(), FieldCount::Trailer);
        assert_eq!(src.offset(), 2);
    }

    #[test]
    fn test_oversized_declared_length_on_short_input() {
        let mut bytes = (MAX_FIELD_LEN as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&[0xAB; 21]);
        let mut buf = Vec::new();
        let err = read_field_binary(&mut reader(bytes), &mut buf, MAX_FIELD_LEN).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(buf.capacity() <= 1 << 20, "allocated {} bytes", buf.capacity());
    }

    #[test]
    fn test_read_field_binary_spans_chunks() {
        let body: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        let mut bytes = (body.len() as i32).to_be_bytes().to_vec();
        bytes.extend_from_slice(&body);
        let mut buf = Vec::new();
        let field = read_field_binary(&mut reader(bytes), &mut buf, MAX_FIELD_LEN).unwrap();
        assert_eq!(field, Some(body.as_slice()));
    }

    #[test]
    fn test_pg_type_aliases() {
        assert_eq!("INTEGER".parse::<PgType>().unwrap(), PgType::Int4);
        assert_eq!("double precision".parse::<PgType>().unwrap(), PgType::Float8);
        assert_eq!("\"char\"".parse::<PgType>().unwrap(), PgType::Char);
        assert_eq!("varchar".parse::<PgType>().unwrap(), PgType::Text);
        assert!("money".parse::<PgType>().is_err());
        assert_eq!(PgType::Uuid.fixed_width(), Some(16));
        assert_eq!(PgType::Numeric.fixed_width(), None);
    }
}
