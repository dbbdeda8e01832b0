//! Per-column decode/encode units.
//!
//! An [`AttributeSpec`] pairs a PostgreSQL source type with a SciDB target
//! type. An [`Attribute`] is the per-run instance: it holds the value of the
//! field most recently decoded and nothing else, so each row overwrites it.

use std::borrow::Cow;
use std::fmt;
use std::io::Write;

use crate::buffer::ByteSource;
use crate::error::{ConvertError, ConvertResult, FieldError};
use crate::postgres::numeric::{self, Numeric};
use crate::postgres::{self, PgType, temporal};
use crate::scidb::{ScidbType, TargetWriter};

/// Column descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeSpec {
    pub name: Option<String>,
    pub source: PgType,
    pub target: ScidbType,
    pub nullable: bool,
}

impl AttributeSpec {
    /// Nullable attribute reading the target's default source type.
    pub fn new(target: ScidbType) -> Self {
        Self {
            name: None,
            source: target.default_source(),
            target,
            nullable: true,
        }
    }

    pub fn named(name: impl Into<String>, target: ScidbType) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::new(target)
        }
    }

    pub fn source(mut self, source: PgType) -> Self {
        self.source = source;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// Reject source/target pairings the encoder cannot handle.
    pub fn check(&self) -> Result<(), String> {
        if self.target.accepts(self.source) {
            Ok(())
        } else {
            Err(format!(
                "cannot load PostgreSQL {} into SciDB {}",
                self.source, self.target
            ))
        }
    }

    /// Entry for a SciDB load-format template, e.g. `int32 null`.
    pub fn format_entry(&self) -> String {
        if self.nullable {
            format!("{} null", self.target)
        } else {
            self.target.to_string()
        }
    }
}

impl fmt::Display for AttributeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "{}:", name)?;
        }
        write!(f, "{}", self.target)?;
        if !self.nullable {
            write!(f, " NOT NULL")?;
        }
        if self.source != self.target.default_source() {
            write!(f, " FROM {}", self.source)?;
        }
        Ok(())
    }
}

/// Borrowed view of an attribute's current value, in source terms.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value<'a> {
    Null,
    Bool(bool),
    Char(u8),
    Int(i64),
    Float4(f32),
    Float8(f64),
    Numeric(f64),
    Text(&'a [u8]),
    Bytea(&'a [u8]),
    Uuid(&'a [u8]),
    /// Days since 2000-01-01.
    Date(i32),
    /// Microseconds since 2000-01-01.
    Timestamp(i64),
    TimestampTz(i64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Datum {
    Null,
    Bool(bool),
    Char(u8),
    Int(i64),
    Float4(f32),
    Float8(f64),
    Numeric(f64),
    /// Payload lives in `Attribute::field`.
    Bytes,
    Date(i32),
    Timestamp(i64),
    TimestampTz(i64),
}

enum Encoded<'a> {
    Fixed { bytes: [u8; 16], len: usize },
    String(Cow<'a, [u8]>),
    Binary(&'a [u8]),
}

impl Encoded<'_> {
    fn fixed(src: &[u8]) -> Self {
        let mut bytes = [0u8; 16];
        bytes[..src.len()].copy_from_slice(src);
        Encoded::Fixed {
            bytes,
            len: src.len(),
        }
    }
}

/// Descriptor plus the transient value of the current row.
#[derive(Debug, Clone)]
pub struct Attribute {
    spec: AttributeSpec,
    field: Vec<u8>,
    datum: Datum,
}

impl Attribute {
    pub fn new(spec: AttributeSpec) -> Self {
        Self {
            spec,
            field: Vec::new(),
            datum: Datum::Null,
        }
    }

    pub fn spec(&self) -> &AttributeSpec {
        &self.spec
    }

    pub fn is_null(&self) -> bool {
        matches!(self.datum, Datum::Null)
    }

    pub fn value(&self) -> Value<'_> {
        match self.datum {
            Datum::Null => Value::Null,
            Datum::Bool(b) => Value::Bool(b),
            Datum::Char(c) => Value::Char(c),
            Datum::Int(v) => Value::Int(v),
            Datum::Float4(v) => Value::Float4(v),
            Datum::Float8(v) => Value::Float8(v),
            Datum::Numeric(v) => Value::Numeric(v),
            Datum::Bytes => match self.spec.source {
                PgType::Uuid => Value::Uuid(&self.field),
                PgType::Bytea => Value::Bytea(&self.field),
                _ => Value::Text(&self.field),
            },
            Datum::Date(d) => Value::Date(d),
            Datum::Timestamp(us) => Value::Timestamp(us),
            Datum::TimestampTz(us) => Value::TimestampTz(us),
        }
    }

    /// Read one field and interpret it as this attribute's source type.
    ///
    /// Consumes exactly the bytes the field's length prefix declares.
    pub fn decode_from_postgres<S: ByteSource>(
        &mut self,
        src: &mut S,
        max_field_len: usize,
    ) -> ConvertResult<()> {
        let offset = src.offset();
        let datum = match postgres::read_field_binary(src, &mut self.field, max_field_len)? {
            None if !self.spec.nullable => {
                return Err(ConvertError::decode(offset, FieldError::UnexpectedNull));
            }
            None => Datum::Null,
            Some(bytes) => decode_datum(self.spec.source, bytes)
                .map_err(|e| ConvertError::decode(offset, e))?,
        };
        self.datum = datum;
        Ok(())
    }

    /// Write the current value in the SciDB layout.
    pub fn encode_to_target<W: Write>(&self, out: &mut TargetWriter<W>) -> ConvertResult<()> {
        if self.is_null() {
            if !self.spec.nullable {
                return Err(ConvertError::encode(FieldError::UnexpectedNull));
            }
            out.write_indicator(false)?;
            return match self.spec.target.fixed_width() {
                Some(width) => out.write_zeroes(width),
                None if self.spec.target == ScidbType::String => out.write_string(&[]),
                None => out.write_binary(&[]),
            };
        }

        let encoded = self.encoded().map_err(ConvertError::encode)?;
        if self.spec.nullable {
            out.write_indicator(true)?;
        }
        match encoded {
            Encoded::Fixed { bytes, len } => out.write_all(&bytes[..len]),
            Encoded::String(text) => out.write_string(&text),
            Encoded::Binary(bytes) => out.write_binary(bytes),
        }
    }

    fn encoded(&self) -> Result<Encoded<'_>, FieldError> {
        let target = self.spec.target;
        let encoded = match (self.datum, target) {
            (Datum::Bool(b), ScidbType::Bool) => Encoded::fixed(&[b as u8]),
            (Datum::Char(c), ScidbType::Char | ScidbType::Int8) => Encoded::fixed(&[c]),
            (Datum::Int(v), t) if t.is_integer() => encode_int(v, t)?,
            (Datum::Int(v), ScidbType::Float) => Encoded::fixed(&(v as f32).to_le_bytes()),
            (Datum::Int(v), ScidbType::Double) => Encoded::fixed(&(v as f64).to_le_bytes()),
            (Datum::Float4(v), ScidbType::Float) => Encoded::fixed(&v.to_le_bytes()),
            (Datum::Float4(v), ScidbType::Double) => Encoded::fixed(&(v as f64).to_le_bytes()),
            (Datum::Float8(v), ScidbType::Double) => Encoded::fixed(&v.to_le_bytes()),
            (Datum::Float8(v), ScidbType::Float) => Encoded::fixed(&narrow_f32(v)?.to_le_bytes()),
            (Datum::Numeric(v), ScidbType::Double) => {
                Encoded::fixed(&self.numeric_in_range(v)?.to_le_bytes())
            }
            (Datum::Numeric(v), ScidbType::Float) => {
                Encoded::fixed(&narrow_f32(self.numeric_in_range(v)?)?.to_le_bytes())
            }
            (Datum::Bytes, ScidbType::String) => {
                let text = if self.spec.source == PgType::Uuid {
                    Cow::Owned(uuid_text(&self.field))
                } else {
                    Cow::Borrowed(self.field.as_slice())
                };
                if text.len() >= u32::MAX as usize {
                    return Err(FieldError::TooLong {
                        len: text.len(),
                        max: u32::MAX as usize - 1,
                    });
                }
                Encoded::String(text)
            }
            (Datum::Bytes, ScidbType::Binary) => {
                if self.field.len() > u32::MAX as usize {
                    return Err(FieldError::TooLong {
                        len: self.field.len(),
                        max: u32::MAX as usize,
                    });
                }
                Encoded::Binary(&self.field)
            }
            (Datum::Date(days), ScidbType::Datetime) => {
                Encoded::fixed(&temporal::date_to_unix_secs(days)?.to_le_bytes())
            }
            (Datum::Timestamp(us) | Datum::TimestampTz(us), ScidbType::Datetime) => {
                Encoded::fixed(&temporal::timestamp_to_unix_secs(us)?.to_le_bytes())
            }
            (Datum::TimestampTz(us), ScidbType::Datetimetz) => {
                let secs = temporal::timestamp_to_unix_secs(us)?;
                let mut bytes = [0u8; 16];
                bytes[..8].copy_from_slice(&secs.to_le_bytes());
                // UTC offset in seconds; COPY emits timestamptz normalized to UTC.
                bytes[8..].copy_from_slice(&0i64.to_le_bytes());
                Encoded::fixed(&bytes)
            }
            (datum, target) => {
                return Err(FieldError::Invalid {
                    ty: target.name(),
                    message: format!("cannot encode {:?} from {}", datum, self.spec.source),
                });
            }
        };
        Ok(encoded)
    }

    /// An infinite decoded numeric is either a real infinity or a finite
    /// value too large for `f64`; the raw field tells which.
    fn numeric_in_range(&self, value: f64) -> Result<f64, FieldError> {
        if value.is_finite() || value.is_nan() {
            return Ok(value);
        }
        Numeric::decode(&self.field)?.to_f64_in_range(self.spec.target.name())
    }
}

fn decode_datum(source: PgType, bytes: &[u8]) -> Result<Datum, FieldError> {
    if let Some(expected) = source.fixed_width() {
        if bytes.len() != expected {
            return Err(FieldError::WidthMismatch {
                ty: source.name(),
                expected,
                got: bytes.len(),
            });
        }
    }
    let datum = match source {
        PgType::Bool => match bytes[0] {
            0 => Datum::Bool(false),
            1 => Datum::Bool(true),
            other => {
                return Err(FieldError::Invalid {
                    ty: "bool",
                    message: format!("byte {:#04x}", other),
                });
            }
        },
        PgType::Char => Datum::Char(bytes[0]),
        PgType::Int2 => Datum::Int(i16::from_be_bytes(be(bytes)) as i64),
        PgType::Int4 => Datum::Int(i32::from_be_bytes(be(bytes)) as i64),
        PgType::Int8 => Datum::Int(i64::from_be_bytes(be(bytes))),
        PgType::Float4 => Datum::Float4(f32::from_be_bytes(be(bytes))),
        PgType::Float8 => Datum::Float8(f64::from_be_bytes(be(bytes))),
        PgType::Numeric => Datum::Numeric(numeric::numeric_to_f64(bytes)?),
        PgType::Text | PgType::Bytea | PgType::Uuid => Datum::Bytes,
        PgType::Date => Datum::Date(i32::from_be_bytes(be(bytes))),
        PgType::Timestamp => Datum::Timestamp(i64::from_be_bytes(be(bytes))),
        PgType::Timestamptz => Datum::TimestampTz(i64::from_be_bytes(be(bytes))),
    };
    Ok(datum)
}

/// Copy the first `N` bytes; callers have checked the width.
fn be<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

fn encode_int(v: i64, target: ScidbType) -> Result<Encoded<'static>, FieldError> {
    let range = |_| FieldError::OutOfRange {
        value: v.to_string(),
        target: target.name(),
    };
    let encoded = match target {
        ScidbType::Int8 => Encoded::fixed(&i8::try_from(v).map_err(range)?.to_le_bytes()),
        ScidbType::Int16 => Encoded::fixed(&i16::try_from(v).map_err(range)?.to_le_bytes()),
        ScidbType::Int32 => Encoded::fixed(&i32::try_from(v).map_err(range)?.to_le_bytes()),
        ScidbType::Int64 => Encoded::fixed(&v.to_le_bytes()),
        ScidbType::Uint8 => Encoded::fixed(&u8::try_from(v).map_err(range)?.to_le_bytes()),
        ScidbType::Uint16 => Encoded::fixed(&u16::try_from(v).map_err(range)?.to_le_bytes()),
        ScidbType::Uint32 => Encoded::fixed(&u32::try_from(v).map_err(range)?.to_le_bytes()),
        ScidbType::Uint64 => Encoded::fixed(&u64::try_from(v).map_err(range)?.to_le_bytes()),
        other => {
            return Err(FieldError::Invalid {
                ty: other.name(),
                message: "not an integer type".to_string(),
            });
        }
    };
    Ok(encoded)
}

fn narrow_f32(v: f64) -> Result<f32, FieldError> {
    if v.is_finite() && v.abs() > f32::MAX as f64 {
        return Err(FieldError::OutOfRange {
            value: v.to_string(),
            target: "float",
        });
    }
    Ok(v as f32)
}

/// 36-char hyphenated lowercase form.
fn uuid_text(bytes: &[u8]) -> Vec<u8> {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = Vec::with_capacity(36);
    for (i, byte) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push(b'-');
        }
        out.push(HEX[(byte >> 4) as usize]);
        out.push(HEX[(byte & 0x0f) as usize]);
    }
    out
}
