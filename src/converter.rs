//! Conversion driver.
//!
//! ```text
//! Start ─▶ HeaderRead ─▶ FieldCountRead ──(-1 / EOF)──▶ Done
//!                          ▲      │
//!                          │      ▼
//!                          └── AttributeIterate(i): decode, encode, i += 1
//! ```
//!
//! The driver owns both streams for the whole run. They are dropped when
//! `convert` returns, on success and on every error path.

use std::io::{BufWriter, Read, Write};

use serde::Serialize;
use tracing::{debug, info, trace};

use crate::buffer::{BufferedReader, ByteSource, DEFAULT_BUFFER_SIZE, RawReader};
use crate::error::{ConvertError, ConvertResult, Location};
use crate::postgres::{self, CopyHeader, FieldCount, MAX_FIELD_LEN};
use crate::scidb::TargetWriter;
use crate::schema::Schema;

/// How the input stream is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Through a fixed-capacity read-ahead buffer.
    Buffered,
    /// Straight from the underlying reader.
    Unbuffered,
}

/// Per-run tuning. None of these affect the output bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertOptions {
    pub buffer_size: usize,
    pub max_field_len: usize,
    pub read_mode: ReadMode,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_field_len: MAX_FIELD_LEN,
            read_mode: ReadMode::Buffered,
        }
    }
}

/// Counters for a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversionStats {
    pub rows: u64,
    pub fields: u64,
    pub nulls: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Start,
    HeaderRead,
    FieldCountRead,
    AttributeIterate(usize),
    Done,
}

/// Streams a COPY BINARY dump into SciDB binary format.
#[derive(Debug, Clone, Default)]
pub struct Converter {
    options: ConvertOptions,
}

impl Converter {
    pub fn new(options: ConvertOptions) -> Self {
        Self { options }
    }

    /// Convert `input` into `output` using `schema`.
    ///
    /// Both streams are consumed and closed before this returns. On error,
    /// whatever reached `output` is incomplete and must be discarded.
    pub fn convert<R: Read, W: Write>(
        &self,
        input: R,
        output: W,
        schema: &Schema,
    ) -> ConvertResult<ConversionStats> {
        let mut writer = TargetWriter::new(BufWriter::new(output));
        match self.options.read_mode {
            ReadMode::Buffered => {
                let mut source = BufferedReader::with_capacity(self.options.buffer_size, input);
                self.run(&mut source, &mut writer, schema)
            }
            ReadMode::Unbuffered => {
                let mut source = RawReader::new(input);
                self.run(&mut source, &mut writer, schema)
            }
        }
    }

    /// The state machine, over any byte source.
    pub fn run<S: ByteSource, W: Write>(
        &self,
        source: &mut S,
        writer: &mut TargetWriter<W>,
        schema: &Schema,
    ) -> ConvertResult<ConversionStats> {
        let mut attributes = schema.instantiate();
        let mut stats = ConversionStats::default();
        let mut header = CopyHeader {
            flags: 0,
            extension_len: 0,
        };
        let mut state = State::Start;

        loop {
            state = match state {
                State::Start => {
                    header = postgres::read_header(source)?;
                    State::HeaderRead
                }
                State::HeaderRead => {
                    debug!(
                        attributes = attributes.len(),
                        has_oids = header.has_oids(),
                        "header accepted, converting rows"
                    );
                    State::FieldCountRead
                }
                State::FieldCountRead => {
                    let offset = source.offset();
                    match postgres::read_field_count(source)? {
                        FieldCount::Trailer | FieldCount::EndOfStream => State::Done,
                        FieldCount::Fields(n) if n as usize != attributes.len() => {
                            return Err(ConvertError::format(
                                offset,
                                format!(
                                    "row {} has {} fields, schema has {} attributes",
                                    stats.rows,
                                    n,
                                    attributes.len()
                                ),
                            ));
                        }
                        FieldCount::Fields(_) => {
                            if header.has_oids() {
                                postgres::skip_field(source, self.options.max_field_len)?;
                            }
                            trace!(row = stats.rows, offset, "row");
                            State::AttributeIterate(0)
                        }
                    }
                }
                State::AttributeIterate(index) if index == attributes.len() => {
                    stats.rows += 1;
                    State::FieldCountRead
                }
                State::AttributeIterate(index) => {
                    let row = stats.rows;
                    let field_offset = source.offset();
                    let attribute = &mut attributes[index];
                    let locate = |e: ConvertError| {
                        e.located(Location::new(row, index, attribute_name(schema, index)))
                            .with_offset(field_offset)
                    };
                    attribute
                        .decode_from_postgres(source, self.options.max_field_len)
                        .map_err(locate)?;
                    attribute.encode_to_target(writer).map_err(locate)?;
                    stats.fields += 1;
                    if attribute.is_null() {
                        stats.nulls += 1;
                    }
                    State::AttributeIterate(index + 1)
                }
                State::Done => break,
            };
        }

        writer.flush()?;
        stats.bytes_read = source.offset();
        stats.bytes_written = writer.bytes_written();
        info!(
            rows = stats.rows,
            fields = stats.fields,
            nulls = stats.nulls,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            "conversion complete"
        );
        Ok(stats)
    }
}

fn attribute_name(schema: &Schema, index: usize) -> Option<&str> {
    schema.attributes()[index].name.as_deref()
}

/// Convert with the given options; see [`Converter::convert`].
pub fn convert<R: Read, W: Write>(
    input: R,
    output: W,
    schema: &Schema,
    options: ConvertOptions,
) -> ConvertResult<ConversionStats> {
    Converter::new(options).convert(input, output, schema)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, FieldError};
    use crate::postgres::{FLAG_HAS_OIDS, SIGNATURE};
    use pretty_assertions::assert_eq;
    use std::cell::RefCell;
    use std::io::{self, Cursor};
    use std::rc::Rc;

    fn header(flags: u32) -> Vec<u8> {
        let mut out = SIGNATURE.to_vec();
        out.extend_from_slice(&flags.to_be_bytes());
        out.extend_from_slice(&0i32.to_be_bytes());
        out
    }

    fn row(fields: &[Option<&[u8]>]) -> Vec<u8> {
        let mut out = (fields.len() as i16).to_be_bytes().to_vec();
        for field in fields {
            match field {
                Some(bytes) => {
                    out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                None => out.extend_from_slice(&(-1i32).to_be_bytes()),
            }
        }
        out
    }

    fn trailer() -> Vec<u8> {
        (-1i16).to_be_bytes().to_vec()
    }

    /// Output sink that stays observable after the converter drops it.
    #[derive(Clone, Default)]
    struct Shared(Rc<RefCell<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(
        input: Vec<u8>,
        schema: &str,
        options: ConvertOptions,
    ) -> (ConvertResult<ConversionStats>, Vec<u8>) {
        let schema = Schema::parse(schema).unwrap();
        let sink = Shared::default();
        let result = convert(Cursor::new(input), sink.clone(), &schema, options);
        let bytes = sink.0.borrow().clone();
        (result, bytes)
    }

    #[test]
    fn test_int_and_null_text_row() {
        let mut input = header(0);
        input.extend(row(&[Some(&[0, 0, 0, 0x2A]), None]));
        input.extend(trailer());

        let (result, out) = run(input, "<a:int32, b:string>", ConvertOptions::default());
        let stats = result.unwrap();
        assert_eq!(out, vec![0xFF, 0x2A, 0, 0, 0, 0x00, 1, 0, 0, 0, 0]);
        assert_eq!(stats.rows, 1);
        assert_eq!(stats.fields, 2);
        assert_eq!(stats.nulls, 1);
        assert_eq!(stats.bytes_written, 11);
        assert_eq!(stats.bytes_read, 19 + 2 + 8 + 4 + 2);
    }

    #[test]
    fn test_empty_dump_writes_nothing() {
        let mut input = header(0);
        input.extend(trailer());
        let (result, out) = run(input, "<a:int32>", ConvertOptions::default());
        assert_eq!(result.unwrap().rows, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn test_missing_trailer_is_end_of_data() {
        let mut input = header(0);
        input.extend(row(&[Some(&7i64.to_be_bytes())]));
        let (result, out) = run(input, "<a:int64 NOT NULL>", ConvertOptions::default());
        assert_eq!(result.unwrap().rows, 1);
        assert_eq!(out, 7i64.to_le_bytes().to_vec());
    }

    #[test]
    fn test_bad_signature_writes_nothing() {
        let mut input = header(0);
        input[1] = b'X';
        input.extend(row(&[Some(&[0, 0, 0, 1])]));
        let (result, out) = run(input, "<a:int32>", ConvertOptions::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Format);
        assert!(out.is_empty());
    }

    #[test]
    fn test_field_count_mismatch_aborts_before_row() {
        let mut input = header(0);
        input.extend(row(&[Some(&[0, 0, 0, 1]), Some(b"x")]));
        input.extend(row(&[Some(&[0, 0, 0, 2])]));
        input.extend(trailer());

        let schema = "<a:int32 NOT NULL, b:string NOT NULL>";
        let (result, out) = run(input, schema, ConvertOptions::default());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("row 1 has 1 fields, schema has 2"));
        // only the first row made it out
        assert_eq!(out, vec![1, 0, 0, 0, 2, 0, 0, 0, b'x', 0]);
    }

    #[test]
    fn test_decode_error_carries_location() {
        let mut input = header(0);
        input.extend(row(&[Some(&[0, 0, 0, 1]), Some(&[0, 0, 0, 1])]));
        input.extend(row(&[Some(&[0, 0, 0, 2]), Some(&[0, 2])]));
        input.extend(trailer());

        let (result, _) = run(input, "<id:int32, qty:int32>", ConvertOptions::default());
        match result.unwrap_err() {
            ConvertError::Decode {
                location,
                offset,
                source,
            } => {
                assert_eq!(location, Location::new(1, 1, Some("qty")));
                assert_eq!(offset, 19 + 18 + 2 + 8);
                assert_eq!(
                    source,
                    FieldError::WidthMismatch {
                        ty: "int4",
                        expected: 4,
                        got: 2
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_encode_error_carries_location() {
        let mut input = header(0);
        input.extend(row(&[Some(&1000i16.to_be_bytes())]));
        input.extend(trailer());
        let (result, _) = run(input, "<small:int8>", ConvertOptions::default());
        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
        assert_eq!(err.location(), Some(&Location::new(0, 0, Some("small"))));
        // header, then the row's field count
        assert_eq!(err.offset(), Some(19 + 2));
        assert!(err.to_string().contains("(byte 21)"));
    }

    #[test]
    fn test_numeric_too_large_for_double_is_encode_error() {
        let mut numeric = Vec::new();
        for word in [1u16, 100, 0, 0, 9999] {
            numeric.extend_from_slice(&word.to_be_bytes());
        }
        let mut input = header(0);
        input.extend(row(&[Some(&numeric)]));
        input.extend(trailer());

        let (result, _) = run(input, "<x:double FROM numeric>", ConvertOptions::default());
        match result.unwrap_err() {
            ConvertError::Encode {
                location,
                offset,
                source,
            } => {
                assert_eq!(location, Location::new(0, 0, Some("x")));
                assert_eq!(offset, 21);
                assert_eq!(
                    source,
                    FieldError::OutOfRange {
                        value: "9999e400".to_string(),
                        target: "double"
                    }
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bytes_after_trailer_are_not_read() {
        let mut input = header(0);
        input.extend(row(&[Some(&[0, 0, 0, 5])]));
        input.extend(trailer());
        let consumed = input.len() as u64;
        input.extend_from_slice(b"garbage after the end");

        for read_mode in [ReadMode::Buffered, ReadMode::Unbuffered] {
            let options = ConvertOptions {
                read_mode,
                ..ConvertOptions::default()
            };
            let (result, out) = run(input.clone(), "<v:int32 NOT NULL>", options);
            let stats = result.unwrap();
            assert_eq!(stats.rows, 1);
            assert_eq!(stats.bytes_read, consumed);
            assert_eq!(out, 5i32.to_le_bytes().to_vec());
        }
    }

    #[test]
    fn test_oid_column_is_skipped() {
        let mut input = header(FLAG_HAS_OIDS);
        // count excludes the OID field that follows it
        input.extend_from_slice(&1i16.to_be_bytes());
        input.extend_from_slice(&4i32.to_be_bytes());
        input.extend_from_slice(&[0xAB; 4]);
        input.extend_from_slice(&4i32.to_be_bytes());
        input.extend_from_slice(&9i32.to_be_bytes());
        input.extend(trailer());

        let (result, out) = run(input, "<v:int32 NOT NULL>", ConvertOptions::default());
        assert_eq!(result.unwrap().rows, 1);
        assert_eq!(out, 9i32.to_le_bytes().to_vec());
    }

    #[test]
    fn test_read_modes_agree() {
        let mut input = header(0);
        for i in 0..500i32 {
            let text = format!("row-{}", i);
            input.extend(row(&[Some(&i.to_be_bytes()), Some(text.as_bytes())]));
        }
        input.extend(trailer());

        let schema = "<i:int32 NOT NULL, s:string NOT NULL>";
        let buffered = ConvertOptions {
            buffer_size: 16,
            ..ConvertOptions::default()
        };
        let raw = ConvertOptions {
            read_mode: ReadMode::Unbuffered,
            ..ConvertOptions::default()
        };
        let (a, out_a) = run(input.clone(), schema, buffered);
        let (b, out_b) = run(input, schema, raw);
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_eq!(a, b);
        assert_eq!(a.rows, 500);
        assert_eq!(a.fields, 1000);
        assert_eq!(out_a, out_b);
    }

    #[test]
    fn test_truncated_row_is_format_error() {
        let mut input = header(0);
        let mut partial = row(&[Some(&[0, 0, 0, 1])]);
        partial.truncate(partial.len() - 2);
        input.extend(partial);
        let (result, _) = run(input, "<a:int32>", ConvertOptions::default());
        assert_eq!(result.unwrap_err().kind(), ErrorKind::Format);
    }
}
