//! Schema-less scan of a COPY BINARY dump.
//!
//! Useful for writing a schema for an unfamiliar dump: it reports how many
//! columns the rows carry, which of them contain NULLs, and the length range
//! of the non-null values (a fixed 4 or 8 usually means an integer, float or
//! timestamp column).

use std::io::Read;

use serde::Serialize;
use tracing::debug;

use crate::buffer::{BufferedReader, ByteSource, RawReader};
use crate::converter::{ConvertOptions, ReadMode};
use crate::error::{ConvertError, ConvertResult};
use crate::postgres::{self, FieldCount};

/// Per-column observations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ColumnSummary {
    pub nulls: u64,
    /// Shortest non-null value, `None` when every value was NULL.
    pub min_len: Option<usize>,
    pub max_len: Option<usize>,
}

impl ColumnSummary {
    fn observe(&mut self, len: Option<usize>) {
        match len {
            None => self.nulls += 1,
            Some(len) => {
                self.min_len = Some(self.min_len.map_or(len, |m| m.min(len)));
                self.max_len = Some(self.max_len.map_or(len, |m| m.max(len)));
            }
        }
    }

    /// True when every non-null value had the same length.
    pub fn is_fixed_width(&self) -> bool {
        matches!((self.min_len, self.max_len), (Some(a), Some(b)) if a == b)
    }
}

/// What a dump contains.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DumpSummary {
    pub flags: u32,
    pub has_oids: bool,
    pub extension_len: u32,
    pub rows: u64,
    /// Fields per row, `None` for a dump without rows.
    pub field_count: Option<u16>,
    pub columns: Vec<ColumnSummary>,
    pub bytes_read: u64,
    /// Whether the dump ended with the -1 trailer.
    pub trailer: bool,
}

/// Walk every row of `input`.
pub fn inspect<R: Read>(input: R, options: &ConvertOptions) -> ConvertResult<DumpSummary> {
    match options.read_mode {
        ReadMode::Buffered => {
            let mut source = BufferedReader::with_capacity(options.buffer_size, input);
            scan(&mut source, options.max_field_len)
        }
        ReadMode::Unbuffered => scan(&mut RawReader::new(input), options.max_field_len),
    }
}

fn scan<S: ByteSource>(source: &mut S, max_field_len: usize) -> ConvertResult<DumpSummary> {
    let header = postgres::read_header(source)?;
    let mut summary = DumpSummary {
        flags: header.flags,
        has_oids: header.has_oids(),
        extension_len: header.extension_len,
        ..DumpSummary::default()
    };

    loop {
        let offset = source.offset();
        let count = match postgres::read_field_count(source)? {
            FieldCount::Fields(n) => n,
            FieldCount::Trailer => {
                summary.trailer = true;
                break;
            }
            FieldCount::EndOfStream => break,
        };
        match summary.field_count {
            None => {
                summary.field_count = Some(count);
                summary.columns = vec![ColumnSummary::default(); count as usize];
            }
            Some(expected) if expected != count => {
                return Err(ConvertError::format(
                    offset,
                    format!(
                        "row {} has {} fields, earlier rows have {}",
                        summary.rows, count, expected
                    ),
                ));
            }
            Some(_) => {}
        }
        if header.has_oids() {
            postgres::skip_field(source, max_field_len)?;
        }
        for column in summary.columns.iter_mut() {
            column.observe(postgres::skip_field(source, max_field_len)?);
        }
        summary.rows += 1;
    }

    summary.bytes_read = source.offset();
    debug!(rows = summary.rows, fields = ?summary.field_count, "inspected dump");
    Ok(summary)
}
