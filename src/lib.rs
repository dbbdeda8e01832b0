//! # pg2scidb
//!
//! Streams a PostgreSQL `COPY ... TO ... WITH BINARY` dump into SciDB's
//! binary load format, one row at a time.
//!
//! ## Quick Example
//!
//! ```
//! use pg2scidb::prelude::*;
//!
//! let schema = Schema::parse("<id:int32 NOT NULL>").unwrap();
//!
//! let mut dump = b"PGCOPY\n\xFF\r\n\0".to_vec();
//! dump.extend_from_slice(&[0; 8]); // flags, extension length
//! dump.extend_from_slice(&1i16.to_be_bytes());
//! dump.extend_from_slice(&4i32.to_be_bytes());
//! dump.extend_from_slice(&42i32.to_be_bytes());
//! dump.extend_from_slice(&(-1i16).to_be_bytes());
//!
//! let mut out = Vec::new();
//! let stats = Converter::default().convert(&dump[..], &mut out, &schema).unwrap();
//! assert_eq!(stats.rows, 1);
//! assert_eq!(out, 42i32.to_le_bytes());
//! ```
//!
//! ## Type mapping
//!
//! | PostgreSQL            | SciDB                                  |
//! |-----------------------|----------------------------------------|
//! | `bool`                | `bool`                                 |
//! | `"char"`              | `char`, `int8`                         |
//! | `int2/int4/int8`      | any integer (range checked), `float`, `double` |
//! | `float4/float8`       | `float`, `double`                      |
//! | `numeric`             | `double`, `float`                      |
//! | `text` and friends    | `string`                               |
//! | `bytea`               | `binary`                               |
//! | `uuid`                | `string`, `binary`                     |
//! | `date/timestamp`      | `datetime`                             |
//! | `timestamptz`         | `datetime`, `datetimetz`               |

pub mod attribute;
pub mod buffer;
pub mod config;
pub mod converter;
pub mod error;
pub mod inspect;
pub mod postgres;
pub mod schema;
pub mod scidb;

pub mod prelude {
    pub use crate::attribute::{Attribute, AttributeSpec, Value};
    pub use crate::config::Config;
    pub use crate::converter::{ConversionStats, ConvertOptions, Converter, ReadMode};
    pub use crate::error::*;
    pub use crate::inspect::{ColumnSummary, DumpSummary, inspect};
    pub use crate::postgres::PgType;
    pub use crate::schema::Schema;
    pub use crate::scidb::ScidbType;
}

pub use converter::convert;

/// Parse a schema string such as `<id:int64 NOT NULL, name:string>`.
///
/// # Example
///
/// ```
/// let schema = pg2scidb::parse_schema("<a:int32, b:string>").unwrap();
/// assert_eq!(schema.load_format(), "(int32 null,string null)");
/// ```
pub fn parse_schema(input: &str) -> error::ConvertResult<schema::Schema> {
    schema::Schema::parse(input)
}
