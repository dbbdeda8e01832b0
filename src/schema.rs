//! Attribute schemas.
//!
//! A schema is the ordered list of attributes a dump's columns map onto. It
//! can be built in code, parsed from a SciDB-style schema string, or loaded
//! from a TOML file.
//!
//! # Schema strings
//!
//! ```text
//! <id:int64 NOT NULL, name:string, price:double FROM numeric>[i=0:*]
//! │ ──┬─ ──┬── ───┬───                         ──────┬─────  ──┬──
//! │   │    │      │                                  │         └── dimensions (ignored)
//! │   │    │      │                                  └── source type override
//! │   │    │      └── nullability (nullable unless NOT NULL)
//! │   │    └── SciDB type
//! │   └── attribute name (optional)
//! └── angle brackets (optional)
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag_no_case, take_while, take_while1},
    character::complete::{char, multispace0, multispace1},
    combinator::{opt, value},
    multi::separated_list1,
    sequence::{delimited, pair, preceded, terminated, tuple},
};
use serde::Deserialize;

use crate::attribute::{Attribute, AttributeSpec};
use crate::error::{ConvertError, ConvertResult};
use crate::postgres::PgType;
use crate::scidb::ScidbType;

/// Ordered, immutable list of attribute descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    attributes: Vec<AttributeSpec>,
}

impl Schema {
    /// Build a schema, rejecting empty lists and unsupported type pairings.
    pub fn new(attributes: Vec<AttributeSpec>) -> ConvertResult<Self> {
        if attributes.is_empty() {
            return Err(ConvertError::schema("schema has no attributes"));
        }
        if attributes.len() > i16::MAX as usize {
            return Err(ConvertError::schema(format!(
                "{} attributes exceed the COPY field limit of {}",
                attributes.len(),
                i16::MAX
            )));
        }
        for (index, spec) in attributes.iter().enumerate() {
            spec.check()
                .map_err(|e| ConvertError::schema(format!("attribute {}: {}", index, e)))?;
        }
        Ok(Self { attributes })
    }

    /// Parse a schema string such as `<a:int32, b:string NOT NULL>`.
    pub fn parse(input: &str) -> ConvertResult<Self> {
        let trimmed = input.trim();
        let raw = match parse_schema(trimmed) {
            Ok(("", raw)) => raw,
            Ok((remaining, _)) => {
                return Err(ConvertError::schema(format!(
                    "unexpected trailing content at position {}: '{}'",
                    trimmed.len() - remaining.len(),
                    remaining
                )));
            }
            Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
                return Err(ConvertError::schema(format!(
                    "parse failed at position {}: expected an attribute near '{}'",
                    trimmed.len() - e.input.len(),
                    e.input.chars().take(16).collect::<String>()
                )));
            }
            Err(nom::Err::Incomplete(_)) => {
                return Err(ConvertError::schema("incomplete schema"));
            }
        };

        let mut attributes = Vec::with_capacity(raw.len());
        for attr in raw {
            let position = trimmed.len() - attr.rest_len;
            let target: ScidbType = attr
                .target
                .parse()
                .map_err(|e| ConvertError::schema(format!("{} at position {}", e, position)))?;
            let mut spec = AttributeSpec::new(target).nullable(attr.nullable);
            spec.name = attr.name.map(str::to_string);
            if let Some(source) = attr.source {
                let source: PgType = source
                    .parse()
                    .map_err(|e| ConvertError::schema(format!("{} at position {}", e, position)))?;
                spec = spec.source(source);
            }
            attributes.push(spec);
        }
        Self::new(attributes)
    }

    /// Parse a TOML schema document.
    ///
    /// ```toml
    /// [[attribute]]
    /// name = "id"
    /// type = "int64"
    /// source = "int8"     # optional
    /// nullable = false    # optional, default true
    /// ```
    ///
    /// A single `schema = "<...>"` key is accepted instead.
    pub fn from_toml_str(content: &str) -> ConvertResult<Self> {
        let file: SchemaFile = toml::from_str(content)
            .map_err(|e| ConvertError::schema(format!("invalid schema file: {}", e)))?;
        match (file.schema, file.attribute.is_empty()) {
            (Some(_), false) => Err(ConvertError::schema(
                "schema file sets both `schema` and `[[attribute]]`",
            )),
            (Some(text), true) => Self::parse(&text),
            (None, _) => {
                let attributes = file
                    .attribute
                    .into_iter()
                    .enumerate()
                    .map(|(index, def)| def.into_spec(index))
                    .collect::<ConvertResult<Vec<_>>>()?;
                Self::new(attributes)
            }
        }
    }

    /// Load a TOML schema file.
    pub fn load(path: impl AsRef<Path>) -> ConvertResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ConvertError::schema(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn attributes(&self) -> &[AttributeSpec] {
        &self.attributes
    }

    /// Fresh per-run attribute instances, in schema order.
    pub fn instantiate(&self) -> Vec<Attribute> {
        self.attributes.iter().cloned().map(Attribute::new).collect()
    }

    /// Template for SciDB's `input()`/`load()`, e.g. `(int64,string null)`.
    pub fn load_format(&self) -> String {
        let entries: Vec<String> = self.attributes.iter().map(|a| a.format_entry()).collect();
        format!("({})", entries.join(","))
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries: Vec<String> = self.attributes.iter().map(|a| a.to_string()).collect();
        write!(f, "<{}>", entries.join(", "))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    schema: Option<String>,
    #[serde(default)]
    attribute: Vec<AttributeDef>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AttributeDef {
    name: Option<String>,
    #[serde(rename = "type")]
    target: String,
    source: Option<String>,
    #[serde(default = "default_true")]
    nullable: bool,
}

fn default_true() -> bool {
    true
}

impl AttributeDef {
    fn into_spec(self, index: usize) -> ConvertResult<AttributeSpec> {
        let context = |e: String| ConvertError::schema(format!("attribute {}: {}", index, e));
        let target: ScidbType = self.target.parse().map_err(context)?;
        let mut spec = AttributeSpec::new(target).nullable(self.nullable);
        spec.name = self.name;
        if let Some(source) = self.source {
            spec = spec.source(source.parse().map_err(context)?);
        }
        Ok(spec)
    }
}

/// One attribute as written, before type names are resolved.
struct RawAttribute<'a> {
    name: Option<&'a str>,
    target: &'a str,
    nullable: bool,
    source: Option<&'a str>,
    /// Input length remaining at the type name, for error positions.
    rest_len: usize,
}

fn parse_schema(input: &str) -> IResult<&str, Vec<RawAttribute<'_>>> {
    let (input, _) = opt(terminated(char('<'), multispace0))(input)?;
    let (input, attributes) = separated_list1(
        tuple((multispace0, char(','), multispace0)),
        parse_attribute,
    )(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(char('>'))(input)?;
    let (input, _) = multispace0(input)?;
    let (input, _) = opt(parse_dimensions)(input)?;
    let (input, _) = multispace0(input)?;
    Ok((input, attributes))
}

fn parse_attribute(input: &str) -> IResult<&str, RawAttribute<'_>> {
    let (input, name) = opt(terminated(
        parse_identifier,
        pair(multispace0, char(':')),
    ))(input)?;
    let (input, _) = multispace0(input)?;
    let rest_len = input.len();
    let (input, target) = parse_identifier(input)?;
    let (input, nullable) = opt(preceded(multispace1, parse_nullability))(input)?;
    let (input, source) = opt(preceded(
        tuple((multispace1, tag_no_case("from"), multispace1)),
        parse_pg_type,
    ))(input)?;

    Ok((
        input,
        RawAttribute {
            name,
            target,
            nullable: nullable.unwrap_or(true),
            source,
            rest_len,
        },
    ))
}

/// `NULL` or `NOT NULL`.
fn parse_nullability(input: &str) -> IResult<&str, bool> {
    alt((
        value(
            false,
            tuple((tag_no_case("not"), multispace1, tag_no_case("null"))),
        ),
        value(true, tag_no_case("null")),
    ))(input)
}

/// Dimension block, accepted and discarded.
fn parse_dimensions(input: &str) -> IResult<&str, &str> {
    delimited(char('['), take_while(|c: char| c != ']'), char(']'))(input)
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// PostgreSQL type name; quotes allowed for `"char"`.
fn parse_pg_type(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '"')(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_full_schema() {
        let text = "<id:int64 NOT NULL, name:string, price:double FROM numeric>[i=0:*,1000000,0]";
        let schema = Schema::parse(text).unwrap();
        assert_eq!(
            schema.attributes(),
            &[
                AttributeSpec::named("id", ScidbType::Int64).not_null(),
                AttributeSpec::named("name", ScidbType::String),
                AttributeSpec::named("price", ScidbType::Double).source(PgType::Numeric),
            ]
        );
        assert_eq!(schema.load_format(), "(int64,string null,double null)");
    }

    #[test]
    fn test_parse_bare_type_list() {
        let schema = Schema::parse("int32 not null,string null , double").unwrap();
        assert_eq!(schema.len(), 3);
        assert_eq!(schema.attributes()[0].name, None);
        assert!(!schema.attributes()[0].nullable);
        assert!(schema.attributes()[1].nullable);
        assert_eq!(schema.attributes()[2].target, ScidbType::Double);
    }

    #[test]
    fn test_parse_quoted_char_source() {
        let schema = Schema::parse("<flag:int8 FROM \"char\">").unwrap();
        assert_eq!(schema.attributes()[0].source, PgType::Char);
    }

    #[test]
    fn test_display_round_trips() {
        let text = "<id:int64 NOT NULL, v:int32 FROM int8, s:string>";
        let schema = Schema::parse(text).unwrap();
        assert_eq!(schema.to_string(), text);
        assert_eq!(Schema::parse(&schema.to_string()).unwrap(), schema);
    }

    #[test]
    fn test_parse_errors() {
        let err = Schema::parse("<a:int32, b:complex>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(err.to_string().contains("unknown SciDB type 'complex'"));
        assert!(err.to_string().contains("position 12"));

        let err = Schema::parse("<a:int32,>").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = Schema::parse("").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = Schema::parse("<a:string FROM int4>").unwrap_err();
        assert!(err.to_string().contains("cannot load PostgreSQL int4 into SciDB string"));
    }

    #[test]
    fn test_empty_schema_rejected() {
        assert_eq!(Schema::new(Vec::new()).unwrap_err().kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_toml_attribute_tables() {
        let schema = Schema::from_toml_str(
            r#"
            [[attribute]]
            name = "id"
            type = "int64"
            nullable = false

            [[attribute]]
            name = "seen"
            type = "datetime"
            source = "timestamptz"
            "#,
        )
        .unwrap();
        assert_eq!(
            schema.attributes(),
            &[
                AttributeSpec::named("id", ScidbType::Int64).not_null(),
                AttributeSpec::named("seen", ScidbType::Datetime).source(PgType::Timestamptz),
            ]
        );
    }

    #[test]
    fn test_toml_schema_string() {
        let schema = Schema::from_toml_str(r#"schema = "<a:int32, b:string>""#).unwrap();
        assert_eq!(schema.len(), 2);
    }

    #[test]
    fn test_toml_rejects_ambiguous_and_unknown() {
        let err = Schema::from_toml_str(
            r#"
            schema = "<a:int32>"
            [[attribute]]
            type = "int32"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);

        let err = Schema::from_toml_str(
            r#"
            [[attribute]]
            type = "int32"
            colour = "blue"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
    }

    #[test]
    fn test_instantiate_preserves_order() {
        let schema = Schema::parse("<a:int32, b:string, c:bool>").unwrap();
        let names: Vec<_> = schema
            .instantiate()
            .iter()
            .map(|a| a.spec().name.clone().unwrap_or_default())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
