//! Converter configuration.
//!
//! Settings come from a TOML file (by default
//! `<config dir>/pg2scidb/config.toml`) and can be overridden per run.
//!
//! ```toml
//! buffer_size = 1048576
//! max_field_len = 16777216
//! unbuffered = false
//! schema = "<id:int64 NOT NULL, name:string>"
//! # or: schema_file = "schema.toml"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buffer::{DEFAULT_BUFFER_SIZE, MIN_BUFFER_SIZE};
use crate::converter::{ConvertOptions, ReadMode};
use crate::error::{ConvertError, ConvertResult};
use crate::postgres::MAX_FIELD_LEN;
use crate::schema::Schema;

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Read-ahead buffer capacity in bytes
    pub buffer_size: usize,

    /// Upper bound for a single variable-width field
    pub max_field_len: usize,

    /// Read the input without the read-ahead buffer
    pub unbuffered: bool,

    /// Inline schema string
    pub schema: Option<String>,

    /// Path to a TOML schema file
    pub schema_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_field_len: MAX_FIELD_LEN,
            unbuffered: false,
            schema: None,
            schema_file: None,
        }
    }
}

impl Config {
    /// Create a new configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// `<config dir>/pg2scidb/config.toml`, when the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("pg2scidb").join("config.toml"))
    }

    pub fn from_toml_str(content: &str) -> ConvertResult<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| ConvertError::Config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load an explicit config file. A missing file is an error.
    pub fn load(path: impl AsRef<Path>) -> ConvertResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConvertError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load the default config file, falling back to defaults when absent.
    pub fn load_default() -> ConvertResult<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> ConvertResult<()> {
        if self.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConvertError::Config(format!(
                "buffer_size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, self.buffer_size
            )));
        }
        if self.max_field_len == 0 || self.max_field_len > i32::MAX as usize {
            return Err(ConvertError::Config(format!(
                "max_field_len must be between 1 and {}, got {}",
                i32::MAX,
                self.max_field_len
            )));
        }
        if self.schema.is_some() && self.schema_file.is_some() {
            return Err(ConvertError::Config(
                "set either schema or schema_file, not both".to_string(),
            ));
        }
        Ok(())
    }

    pub fn convert_options(&self) -> ConvertOptions {
        ConvertOptions {
            buffer_size: self.buffer_size,
            max_field_len: self.max_field_len,
            read_mode: if self.unbuffered {
                ReadMode::Unbuffered
            } else {
                ReadMode::Buffered
            },
        }
    }

    /// The configured schema, if any.
    pub fn resolve_schema(&self) -> ConvertResult<Option<Schema>> {
        match (&self.schema, &self.schema_file) {
            (Some(text), _) => Schema::parse(text).map(Some),
            (None, Some(path)) => Schema::load(path).map(Some),
            (None, None) => Ok(None),
        }
    }
}

/// Builder for Config
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Start from an existing configuration
    pub fn from_config(config: Config) -> Self {
        Self { config }
    }

    /// Set the read-ahead buffer size
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.config.buffer_size = bytes;
        self
    }

    /// Set the per-field size limit
    pub fn max_field_len(mut self, bytes: usize) -> Self {
        self.config.max_field_len = bytes;
        self
    }

    /// Disable read-ahead buffering
    pub fn unbuffered(mut self, unbuffered: bool) -> Self {
        self.config.unbuffered = unbuffered;
        self
    }

    /// Set an inline schema string, replacing any schema file
    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.config.schema = Some(schema.into());
        self.config.schema_file = None;
        self
    }

    /// Set a schema file, replacing any inline schema
    pub fn schema_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.schema_file = Some(path.into());
        self.config.schema = None;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> ConvertResult<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
