//! pg2scidb — PostgreSQL binary COPY to SciDB binary
//!
//! # Usage
//!
//! ```bash
//! # Convert a dump file
//! pg2scidb convert -i users.pgcopy -o users.scidb -s '<id:int64 NOT NULL, name:string>'
//!
//! # Stream straight out of psql
//! psql -c "COPY users TO STDOUT WITH BINARY" | pg2scidb convert -s '<id:int64, name:string>' > users.scidb
//!
//! # Print the matching load() format string
//! pg2scidb format -s '<id:int64 NOT NULL, name:string>'
//!
//! # Look at an unfamiliar dump
//! pg2scidb inspect -i users.pgcopy
//! ```

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::*;
use pg2scidb::config::ConfigBuilder;
use pg2scidb::error::exit_code;
use pg2scidb::prelude::*;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "pg2scidb")]
#[command(version)]
#[command(about = "Convert PostgreSQL binary COPY dumps to SciDB binary load format")]
#[command(long_about = None)]
#[command(after_help = "EXAMPLES:
    pg2scidb convert -i t.pgcopy -o t.scidb -s '<a:int32 NOT NULL, b:string>'
    pg2scidb format -f schema.toml
    pg2scidb inspect -i t.pgcopy --format json")]
struct Cli {
    /// Config file (defaults to <config dir>/pg2scidb/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a dump
    Convert {
        /// Input dump, `-` for stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file, `-` for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        schema: SchemaArgs,

        #[command(flatten)]
        read: ReadArgs,

        /// How to print the run statistics
        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
    /// Print the SciDB load format string for a schema
    Format {
        #[command(flatten)]
        schema: SchemaArgs,
    },
    /// Summarize a dump without a schema
    Inspect {
        /// Input dump, `-` for stdin
        #[arg(short, long)]
        input: Option<PathBuf>,

        #[command(flatten)]
        read: ReadArgs,

        #[arg(long, value_enum, default_value = "table")]
        format: OutputFormat,
    },
}

#[derive(Args)]
struct SchemaArgs {
    /// Schema string, e.g. '<id:int64 NOT NULL, name:string>'
    #[arg(short, long, env = "PG2SCIDB_SCHEMA")]
    schema: Option<String>,

    /// TOML schema file, takes precedence over --schema
    #[arg(short = 'f', long)]
    schema_file: Option<PathBuf>,
}

#[derive(Args)]
struct ReadArgs {
    /// Read-ahead buffer size in bytes
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Largest accepted field, in bytes
    #[arg(long)]
    max_field_len: Option<usize>,

    /// Read the input without the read-ahead buffer
    #[arg(long)]
    unbuffered: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        let code = e
            .downcast_ref::<ConvertError>()
            .map(|err| exit_code(err.kind()))
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("pg2scidb=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pg2scidb=warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    match &cli.command {
        Commands::Convert {
            input,
            output,
            schema,
            read,
            format,
        } => {
            let config = apply(config, Some(schema), read)?;
            convert_dump(&config, input.as_deref(), output.as_deref(), *format, cli.verbose)
        }
        Commands::Format { schema } => {
            let config = apply(config, Some(schema), &ReadArgs::none())?;
            let schema = require_schema(&config)?;
            println!("{}", schema.load_format());
            Ok(())
        }
        Commands::Inspect {
            input,
            read,
            format,
        } => {
            let config = apply(config, None, read)?;
            inspect_dump(&config, input.as_deref(), *format)
        }
    }
}

impl ReadArgs {
    fn none() -> Self {
        Self {
            buffer_size: None,
            max_field_len: None,
            unbuffered: false,
        }
    }
}

/// Layer command-line flags over the file configuration.
fn apply(config: Config, schema: Option<&SchemaArgs>, read: &ReadArgs) -> Result<Config> {
    let mut builder = ConfigBuilder::from_config(config);
    if let Some(bytes) = read.buffer_size {
        builder = builder.buffer_size(bytes);
    }
    if let Some(bytes) = read.max_field_len {
        builder = builder.max_field_len(bytes);
    }
    if read.unbuffered {
        builder = builder.unbuffered(true);
    }
    if let Some(args) = schema {
        if let Some(path) = &args.schema_file {
            builder = builder.schema_file(path.clone());
        } else if let Some(text) = &args.schema {
            builder = builder.schema(text.clone());
        }
    }
    Ok(builder.build()?)
}

fn require_schema(config: &Config) -> Result<Schema> {
    match config.resolve_schema()? {
        Some(schema) => Ok(schema),
        None => bail!("no schema given; use --schema, --schema-file or PG2SCIDB_SCHEMA"),
    }
}

fn is_stdio(path: Option<&Path>) -> bool {
    path.is_none_or(|p| p == Path::new("-"))
}

fn open_input(path: Option<&Path>) -> Result<Box<dyn Read>> {
    match path {
        Some(p) if !is_stdio(Some(p)) => {
            let file = File::open(p).with_context(|| format!("cannot open {}", p.display()))?;
            Ok(Box::new(file))
        }
        _ => Ok(Box::new(io::stdin().lock())),
    }
}

fn convert_dump(
    config: &Config,
    input: Option<&Path>,
    output: Option<&Path>,
    format: OutputFormat,
    verbose: bool,
) -> Result<()> {
    let schema = require_schema(config)?;
    let reader = open_input(input)?;

    if verbose {
        eprintln!("{} {}", "Schema:".dimmed(), schema.to_string().yellow());
    }

    let (writer, target): (Box<dyn Write>, Option<&Path>) = match output {
        Some(p) if !is_stdio(Some(p)) => {
            let file = File::create(p).with_context(|| format!("cannot create {}", p.display()))?;
            (Box::new(file), Some(p))
        }
        _ => (Box::new(io::stdout().lock()), None),
    };

    let converter = Converter::new(config.convert_options());
    let stats = match converter.convert(reader, writer, &schema) {
        Ok(stats) => stats,
        Err(e) => {
            if let Some(path) = target {
                if let Err(rm) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %rm, "could not remove partial output");
                }
            }
            return Err(e.into());
        }
    };

    // stdout may be carrying the data
    let mut report: Box<dyn Write> = match target {
        Some(_) => Box::new(io::stdout()),
        None => Box::new(io::stderr()),
    };
    match format {
        OutputFormat::Json => writeln!(report, "{}", serde_json::to_string_pretty(&stats)?)?,
        OutputFormat::Table => {
            writeln!(
                report,
                "{} {} rows, {} fields ({} null)",
                "✓".green().bold(),
                stats.rows,
                stats.fields,
                stats.nulls
            )?;
            writeln!(
                report,
                "  {} bytes read, {} bytes written",
                stats.bytes_read, stats.bytes_written
            )?;
            writeln!(report, "  load format: {}", schema.load_format().cyan())?;
        }
    }
    Ok(())
}

fn inspect_dump(config: &Config, input: Option<&Path>, format: OutputFormat) -> Result<()> {
    let reader = open_input(input)?;
    let summary = inspect(reader, &config.convert_options())?;

    if let OutputFormat::Json = format {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("{}", "COPY BINARY dump".cyan().bold());
    println!("  flags:         {:#010x}", summary.flags);
    println!("  oids:          {}", summary.has_oids);
    println!("  extension:     {} bytes", summary.extension_len);
    println!("  rows:          {}", summary.rows);
    println!("  bytes:         {}", summary.bytes_read);
    if !summary.trailer {
        println!("  {}", "no trailer".yellow());
    }
    match summary.field_count {
        None => println!("  {}", "no rows".dimmed()),
        Some(n) => {
            println!("  fields/row:    {}", n);
            println!();
            println!("  {:>4}  {:>10}  {:>10}  {:>10}", "col", "nulls", "min len", "max len");
            for (i, col) in summary.columns.iter().enumerate() {
                let len = |v: Option<usize>| v.map_or("-".to_string(), |n| n.to_string());
                let line = format!(
                    "  {:>4}  {:>10}  {:>10}  {:>10}",
                    i,
                    col.nulls,
                    len(col.min_len),
                    len(col.max_len)
                );
                if col.is_fixed_width() {
                    println!("{}", line);
                } else {
                    println!("{}", line.dimmed());
                }
            }
        }
    }
    Ok(())
}
