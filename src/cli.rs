use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Import spreadsheet exports into a typed table, creating missing fields",
    long_about = None
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import a CSV/TSV file into a table snapshot, creating fields as needed
    Import(ImportArgs),
    /// Infer the field kind of every column without importing anything
    Infer(InferArgs),
    /// List the fields of a table snapshot
    Fields(FieldsArgs),
}

#[derive(Debug, Args)]
pub struct SourceArgs {
    /// Input CSV/TSV file ('-' reads stdin)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// Delimiter character (supports ',', 'tab', ';', '|'); inferred from the extension otherwise
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
    /// YAML file with import options
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct ImportArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Table snapshot (JSON) to import into; created when missing
    #[arg(short, long)]
    pub table: PathBuf,
    /// Table id, required when the snapshot does not exist yet
    #[arg(long = "table-id")]
    pub table_id: Option<String>,
    /// Leave this column out of the import
    #[arg(long = "skip", action = clap::ArgAction::Append)]
    pub skip: Vec<String>,
    /// Map a column to an existing field: `column=field`
    #[arg(long = "map", value_parser = parse_assignment, action = clap::ArgAction::Append)]
    pub map: Vec<(String, String)>,
    /// Always create a new field for this column
    #[arg(long = "create", action = clap::ArgAction::Append)]
    pub create: Vec<String>,
    /// Kind for a new field instead of the inferred one: `column=kind`
    #[arg(long = "kind", value_parser = parse_assignment, action = clap::ArgAction::Append)]
    pub kinds: Vec<(String, String)>,
    /// Target table for a new link field: `column=table_id`
    #[arg(long = "link", value_parser = parse_assignment, action = clap::ArgAction::Append)]
    pub links: Vec<(String, String)>,
    /// Rows per insert batch (overrides the config file)
    #[arg(long = "batch-size")]
    pub batch_size: Option<usize>,
    /// Also skip rows whose key repeats an earlier row of the same file
    #[arg(long = "skip-in-file-duplicates")]
    pub skip_in_file_duplicates: bool,
    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct InferArgs {
    #[command(flatten)]
    pub source: SourceArgs,
    /// Values sampled per column (overrides the config file)
    #[arg(long = "sample-size")]
    pub sample_size: Option<usize>,
}

#[derive(Debug, Args)]
pub struct FieldsArgs {
    /// Table snapshot (JSON) to describe
    #[arg(short, long)]
    pub table: PathBuf,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

/// Parses `name=value`; the column name may itself contain spaces.
pub fn parse_assignment(value: &str) -> Result<(String, String), String> {
    let (name, assigned) = value
        .rsplit_once('=')
        .ok_or_else(|| format!("Expected 'column=value' but got '{value}'"))?;
    let (name, assigned) = (name.trim(), assigned.trim());
    if name.is_empty() || assigned.is_empty() {
        return Err(format!("Both sides of '{value}' must be non-empty"));
    }
    Ok((name.to_string(), assigned.to_string()))
}
