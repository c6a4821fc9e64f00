pub mod choices;
pub mod cli;
pub mod config;
pub mod context;
pub mod dates;
pub mod dedupe;
pub mod error;
pub mod infer;
pub mod io_utils;
pub mod memory;
pub mod parser;
pub mod pipeline;
pub mod reconcile;
pub mod report;
pub mod retry;
pub mod schema;
pub mod service;
pub mod table;
pub mod value;
pub mod writer;

use std::{
    env,
    path::Path,
    process::ExitCode,
    sync::{Arc, OnceLock},
};

use anyhow::{Context, Result, anyhow, ensure};
use clap::Parser;
use log::{LevelFilter, debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    cli::{Cli, Commands},
    config::ImportOptions,
    infer::infer_column,
    memory::{InMemoryTable, TableSnapshot},
    parser::ParsedTable,
    pipeline::{ImportEngine, ImportOutcome, ImportRequest},
    reconcile::ColumnDirectives,
    schema::{FieldKind, FieldOptions},
    table::TextTable,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("sheet_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub const CANCELLED_EXIT_CODE: u8 = 130;

pub fn run() -> Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Infer(args) => handle_infer(&args).map(|_| ExitCode::SUCCESS),
        Commands::Fields(args) => handle_fields(&args).map(|_| ExitCode::SUCCESS),
    }
}

fn handle_import(args: &cli::ImportArgs) -> Result<ExitCode> {
    let mut options = load_options(args.source.config.as_deref())?;
    if let Some(batch_size) = args.batch_size {
        options.batch_size = batch_size;
    }
    if args.skip_in_file_duplicates {
        options.skip_in_file_duplicates = true;
    }
    options.ensure_valid()?;

    let parsed = read_source(&args.source)?;
    let snapshot = if args.table.exists() {
        let snapshot = TableSnapshot::load(&args.table)?;
        if let Some(table_id) = &args.table_id {
            ensure!(
                *table_id == snapshot.table_id,
                "--table-id '{table_id}' does not match table '{}' stored in {:?}",
                snapshot.table_id,
                args.table
            );
        }
        snapshot
    } else {
        let table_id = args.table_id.clone().ok_or_else(|| {
            anyhow!(
                "Table snapshot {:?} does not exist; pass --table-id to create it",
                args.table
            )
        })?;
        info!("Creating new table snapshot '{table_id}' at {:?}", args.table);
        TableSnapshot {
            table_id,
            ..TableSnapshot::default()
        }
    };
    let table_id = snapshot.table_id.clone();
    let directives = build_directives(args)?;
    debug!("Column directives: {directives:?}");

    let backend = Arc::new(InMemoryTable::from_snapshot(snapshot));
    let engine = ImportEngine::new(backend.clone(), backend.clone(), options);
    let request = ImportRequest::new(table_id, parsed).with_directives(directives);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Starting async runtime")?;
    let cancel = CancellationToken::new();
    let result = runtime.block_on(async {
        let watcher = cancel.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; stopping before the next batch");
                watcher.cancel();
            }
        });
        let result = engine.run(&request, &cancel).await;
        interrupt.abort();
        result
    });

    // Created fields and committed batches are durable even when the run
    // failed part way.
    backend
        .snapshot()
        .save(&args.table)
        .with_context(|| format!("Saving table snapshot {:?}", args.table))?;

    let outcome = result?;
    if args.json {
        let rendered =
            serde_json::to_string_pretty(outcome.summary()).context("Serializing summary")?;
        println!("{rendered}");
    } else {
        print!("{}", outcome.summary().render());
    }
    if let ImportOutcome::Cancelled(summary) = &outcome {
        eprintln!(
            "import cancelled: {} row(s) imported, {} not attempted",
            summary.imported_rows,
            summary.pending_rows()
        );
        return Ok(ExitCode::from(CANCELLED_EXIT_CODE));
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    let options = load_options(args.source.config.as_deref())?;
    let sample_size = args.sample_size.unwrap_or(options.sample_size);
    let parsed = read_source(&args.source)?;
    let settings = options.inference_settings();

    let mut table = TextTable::new(["column", "kind", "sampled", "distinct", "example"]);
    for column in parsed.columns() {
        let inference = infer_column(&column, sample_size, options.head_backfill, &settings);
        table.push_row([
            inference.name,
            inference.kind.to_string(),
            inference.sampled.to_string(),
            inference.distinct.to_string(),
            inference.example.unwrap_or_default(),
        ]);
    }
    info!(
        "Inferred {} column(s) from {} row(s)",
        parsed.column_count(),
        parsed.row_count()
    );
    table.print();
    Ok(())
}

fn handle_fields(args: &cli::FieldsArgs) -> Result<()> {
    let snapshot = TableSnapshot::load(&args.table)?;
    let mut table = TextTable::new(["field", "kind", "required", "options"]);
    for field in &snapshot.fields {
        let options = match &field.options {
            FieldOptions::None => String::new(),
            FieldOptions::Choices { choices } => choices.join(", "),
            FieldOptions::Link { linked_table_id } => format!("-> {linked_table_id}"),
        };
        let required = snapshot
            .required_fields
            .iter()
            .any(|name| name.eq_ignore_ascii_case(&field.name));
        table.push_row([
            field.name.clone(),
            field.kind.to_string(),
            if required { "yes" } else { "" }.to_string(),
            options,
        ]);
    }
    println!(
        "Table '{}': {} field(s), {} record(s)",
        snapshot.table_id,
        snapshot.fields.len(),
        snapshot.records.len()
    );
    table.print();
    Ok(())
}

fn load_options(path: Option<&Path>) -> Result<ImportOptions> {
    match path {
        Some(path) => ImportOptions::load(path),
        None => Ok(ImportOptions::default()),
    }
}

fn read_source(source: &cli::SourceArgs) -> Result<ParsedTable> {
    let encoding = io_utils::resolve_encoding(source.input_encoding.as_deref())?;
    let delimiter = io_utils::resolve_input_delimiter(&source.input, source.delimiter);
    info!(
        "Reading '{}' with delimiter '{}'",
        source.input.display(),
        printable_delimiter(delimiter)
    );
    parser::parse_path(&source.input, delimiter, encoding)
        .with_context(|| format!("Parsing {:?}", source.input))
}

fn build_directives(args: &cli::ImportArgs) -> Result<ColumnDirectives> {
    let mut directives = ColumnDirectives::new();
    for column in &args.skip {
        directives = directives.skip(column.as_str());
    }
    for (column, field) in &args.map {
        directives = directives.map_to(column.as_str(), field.as_str());
    }
    for column in &args.create {
        directives = directives.create(column.as_str());
    }
    for (column, kind) in &args.kinds {
        let kind: FieldKind = kind
            .parse()
            .with_context(|| format!("Parsing kind for column '{column}'"))?;
        directives = directives.kind(column.as_str(), kind);
    }
    for (column, table_id) in &args.links {
        directives = directives.link(column.as_str(), table_id.as_str());
    }
    Ok(directives)
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        other => (other as char).to_string(),
    }
}
