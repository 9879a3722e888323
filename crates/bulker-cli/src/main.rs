//! bulker CLI - load NDJSON files into SQL and HTTP destinations.

use bulker::staging::{BatchFile, FileStorage, ObjectStoreStorage};
use bulker::{
    create_bulker, infer_schema, BulkMode, BulkerError, BulkerStream, Config, Object, State,
    StreamOptions,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[cfg(unix)]
use tokio::signal::unix::{signal, SignalKind};

#[derive(Parser)]
#[command(name = "bulker")]
#[command(about = "Bulk-load JSON objects into SQL and HTTP destinations")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "bulker.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Infer the table schema of an NDJSON file
    Infer {
        /// NDJSON file, or - for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Table name used in the output
        #[arg(long, default_value = "events")]
        table: String,
    },

    /// Load an NDJSON file into a destination
    Load {
        /// Destination name from the configuration file
        #[arg(short, long)]
        destination: String,

        /// Target table
        #[arg(short, long)]
        table: String,

        /// Bulk mode: stream, batch, replace-table, replace-partition
        #[arg(short, long, default_value = "batch")]
        mode: BulkMode,

        /// NDJSON file, or - for stdin
        #[arg(short, long)]
        input: PathBuf,

        /// Primary key column (repeatable)
        #[arg(long = "primary-key")]
        primary_keys: Vec<String>,

        /// Deduplicate rows by primary key
        #[arg(long = "merge")]
        merge_rows: bool,

        /// Partition replaced in replace-partition mode
        #[arg(long)]
        partition_id: Option<String>,

        /// Rows per staged chunk (default: from configuration)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Stream id (default: random)
        #[arg(long)]
        stream_id: Option<String>,
    },

    /// Validate the configuration file
    CheckConfig,
}

#[derive(Serialize)]
struct InferOutput {
    table: String,
    fields: BTreeMap<String, String>,
    diagnostics: Vec<String>,
}

#[derive(Serialize)]
struct LoadOutput {
    stream_id: String,
    destination: String,
    table: String,
    mode: BulkMode,
    #[serde(flatten)]
    state: State,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<String>,
}

#[derive(Serialize)]
struct ConfigOutput {
    destinations: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    staging: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run() -> Result<(), BulkerError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| BulkerError::Config(e.to_string()))?;

    match cli.command {
        Commands::Infer { input, table } => {
            let objects = read_objects(&input)?;
            let inferred = infer_schema(&table, &objects);
            let output = InferOutput {
                table: inferred.header.table_name.clone(),
                fields: inferred
                    .header
                    .fields
                    .iter()
                    .map(|(name, field)| (name.clone(), field.resolved_type().to_string()))
                    .collect(),
                diagnostics: inferred.diagnostics.iter().map(|d| d.to_string()).collect(),
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Table: {} ({} objects)", output.table, objects.len());
                for (name, data_type) in &output.fields {
                    println!("  {}: {}", name, data_type);
                }
                for diagnostic in &output.diagnostics {
                    println!("  warning: {}", diagnostic);
                }
            }
        }

        Commands::Load {
            destination,
            table,
            mode,
            input,
            primary_keys,
            merge_rows,
            partition_id,
            batch_size,
            stream_id,
        } => {
            let config = Config::load(&cli.config)?;
            info!("Loaded configuration from {:?}", cli.config);
            let objects = read_objects(&input)?;
            let cancel_token = setup_signal_handler().await?;

            let mut options = StreamOptions::new()
                .with_primary_keys(primary_keys)
                .with_merge_rows(merge_rows)
                .with_batch_size(batch_size.unwrap_or(config.defaults.batch_size))
                .with_cancel(cancel_token.clone());
            if let Some(partition_id) = partition_id {
                options = options.with_partition_id(partition_id);
            }
            let stream_id = stream_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

            let bulker = create_bulker(&destination, config.destination(&destination)?).await?;
            let stream = bulker.create_stream(&stream_id, &table, mode, options).await?;
            let result = load(stream, &objects, &cancel_token).await;
            bulker.close().await?;
            let state = result?;

            let archived = match &config.staging {
                Some(staging) if state.successful_rows > 0 => {
                    let storage = ObjectStoreStorage::from_config(staging)?;
                    Some(archive(&storage, &destination, &table, &stream_id, &objects).await?)
                }
                _ => None,
            };

            let output = LoadOutput {
                stream_id,
                destination,
                table,
                mode,
                state,
                archive: archived,
            };
            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("\nLoad completed!");
                println!("  Stream: {}", output.stream_id);
                println!("  Destination: {} ({})", output.destination, output.mode);
                println!("  Table: {}", output.table);
                println!(
                    "  Rows: {}/{}",
                    output.state.successful_rows, output.state.processed_rows
                );
                for warning in &output.state.warnings {
                    println!("  Warning: {}", warning);
                }
                if let Some(ref err) = output.state.last_error {
                    println!("  Last error: {}", err);
                }
                if let Some(ref archive) = output.archive {
                    println!("  Archived to: {}", archive);
                }
            }
        }

        Commands::CheckConfig => {
            let config = Config::load(&cli.config)?;
            let output = ConfigOutput {
                destinations: config
                    .destinations
                    .iter()
                    .map(|(name, d)| (name.clone(), d.type_id().to_string()))
                    .collect(),
                staging: config.staging.as_ref().map(|s| s.type_id().to_string()),
            };

            if cli.output_json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                println!("Configuration OK: {:?}", cli.config);
                for (name, type_id) in &output.destinations {
                    println!("  {} ({})", name, type_id);
                }
                if let Some(ref staging) = output.staging {
                    println!("  staging: {}", staging);
                }
            }
        }
    }

    Ok(())
}

/// Feed every object to the stream and complete it. Stream mode keeps
/// going after a failed object; the other modes abort on the first error.
async fn load(
    mut stream: Box<dyn BulkerStream>,
    objects: &[Object],
    cancel: &CancellationToken,
) -> Result<State, BulkerError> {
    for object in objects {
        if cancel.is_cancelled() {
            let _ = stream.abort().await;
            return Err(BulkerError::Cancelled);
        }
        if let Err(e) = stream.consume(object.clone()).await {
            if stream.mode() == BulkMode::Stream && !matches!(e, BulkerError::Cancelled) {
                warn!("Skipping object: {}", e);
                continue;
            }
            if let Err(abort) = stream.abort().await {
                warn!("Abort after failure: {}", abort);
            }
            return Err(e);
        }
    }
    stream.complete().await
}

/// Upload the loaded objects as gzip NDJSON to
/// `<destination>/<table>/<stream id>.ndjson.gz`.
async fn archive(
    storage: &dyn FileStorage,
    destination: &str,
    table: &str,
    stream_id: &str,
    objects: &[Object],
) -> Result<String, BulkerError> {
    let mut file = BatchFile::ndjson_gzip();
    for object in objects {
        file.write(object)?;
    }
    let name = file.file_name(&format!("{}/{}/{}", destination, table, stream_id));
    storage.upload(&name, file.finish()?).await?;
    info!("Archived {} objects to {} staging as {}", objects.len(), storage.type_id(), name);
    Ok(name)
}

/// Read NDJSON objects from a file, or stdin for `-`. Blank lines are skipped.
fn read_objects(path: &Path) -> Result<Vec<Object>, BulkerError> {
    let reader: Box<dyn Read> = if path.as_os_str() == "-" {
        Box::new(std::io::stdin())
    } else {
        Box::new(std::fs::File::open(path)?)
    };

    let mut objects = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line)? {
            serde_json::Value::Object(object) => objects.push(object),
            _ => {
                return Err(BulkerError::Validation(format!(
                    "line {}: expected a JSON object",
                    n + 1
                )))
            }
        }
    }
    Ok(objects)
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => "debug",
        "info" => "info",
        "warn" => "warn",
        "error" => "error",
        _ => "info",
    };

    // RUST_LOG wins over --verbosity.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Setup signal handlers for graceful shutdown.
/// Handles both SIGINT (Ctrl-C) and SIGTERM.
/// Returns a CancellationToken that will be cancelled when a signal is received.
#[cfg(unix)]
async fn setup_signal_handler() -> Result<CancellationToken, BulkerError> {
    let cancel_token = CancellationToken::new();
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    let token = cancel_token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => eprintln!("\nReceived SIGINT. Cancelling load..."),
            _ = sigterm.recv() => eprintln!("\nReceived SIGTERM. Cancelling load..."),
        }
        token.cancel();
    });

    Ok(cancel_token)
}

/// Setup signal handler for Windows (only Ctrl-C)
#[cfg(not(unix))]
async fn setup_signal_handler() -> Result<CancellationToken, BulkerError> {
    let cancel_token = CancellationToken::new();
    let token = cancel_token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nReceived Ctrl-C. Cancelling load...");
            token.cancel();
        }
    });

    Ok(cancel_token)
}
