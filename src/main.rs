/*!
 * Conveyor CLI
 *
 * Thin front end over the transfer engine for one S3 bucket. Exit codes:
 * 0 on success, 1 when some items of a batch failed or an object was
 * missing, 2 on fatal errors.
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use conveyor::{
    config::{S3Config, TransferConfig},
    error::{EXIT_FATAL, EXIT_PARTIAL, EXIT_SUCCESS},
    logging::{self, LogLevel, LogSettings},
    BatchResult, DeleteOutcome, PresignMethod, S3Store, TransferContext, TransferError,
    TransferOrchestrator,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "conveyor")]
#[command(version, about = "Resilient uploads, downloads and bulk operations for S3-compatible storage", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML file with transfer settings and an optional [s3] table
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Bucket name (overrides the config file)
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Custom endpoint for S3-compatible services (enables path-style addressing)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    /// Log retries and skipped items at WARN and enable debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log level when not verbose (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Write JSON logs to this file instead of stdout
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a file, or every file below a directory, to a key or prefix
    Upload {
        path: PathBuf,
        key: String,
    },

    /// Download an object, or every object below a prefix ending in '/'
    Download {
        key: String,
        path: PathBuf,
    },

    /// List keys under a prefix
    Ls {
        #[arg(default_value = "")]
        prefix: String,

        /// List folder-like prefixes instead of objects
        #[arg(long)]
        folders: bool,
    },

    /// Delete one or more objects
    Rm {
        #[arg(required = true)]
        keys: Vec<String>,

        /// Treat each argument as a prefix and delete everything under it
        #[arg(short, long)]
        recursive: bool,
    },

    /// Move (copy, then delete) an object
    Mv {
        source: String,
        destination: String,
    },

    /// Print a pre-signed URL
    Presign {
        key: String,

        /// Validity in seconds (clamped to 1..=604800)
        #[arg(long, default_value = "3600")]
        expires_secs: u64,

        /// Sign an upload instead of a download
        #[arg(long)]
        put: bool,
    },
}

/// Shape of the `--config` file
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(flatten)]
    transfer: TransferConfig,

    #[serde(default)]
    s3: Option<S3Config>,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<TransferError>()
                .map(TransferError::exit_code)
                .unwrap_or(EXIT_FATAL)
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let settings = LogSettings {
        level: cli.log_level,
        log_file: cli.log.clone(),
        verbose: cli.verbose,
    };
    if let Err(e) = logging::init_logging(&settings) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    let file = match &cli.config {
        Some(path) => load_config(path)?,
        None => ConfigFile::default(),
    };
    let mut transfer = file.transfer;
    transfer.verbose_logging |= cli.verbose;
    let s3 = s3_config(file.s3, &cli)?;

    let store = S3Store::new(&s3)
        .await
        .context("Failed to create S3 client")?;
    let ctx = TransferContext::builder(Arc::new(store))
        .config(transfer)
        .build();
    let engine = TransferOrchestrator::new(ctx);

    execute(&engine, cli.command, cli.json).await
}

fn load_config(path: &Path) -> anyhow::Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file: ConfigFile = toml::from_str(&contents).map_err(TransferError::from)?;
    Ok(file)
}

/// Flags override the `[s3]` table
fn s3_config(from_file: Option<S3Config>, cli: &Cli) -> anyhow::Result<S3Config> {
    let mut config = from_file.unwrap_or_default();
    if let Some(bucket) = &cli.bucket {
        config.bucket = bucket.clone();
    }
    if let Some(region) = &cli.region {
        config.region = Some(region.clone());
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = Some(endpoint.clone());
        config.force_path_style = true;
    }
    if config.bucket.is_empty() {
        anyhow::bail!(TransferError::Config(
            "No bucket given; pass --bucket or set bucket in the [s3] table".to_string()
        ));
    }
    Ok(config)
}

async fn execute(
    engine: &TransferOrchestrator,
    command: Commands,
    json: bool,
) -> anyhow::Result<i32> {
    match command {
        Commands::Upload { path, key } => {
            if tokio::fs::metadata(&path)
                .await
                .with_context(|| format!("Cannot read {}", path.display()))?
                .is_dir()
            {
                let result = engine.upload_folder(&path, &key).await?;
                report_batch(&result, json)
            } else {
                let receipt = engine.upload_file(&path, &key).await?;
                emit(&receipt, json, || {
                    format!("Uploaded {} ({} bytes) to {}", path.display(), receipt.bytes, receipt.key)
                })
            }
        }

        Commands::Download { key, path } => {
            if key.ends_with('/') {
                let result = engine.download_folder(&key, &path).await?;
                report_batch(&result, json)
            } else {
                let receipt = engine.download_file(&key, &path).await?;
                emit(&receipt, json, || {
                    format!("Downloaded {} ({} bytes) to {}", key, receipt.bytes, path.display())
                })
            }
        }

        Commands::Ls { prefix, folders } => {
            let keys = if folders {
                engine.list_folders(&prefix).await?
            } else {
                engine.list_files(&prefix).await?
            };
            emit(&keys, json, || keys.join("\n"))
        }

        Commands::Rm { keys, recursive } => {
            if recursive {
                let mut combined = BatchResult::default();
                for prefix in &keys {
                    let result = engine.delete_folder(prefix).await?;
                    combined.succeeded_paths.extend(result.succeeded_paths);
                    combined.failed_items.extend(result.failed_items);
                }
                report_batch(&combined, json)
            } else if let [key] = keys.as_slice() {
                let outcome = engine.delete_file(key).await?;
                emit(&outcome, json, || match outcome {
                    DeleteOutcome::Deleted => format!("Deleted {}", key),
                    DeleteOutcome::NotFound => format!("Not found: {}", key),
                })?;
                Ok(match outcome {
                    DeleteOutcome::Deleted => EXIT_SUCCESS,
                    DeleteOutcome::NotFound => EXIT_PARTIAL,
                })
            } else {
                let result = engine.delete_files(&keys).await;
                report_batch(&result, json)
            }
        }

        Commands::Mv {
            source,
            destination,
        } => {
            let outcome = engine.move_file(&source, &destination).await?;
            emit(&outcome, json, || {
                if outcome.original_deleted {
                    format!("Moved {} to {}", source, destination)
                } else {
                    format!(
                        "Copied {} to {}; the original could not be deleted",
                        source, destination
                    )
                }
            })?;
            Ok(if outcome.original_deleted {
                EXIT_SUCCESS
            } else {
                EXIT_PARTIAL
            })
        }

        Commands::Presign {
            key,
            expires_secs,
            put,
        } => {
            let method = if put {
                PresignMethod::Put
            } else {
                PresignMethod::Get
            };
            let url = engine
                .presigned_url(&key, method, Duration::from_secs(expires_secs))
                .await?;
            emit(&url, json, || url.clone())
        }
    }
}

/// Print `value` as JSON or as the text `describe` produces
fn emit<T: Serialize>(value: &T, json: bool, describe: impl FnOnce() -> String) -> anyhow::Result<i32> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", describe());
    }
    Ok(EXIT_SUCCESS)
}

fn report_batch(result: &BatchResult, json: bool) -> anyhow::Result<i32> {
    if json {
        println!("{}", result.to_json()?);
    } else {
        for path in &result.succeeded_paths {
            println!("ok      {}", path);
        }
        for item in &result.failed_items {
            println!("failed  {}: {}", item.identifier, item.cause);
        }
        println!("{}", result.message());
    }
    Ok(result.exit_code())
}
