mod config;
mod logging;

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as AnyhowContext, Result};
use chrono::{DateTime, Utc};
use clap::{ArgAction, ArgGroup, Args, Parser, Subcommand};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use verso_patch::{merge_patch_with_warnings, PatchDocument, PatchFormat};
use verso_versioning::{
    api::headers::{parse_etag, VersionHeaders},
    services::{history::searchset_bundle, HistoryAssembler, HistoryRequest, VersionTracker},
    PostgresSnapshotStore, ResourceService, ResourceView,
};

use crate::config::Config;

#[derive(Parser)]
#[command(
    name = "verso",
    about = "Versioned JSON resources with optimistic concurrency and patching",
    version,
    arg_required_else_help = true
)]
struct Cli {
    /// Pretty-print JSON output.
    #[arg(long, global = true, action = ArgAction::SetTrue)]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending database migrations.
    Migrate,

    /// Create version 1 of a resource.
    Create {
        /// Resource type, e.g. Patient.
        kind: String,
        /// Resource JSON file (or "-" for stdin).
        file: PathBuf,
        /// Client-assigned id. A UUID is generated when omitted.
        #[arg(long)]
        id: Option<String>,
    },

    /// Read the current version of a resource.
    Show { kind: String, id: String },

    /// Read a specific version of a resource.
    Vread {
        kind: String,
        id: String,
        version: i32,
    },

    /// Replace a resource with a new body.
    Update {
        kind: String,
        id: String,
        /// Resource JSON file (or "-" for stdin).
        file: PathBuf,
        /// Expected current version, as a number or ETag (W/"3").
        #[arg(long, value_parser = parse_if_match)]
        if_match: Option<i32>,
    },

    /// Patch a resource with a JSON Patch or JSON Merge Patch document.
    Patch {
        kind: String,
        id: String,
        #[command(flatten)]
        patch: PatchSource,
        /// Expected current version, as a number or ETag (W/"3").
        #[arg(long, value_parser = parse_if_match)]
        if_match: Option<i32>,
    },

    /// Delete a resource. History stays readable.
    Delete {
        kind: String,
        id: String,
        /// Expected current version, as a number or ETag (W/"3").
        #[arg(long, value_parser = parse_if_match)]
        if_match: Option<i32>,
    },

    /// List the versions of a resource, newest first.
    History {
        kind: String,
        id: String,
        /// Page size.
        #[arg(long)]
        count: Option<i64>,
        /// Page token from a previous page.
        #[arg(long)]
        page: Option<String>,
        /// Only versions recorded at or after this RFC 3339 instant.
        #[arg(long, value_parser = parse_instant)]
        since: Option<DateTime<Utc>>,
        /// Print a history Bundle instead of a summary.
        #[arg(long, action = ArgAction::SetTrue)]
        bundle: bool,
        /// Base URL used for fullUrl and links in the Bundle.
        #[arg(long, default_value = "http://localhost")]
        base_url: String,
    },

    /// Print a searchset Bundle with the live resources among the given ids.
    Search {
        kind: String,
        #[arg(required = true)]
        ids: Vec<String>,
        /// Base URL used for fullUrl in the Bundle.
        #[arg(long, default_value = "http://localhost")]
        base_url: String,
    },

    /// Apply a patch to a local JSON file without touching the store.
    Apply {
        /// Target JSON file (or "-" for stdin).
        target: PathBuf,
        #[command(flatten)]
        patch: PatchSource,
    },
}

#[derive(Args)]
#[command(group(ArgGroup::new("patch_source").required(true).args(["json_patch", "merge_patch"])))]
struct PatchSource {
    /// JSON Patch (RFC 6902) document file.
    #[arg(long, value_name = "FILE")]
    json_patch: Option<PathBuf>,
    /// JSON Merge Patch (RFC 7396) document file.
    #[arg(long, value_name = "FILE")]
    merge_patch: Option<PathBuf>,
}

impl PatchSource {
    fn format_and_path(&self) -> Result<(PatchFormat, &Path)> {
        match (&self.json_patch, &self.merge_patch) {
            (Some(path), None) => Ok((PatchFormat::JsonPatch, path.as_path())),
            (None, Some(path)) => Ok((PatchFormat::MergePatch, path.as_path())),
            _ => anyhow::bail!("Pass exactly one of --json-patch or --merge-patch"),
        }
    }

    fn load(&self) -> Result<PatchDocument> {
        let (format, path) = self.format_and_path()?;
        let bytes = read_input(path)?;
        PatchDocument::parse(format, &bytes)
            .with_context(|| format!("Invalid {} document: {}", format, path.display()))
    }
}

fn parse_if_match(value: &str) -> Result<i32, String> {
    parse_etag(value).ok_or_else(|| format!("'{}' is not a version or ETag", value))
}

fn parse_instant(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|e| format!("'{}' is not an RFC 3339 instant: {}", value, e))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Offline command: no configuration or database needed.
    if let Commands::Apply { target, patch } = &cli.command {
        logging::init_simple_logging();
        return run_apply(target, patch, cli.pretty);
    }

    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {e}"))?;
    let _logging_guard =
        logging::init_logging(&config.logging).context("Failed to initialize logging")?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting verso");

    let store = connect(&config).await?;
    if matches!(cli.command, Commands::Migrate) {
        store.migrate().await?;
        tracing::info!("Migrations applied");
        return Ok(());
    }
    if config.database.auto_migrate {
        store.migrate().await?;
    }

    let service = build_service(store, &config);
    run_command(&service, cli.command, cli.pretty).await
}

async fn connect(config: &Config) -> Result<PostgresSnapshotStore> {
    let pool = PgPoolOptions::new()
        .min_connections(config.database.pool_min_size)
        .max_connections(config.database.pool_max_size)
        .acquire_timeout(Duration::from_secs(config.database.pool_timeout_seconds))
        .connect(&config.database.url)
        .await
        .context("Failed to connect to database")?;
    tracing::debug!(
        max_connections = config.database.pool_max_size,
        "Database pool ready"
    );
    Ok(PostgresSnapshotStore::new(pool))
}

fn build_service(
    store: PostgresSnapshotStore,
    config: &Config,
) -> ResourceService<PostgresSnapshotStore> {
    let mut tracker = VersionTracker::new(store.clone());
    if let Some(timeout) = config.versioning.store_timeout() {
        tracker = tracker.with_store_timeout(timeout);
    }
    let history = HistoryAssembler::new(store).with_limits(
        config.versioning.history_default_count,
        config.versioning.history_max_count,
    );

    ResourceService::from_parts(tracker, history)
        .with_patch_retry_attempts(config.versioning.patch_retry_attempts)
}

async fn run_command(
    service: &ResourceService<PostgresSnapshotStore>,
    command: Commands,
    pretty: bool,
) -> Result<()> {
    match command {
        Commands::Migrate | Commands::Apply { .. } => {
            anyhow::bail!("Command does not run against the store")
        }
        Commands::Create { kind, file, id } => {
            let body = read_json(&file)?;
            let view = service
                .create(&kind, id.as_deref(), body)
                .await
                .map_err(report)?;
            print_write(&view, pretty)
        }
        Commands::Show { kind, id } => {
            let view = service.read(&kind, &id).await.map_err(report)?;
            print_read(&view, pretty)
        }
        Commands::Vread { kind, id, version } => {
            let view = service.vread(&kind, &id, version).await.map_err(report)?;
            print_read(&view, pretty)
        }
        Commands::Update {
            kind,
            id,
            file,
            if_match,
        } => {
            let body = read_json(&file)?;
            let view = service
                .update(&kind, &id, if_match, body)
                .await
                .map_err(report)?;
            print_write(&view, pretty)
        }
        Commands::Patch {
            kind,
            id,
            patch,
            if_match,
        } => {
            let document = patch.load()?;
            let view = service
                .patch(&kind, &id, if_match, &document)
                .await
                .map_err(report)?;
            print_write(&view, pretty)
        }
        Commands::Delete { kind, id, if_match } => {
            let version = service.delete(&kind, &id, if_match).await.map_err(report)?;
            eprintln!("Deleted {}/{} at version {}", kind, id, version);
            Ok(())
        }
        Commands::History {
            kind,
            id,
            count,
            page,
            since,
            bundle,
            base_url,
        } => {
            let request = HistoryRequest {
                count,
                page_token: page,
                since,
            };
            let page = service.history(&kind, &id, &request).await.map_err(report)?;
            if bundle {
                return write_json_output(&page.to_bundle(&base_url), pretty);
            }

            for snapshot in &page.entries {
                println!(
                    "{}\t{}\t{}",
                    snapshot.version,
                    snapshot.action,
                    snapshot.recorded_at.to_rfc3339()
                );
            }
            eprintln!("{} of {} versions", page.entries.len(), page.total);
            if let Some(token) = &page.next_page_token {
                eprintln!("Next page: --page {}", token);
            }
            Ok(())
        }
        Commands::Search {
            kind,
            ids,
            base_url,
        } => {
            let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
            let views = service.search(&kind, &ids).await.map_err(report)?;
            write_json_output(&searchset_bundle(&base_url, &views), pretty)
        }
    }
}

fn run_apply(target: &Path, patch: &PatchSource, pretty: bool) -> Result<()> {
    let target = read_json(target)?;

    let patched = match patch.format_and_path()? {
        (PatchFormat::MergePatch, path) => {
            let document = read_json(path)?;
            let outcome = merge_patch_with_warnings(&target, &document);
            for warning in &outcome.warnings {
                tracing::warn!("{}", warning);
            }
            outcome.value
        }
        (PatchFormat::JsonPatch, _) => patch.load()?.apply(&target)?,
    };

    write_json_output(&patched, pretty)
}

/// Attach the HTTP status a server would answer with.
fn report(error: verso_versioning::Error) -> anyhow::Error {
    let status = error.status();
    anyhow::Error::new(error).context(format!("Request failed with {}", status))
}

fn print_read(view: &ResourceView, pretty: bool) -> Result<()> {
    print_headers(&VersionHeaders::for_read(view));
    write_json_output(&view.body, pretty)
}

fn print_write(view: &ResourceView, pretty: bool) -> Result<()> {
    print_headers(&VersionHeaders::for_write(view));
    write_json_output(&view.body, pretty)
}

fn print_headers(headers: &VersionHeaders) {
    if let Some(location) = &headers.location {
        eprintln!("Location: {}", location);
    }
    if let Some(etag) = &headers.etag {
        eprintln!("ETag: {}", etag);
    }
    if let Some(last_modified) = &headers.last_modified {
        eprintln!("Last-Modified: {}", last_modified);
    }
}

fn read_input(path: &Path) -> Result<Vec<u8>> {
    if path.to_string_lossy() == "-" {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .context("Failed to read from stdin")?;
        return Ok(buf);
    }
    fs::read(path).with_context(|| format!("Failed to read file '{}'", path.display()))
}

fn read_json(path: &Path) -> Result<Value> {
    let bytes = read_input(path)?;
    serde_json::from_slice(&bytes)
        .with_context(|| format!("Input is not valid JSON: {}", path.display()))
}

fn write_json_output(value: &Value, pretty: bool) -> Result<()> {
    if pretty {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", serde_json::to_string(value)?);
    }
    Ok(())
}
