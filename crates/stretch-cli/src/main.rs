//! 🚀 stretch-cli: the front door, the bouncer, the maitre d' of stretch.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 Thin wrapper: loads config, sets up logging, parses a subcommand, and lets
//! the library do the heavy lifting. Like a manager. 🦆

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stretch::app_config::{AppConfig, load_config};
use stretch::bulk::{BulkDocument, BulkIndexer, BulkSender, InMemorySender, Payload, TransportBulkSender};
use stretch::cluster;
use stretch::search::{Query, Search};
use stretch::transport::{HttpTransport, Transport};

mod progress;

use progress::{LoadProgress, summary_table};

/// 🧘 stretch: bulk-load NDJSON into a search cluster, and poke at it afterwards.
#[derive(Debug, Parser)]
#[command(name = "stretch", version)]
struct Cli {
    /// 🔧 TOML config. Ignored if it doesn't exist; `STRETCH_*` env vars still apply.
    #[arg(short, long, default_value = "stretch.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// 📥 Bulk index an NDJSON file, one document per line.
    Load {
        file: PathBuf,
        #[arg(long)]
        index: String,
        #[arg(long = "type", default_value = "_doc")]
        doc_type: String,
        /// Take each document's id from this top-level field. Line numbers otherwise.
        #[arg(long)]
        id_field: Option<String>,
        /// Run the whole pipeline but keep the batches in memory instead of sending them.
        #[arg(long)]
        dry_run: bool,
    },
    /// 🩺 Cluster health, optionally scoped to some indices.
    Health { indices: Vec<String> },
    /// 🔎 Query-string search against one index.
    Search {
        index: String,
        query: String,
        #[arg(long, default_value_t = 10)]
        size: u64,
    },
}

/// 🚀 main(): where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let config_file = cli
        .config
        .try_exists()
        .with_context(|| {
            format!(
                "💀 Couldn't even check whether the config file exists. Permissions? \
                 Was checking here: '{}'",
                cli.config.display()
            )
        })?
        .then_some(cli.config.as_path());

    let app_config = load_config(config_file).context(
        "💀 In stretch-cli, main, we couldn't load the config. Take a look at the file and the \
         STRETCH_* env vars, make sure nothing obvious is missing",
    )?;

    // 🚀 SEND IT. No take-backs.
    if let Err(err) = run(cli.command, app_config).await {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("onnection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like the cluster isn't reachable. Check `connection.url` \
                 (or STRETCH_CONNECTION__URL) and that the service is actually running. \
                 If you're using Docker, `docker ps` is a good first step. ☕"
            );
        }

        // 🗑️ Exit with prejudice.
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Command, app_config: AppConfig) -> Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(
        HttpTransport::new(app_config.connection.clone())
            .context("💀 Failed to build the HTTP transport")?,
    );

    match command {
        Command::Load {
            file,
            index,
            doc_type,
            id_field,
            dry_run,
        } => {
            let options = LoadOptions {
                index,
                doc_type,
                id_field,
            };
            load(&file, &options, dry_run, transport, app_config).await
        }
        Command::Health { indices } => health(transport.as_ref(), &indices).await,
        Command::Search { index, query, size } => {
            search(transport.as_ref(), index, query, size).await
        }
    }
}

#[derive(Debug)]
struct LoadOptions {
    index: String,
    doc_type: String,
    id_field: Option<String>,
}

/// 🏷️ Turn one NDJSON line into a bulk document. Ids come from `id_field` when set.
fn document_for(line: &str, line_number: u64, options: &LoadOptions) -> Result<BulkDocument> {
    let Some(field) = options.id_field.as_deref() else {
        return Ok(BulkDocument::new(
            &options.index,
            &options.doc_type,
            line_number.to_string(),
            line,
        ));
    };

    let value: Value = serde_json::from_str(line)
        .with_context(|| format!("💀 line {line_number} is not valid JSON"))?;
    let id = match value.get(field) {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        Some(other) => anyhow::bail!(
            "💀 line {line_number}: id field '{field}' must be a string or number, got {other}"
        ),
        None => anyhow::bail!("💀 line {line_number}: id field '{field}' is missing"),
    };
    Ok(BulkDocument::new(
        &options.index,
        &options.doc_type,
        id,
        Payload::Json(value),
    ))
}

async fn load(
    file: &Path,
    options: &LoadOptions,
    dry_run: bool,
    transport: Arc<dyn Transport>,
    app_config: AppConfig,
) -> Result<()> {
    let in_memory = InMemorySender::new();
    let sender: Arc<dyn BulkSender> = if dry_run {
        Arc::new(in_memory.clone())
    } else {
        Arc::new(TransportBulkSender::new(transport))
    };
    let indexer = BulkIndexer::new(app_config.bulk, sender)
        .context("💀 The bulk config did not produce a working indexer")?;
    indexer.start()?;

    let total_size = tokio::fs::metadata(file)
        .await
        .with_context(|| format!("💀 Can't stat '{}'", file.display()))?
        .len();
    let mut progress = LoadProgress::new(file.display().to_string(), total_size)?;
    let started = Instant::now();

    let feed = feed_file(file, options, &indexer, &mut progress);
    let fed = tokio::select! {
        fed = feed => fed,
        _ = tokio::signal::ctrl_c() => {
            warn!("🛑 interrupted, flushing what we have and shutting down");
            Ok(())
        }
    };
    progress.finish();

    // -- 🚽 drain even when feeding failed, so nothing accepted is left behind
    let stats = indexer.shutdown().await?;
    println!("{}", summary_table(&stats, started.elapsed()));
    if dry_run {
        info!(
            "🧪 dry run: {} batches kept in memory, nothing was sent",
            in_memory.batches().len()
        );
    }
    fed?;

    if stats.docs_abandoned > 0 {
        anyhow::bail!(
            "💀 {} docs were still in flight when shutdown gave up",
            stats.docs_abandoned
        );
    }
    if stats.send_errors > 0 {
        anyhow::bail!(
            "💀 {} of {} batches failed to send",
            stats.send_errors,
            stats.send_errors + stats.batches_sent
        );
    }
    Ok(())
}

async fn feed_file(
    file: &Path,
    options: &LoadOptions,
    indexer: &BulkIndexer,
    progress: &mut LoadProgress,
) -> Result<()> {
    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("💀 Can't open '{}'", file.display()))?;
    let mut lines = BufReader::new(handle).lines();
    let mut line_number = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        let bytes_read = line.len() as u64 + 1;
        if line.trim().is_empty() {
            progress.update(bytes_read, 0);
            continue;
        }
        indexer.submit(document_for(&line, line_number, options)?).await?;
        progress.update(bytes_read, 1);
    }
    Ok(())
}

async fn health(transport: &dyn Transport, indices: &[String]) -> Result<()> {
    let indices: Vec<&str> = indices.iter().map(String::as_str).collect();
    let health = cluster::health(transport, &indices)
        .await
        .context("💀 Couldn't fetch cluster health")?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["cluster", "status", "nodes", "data nodes", "shards", "unassigned"]);
    table.add_row(vec![
        Cell::new(&health.cluster_name),
        Cell::new(&health.status),
        Cell::new(health.number_of_nodes),
        Cell::new(health.number_of_data_nodes),
        Cell::new(health.active_shards),
        Cell::new(health.unassigned_shards),
    ]);
    println!("{table}");
    Ok(())
}

async fn search(transport: &dyn Transport, index: String, query: String, size: u64) -> Result<()> {
    let result = Search::new(index)
        .size(size)
        .query(Query::search(query))
        .result(transport)
        .await
        .context("💀 Search failed")?;

    println!(
        "🔎 {} total hits in {}ms{}",
        result.hits.total,
        result.took,
        if result.timed_out { " (timed out)" } else { "" }
    );
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["_id", "_score", "_source"]);
    for hit in &result.hits.hits {
        table.add_row(vec![
            Cell::new(&hit.id),
            Cell::new(hit.score.map(|s| format!("{s:.3}")).unwrap_or_default()),
            Cell::new(
                hit.source
                    .as_ref()
                    .map(Value::to_string)
                    .unwrap_or_default(),
            ),
        ]);
    }
    println!("{table}");
    Ok(())
}
