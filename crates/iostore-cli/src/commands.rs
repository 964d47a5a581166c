use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use colored::Colorize;
use iostore_container::ContainerReader;
use iostore_dispatch::{
    BatchCompletion, BatchReadyCallback, CompletedRequest, Dispatcher, IoQueue, IoStoreConfig,
    QueueConfig, RequestResult,
};
use iostore_types::{ChunkId, ReadOptions};
use serde_json::{json, Value};
use tracing::debug;

use crate::cli::*;

/// Bytes shown per chunk in text output.
const PREVIEW_BYTES: usize = 32;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Inspect(args) => cmd_inspect(args, cli.format),
        Command::Read(args) => cmd_read(args, cli.format),
        Command::Fetch(args) => cmd_fetch(args, cli.format),
    }
}

fn cmd_inspect(args: InspectArgs, format: OutputFormat) -> anyhow::Result<()> {
    let reader = ContainerReader::open(&args.container)
        .with_context(|| format!("opening container {}", args.container.display()))?;
    let mut entries: Vec<_> = reader.entries().collect();
    entries.sort_by_key(|e| e.offset);

    match format {
        OutputFormat::Json => {
            let chunks: Vec<Value> = entries
                .iter()
                .map(|e| json!({ "chunk_id": e.chunk_id.to_hex(), "offset": e.offset, "length": e.length }))
                .collect();
            let out = json!({
                "container": reader.path().display().to_string(),
                "data_size": reader.data_size(),
                "chunks": chunks,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            println!(
                "{} {} chunks, {} data bytes",
                reader.path().display().to_string().bold(),
                reader.chunk_count().to_string().cyan(),
                reader.data_size()
            );
            for e in entries {
                println!(
                    "  {}  {:>12}  {:>10}",
                    e.chunk_id.to_hex().yellow(),
                    e.offset,
                    e.length
                );
            }
        }
    }
    Ok(())
}

fn cmd_read(args: ReadArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ids = parse_ids(&args.chunks)?;
    let (dispatcher, _) = open_dispatcher(&args.source)?;
    let options = read_options(&args.window);

    let batch = dispatcher.new_batch();
    for (i, id) in ids.iter().enumerate() {
        dispatcher.read(batch, *id, options, i as u64)?;
    }
    dispatcher.issue_batch(batch)?;
    let results = dispatcher.batch_results(batch)?;
    dispatcher.free_batch(batch)?;

    print_results(&results, format)
}

fn cmd_fetch(args: FetchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let ids = parse_ids(&args.chunks)?;
    let (dispatcher, queue_config) = open_dispatcher(&args.source)?;
    let options = read_options(&args.window);

    let on_ready: BatchReadyCallback = Box::new(|done: &BatchCompletion| {
        debug!(sequence = done.sequence, requests = done.requests.len(), "batch ready");
    });
    let queue = IoQueue::with_config(dispatcher, &queue_config, Some(on_ready))?;
    for (i, id) in ids.iter().enumerate() {
        queue.enqueue(*id, options, i as u64, args.defer)?;
    }
    queue.issue_batch_from_queued()?;

    let deadline = Instant::now() + Duration::from_secs(args.timeout);
    let mut results = Vec::with_capacity(ids.len());
    while results.len() < ids.len() {
        match queue.dequeue() {
            Some(done) => results.push(done),
            None if Instant::now() >= deadline => {
                bail!("timed out with {} of {} reads outstanding", ids.len() - results.len(), ids.len())
            }
            None => std::thread::sleep(Duration::from_millis(1)),
        }
    }
    queue.stop();

    print_results(&results, format)
}

fn parse_ids(raw: &[String]) -> anyhow::Result<Vec<ChunkId>> {
    raw.iter()
        .map(|s| ChunkId::from_hex(s).with_context(|| format!("invalid chunk id {s:?}")))
        .collect()
}

fn read_options(window: &WindowArgs) -> ReadOptions {
    ReadOptions::new(window.offset, window.size.unwrap_or(u64::MAX))
}

/// Build a dispatcher with `--container` mounts first, then the mounts from
/// `--config` (resolved relative to the config file).
fn open_dispatcher(source: &SourceArgs) -> anyhow::Result<(Arc<Dispatcher>, QueueConfig)> {
    let config = match &source.config {
        Some(path) => IoStoreConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => IoStoreConfig::default(),
    };
    let dispatcher = Dispatcher::new(&config.dispatcher);
    for path in &source.containers {
        dispatcher
            .open_and_mount(path, 0)
            .with_context(|| format!("mounting {}", path.display()))?;
    }
    if let Some(path) = &source.config {
        let root = path.parent().unwrap_or(Path::new("."));
        config.mount_all(&dispatcher, root);
    }
    if dispatcher.registry().mounted_count() == 0 {
        bail!("no containers mounted; pass --container or --config");
    }
    Ok((Arc::new(dispatcher), config.queue))
}

fn result_json(done: &CompletedRequest) -> Value {
    let mut out = json!({
        "index": done.user_data,
        "chunk_id": done.chunk_id.to_hex(),
    });
    match &done.result {
        RequestResult::Ok(bytes) => {
            out["status"] = json!("ok");
            out["length"] = json!(bytes.len());
            out["data"] = json!(hex::encode(bytes.as_slice()));
        }
        RequestResult::Failed(code) => out["status"] = json!(code.as_str()),
        RequestResult::Unknown => out["status"] = json!("unknown"),
    }
    out
}

fn print_results(results: &[CompletedRequest], format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let out: Vec<Value> = results.iter().map(result_json).collect();
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        OutputFormat::Text => {
            for done in results {
                let id = done.chunk_id.short_hex().yellow();
                match &done.result {
                    RequestResult::Ok(bytes) => {
                        let shown = &bytes[..bytes.len().min(PREVIEW_BYTES)];
                        let more = if bytes.len() > PREVIEW_BYTES { "…" } else { "" };
                        println!(
                            "{} {} {} {}{}",
                            "✓".green(),
                            id,
                            format!("{} bytes", bytes.len()).cyan(),
                            hex::encode(shown).dimmed(),
                            more
                        );
                    }
                    RequestResult::Failed(code) => println!("{} {} {}", "✗".red(), id, code.as_str().red()),
                    RequestResult::Unknown => println!("{} {} pending", "?".yellow(), id),
                }
            }
        }
    }
    Ok(())
}
