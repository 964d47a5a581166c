use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "iostore",
    about = "IoStore: inspect containers and read chunks by id",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List the chunks of one container
    Inspect(InspectArgs),
    /// Read chunks through one synchronous batch
    Read(ReadArgs),
    /// Read chunks through the background queue
    Fetch(FetchArgs),
}

#[derive(Args)]
pub struct InspectArgs {
    /// Container base path (without extension)
    pub container: PathBuf,
}

/// Where chunks are resolved from.
#[derive(Args)]
pub struct SourceArgs {
    /// Container base path to mount; repeat to mount several, first wins
    #[arg(short, long = "container")]
    pub containers: Vec<PathBuf>,
    /// TOML configuration whose mounts are added after `--container`
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct WindowArgs {
    /// Byte offset into each chunk
    #[arg(long, default_value = "0")]
    pub offset: u64,
    /// Maximum bytes to read from each chunk
    #[arg(long)]
    pub size: Option<u64>,
}

#[derive(Args)]
pub struct ReadArgs {
    /// Chunk ids (64 hex characters)
    #[arg(required = true)]
    pub chunks: Vec<String>,
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub window: WindowArgs,
}

#[derive(Args)]
pub struct FetchArgs {
    /// Chunk ids (64 hex characters)
    #[arg(required = true)]
    pub chunks: Vec<String>,
    #[command(flatten)]
    pub source: SourceArgs,
    #[command(flatten)]
    pub window: WindowArgs,
    /// Queue everything and flush as a single batch
    #[arg(long)]
    pub defer: bool,
    /// Seconds to wait for all completions
    #[arg(long, default_value = "30")]
    pub timeout: u64,
}
