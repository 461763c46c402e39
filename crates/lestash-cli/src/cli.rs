use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use lestash_types::DEFAULT_SYNC_PORT;

#[derive(Parser)]
#[command(name = "lestash", about = "Le Stash: peer-to-peer sync for your personal stash", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

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
    /// Manage sync peers
    Peer(PeerArgs),
    /// Pull changes from all peers, or one
    Sync(SyncArgs),
    /// Serve this stash to pulling peers
    Serve(ServeArgs),
    /// Show local sync state
    Status,
    /// Write changes to a bundle file for offline transfer
    Export(ExportArgs),
    /// Apply a bundle file written by `export`
    Import(ImportArgs),
    /// Search synced items
    Search(SearchArgs),
    /// Show build and protocol information
    Info,
}

#[derive(Args)]
pub struct PeerArgs {
    #[command(subcommand)]
    pub action: PeerAction,
}

#[derive(Subcommand)]
pub enum PeerAction {
    /// Register a peer
    Add {
        name: String,
        /// Host name or IP address
        address: String,
        #[arg(long, default_value_t = DEFAULT_SYNC_PORT)]
        port: u16,
    },
    /// List registered peers
    List,
    /// Forget a peer
    Remove { id: i64 },
}

#[derive(Args)]
pub struct SyncArgs {
    /// Only sync the peer with this id
    #[arg(long)]
    pub peer: Option<i64>,
}

#[derive(Args)]
pub struct ServeArgs {
    /// Address to listen on; defaults to `server.bind_addr` from the config
    #[arg(long)]
    pub bind: Option<SocketAddr>,
}

#[derive(Args)]
pub struct ExportArgs {
    pub file: PathBuf,
    #[arg(long, default_value_t = 0)]
    pub since: i64,
}

#[derive(Args)]
pub struct ImportArgs {
    pub file: PathBuf,
    #[arg(long)]
    pub no_rebuild_index: bool,
}

#[derive(Args)]
pub struct SearchArgs {
    pub query: String,
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}
