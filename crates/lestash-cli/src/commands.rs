use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use serde::Serialize;

use lestash_protocol::ProtocolInfo;
use lestash_registry::{PeerRegistry, SqlitePeerRegistry};
use lestash_server::{ServerConfig, SyncServer};
use lestash_store::{ChangeLogStore, SqliteChangeLog, INDEXED_TABLE};
use lestash_sync::{
    import_bundle, write_bundle, HttpTransport, ReplicationCoordinator, SyncOutcome, SyncSessionManager,
};
use lestash_types::{DbVersion, NewPeer, Peer, PeerId, SiteId};

use crate::cli::*;
use crate::config::{default_config_path, Config};

pub async fn run_command(cli: Cli, config: Config) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Peer(args) => cmd_peer(&config, format, args),
        Command::Sync(args) => cmd_sync(&config, format, args).await,
        Command::Serve(args) => cmd_serve(&config, args).await,
        Command::Status => cmd_status(&config, format),
        Command::Export(args) => cmd_export(&config, format, args),
        Command::Import(args) => cmd_import(&config, format, args),
        Command::Search(args) => cmd_search(&config, format, args),
        Command::Info => cmd_info(&config, format),
    }
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create data directory: {}", parent.display()))?;
    }
    Ok(())
}

fn open_store(config: &Config) -> anyhow::Result<SqliteChangeLog> {
    let path = &config.general.database_path;
    ensure_parent(path)?;
    SqliteChangeLog::open(path).with_context(|| format!("failed to open stash at {}", path.display()))
}

fn open_registry(config: &Config) -> anyhow::Result<SqlitePeerRegistry> {
    let path = &config.general.database_path;
    ensure_parent(path)?;
    SqlitePeerRegistry::open(path).with_context(|| format!("failed to open peer registry at {}", path.display()))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn site_label(site: Option<SiteId>) -> String {
    site.map(|s| s.short_hex()).unwrap_or_else(|| "unknown".into())
}

fn cmd_peer(config: &Config, format: OutputFormat, args: PeerArgs) -> anyhow::Result<()> {
    let registry = open_registry(config)?;
    match args.action {
        PeerAction::Add { name, address, port } => {
            let peer = registry.add(&NewPeer::new(name, address, port))?;
            match format {
                OutputFormat::Json => print_json(&peer)?,
                OutputFormat::Text => println!(
                    "{} Added peer {} ({}) as #{}",
                    "✓".green().bold(),
                    peer.name.bold(),
                    peer.location().blue(),
                    peer.id
                ),
            }
        }
        PeerAction::List => {
            let peers = registry.list()?;
            match format {
                OutputFormat::Json => print_json(&peers)?,
                OutputFormat::Text if peers.is_empty() => println!("No peers registered."),
                OutputFormat::Text => peers.iter().for_each(print_peer),
            }
        }
        PeerAction::Remove { id } => {
            if !registry.remove(PeerId(id))? {
                anyhow::bail!("no peer with id {id}");
            }
            if format == OutputFormat::Text {
                println!("Removed peer #{id}");
            }
        }
    }
    Ok(())
}

fn print_peer(peer: &Peer) {
    let synced = match peer.last_synced_at {
        Some(at) => format!("v{} at {}", peer.last_synced_version, at.format("%Y-%m-%d %H:%M")),
        None => "never synced".dimmed().to_string(),
    };
    println!(
        "{:>3}  {}  {}  site {}  {}",
        peer.id.to_string().yellow(),
        peer.name.bold(),
        peer.location().blue(),
        site_label(peer.site_id).cyan(),
        synced
    );
}

async fn cmd_sync(config: &Config, format: OutputFormat, args: SyncArgs) -> anyhow::Result<()> {
    let store: Arc<dyn ChangeLogStore> = Arc::new(open_store(config)?);
    let registry: Arc<dyn PeerRegistry> = Arc::new(open_registry(config)?);
    let transport = Arc::new(HttpTransport::new(&config.sync)?);
    let manager = SyncSessionManager::new(ReplicationCoordinator::new(store, registry, transport));

    let outcomes = match args.peer {
        Some(id) => vec![manager.sync_with_peer(PeerId(id)).await?],
        None => manager.sync_all().await?,
    };

    match format {
        OutputFormat::Json => print_json(&outcomes)?,
        OutputFormat::Text if outcomes.is_empty() => {
            println!("No peers registered. Add one with {}.", "lestash peer add".bold())
        }
        OutputFormat::Text => outcomes.iter().for_each(print_outcome),
    }

    let failed = outcomes.iter().filter(|o| !o.success).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} peers failed to sync", outcomes.len());
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome) {
    if outcome.success {
        println!("{} {}", "✓".green().bold(), outcome.summary());
    } else {
        println!("{} {}", "✗".red().bold(), outcome.summary());
    }
    for warning in &outcome.warnings {
        println!("  {} {}", "warning:".yellow(), warning);
    }
}

async fn cmd_serve(config: &Config, args: ServeArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let server_config = ServerConfig { bind_addr: args.bind.unwrap_or(config.server.bind_addr) };
    println!(
        "Serving stash {} on {}",
        store.site_id()?.short_hex().cyan(),
        server_config.bind_addr.to_string().bold()
    );
    let server = SyncServer::new(server_config, Arc::new(store));
    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("shutting down sync server"),
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusReport {
    site_id: SiteId,
    db_version: DbVersion,
    protocol: ProtocolInfo,
    tables: BTreeMap<String, usize>,
    peers: usize,
}

fn cmd_status(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let registry = open_registry(config)?;
    let report = StatusReport {
        site_id: store.site_id()?,
        db_version: store.db_version()?,
        protocol: ProtocolInfo::from(&store.descriptor()),
        tables: store.table_change_counts()?,
        peers: registry.list()?.len(),
    };
    if format == OutputFormat::Json {
        return print_json(&report);
    }
    println!("Site: {}", report.site_id.to_string().cyan());
    println!("Database version: {}", report.db_version.to_string().bold());
    println!(
        "Protocol: v{} {} (schema {}, engine {})",
        report.protocol.version,
        report.protocol.format.yellow(),
        report.protocol.schema_version,
        report.protocol.merge_engine_version
    );
    println!("Peers: {}", report.peers);
    println!("Tracked changes:");
    for (table, count) in &report.tables {
        println!("  {table:<16} {count}");
    }
    Ok(())
}

fn cmd_export(config: &Config, format: OutputFormat, args: ExportArgs) -> anyhow::Result<()> {
    if args.since < 0 {
        anyhow::bail!("--since must not be negative");
    }
    let store = open_store(config)?;
    let summary = write_bundle(&store, &args.file, args.since)?;
    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => println!(
            "{} Exported {} changes (v{} to v{}) to {}",
            "✓".green().bold(),
            summary.change_count,
            summary.since_version,
            summary.db_version,
            args.file.display().to_string().bold()
        ),
    }
    Ok(())
}

fn cmd_import(config: &Config, format: OutputFormat, args: ImportArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let summary = import_bundle(&store, &args.file, !args.no_rebuild_index)?;
    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text => {
            println!(
                "{} Applied {} of {} changes from {}",
                "✓".green().bold(),
                summary.changes_applied,
                summary.changes_received,
                site_label(summary.source_site_id).cyan()
            );
            if let Some(indexed) = summary.indexed {
                println!("  Re-indexed {indexed} items");
            }
        }
    }
    Ok(())
}

fn cmd_search(config: &Config, format: OutputFormat, args: SearchArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let hits = store.search(&args.query, args.limit)?;
    if format == OutputFormat::Json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No matches for {}.", args.query.bold());
        return Ok(());
    }
    for hit in &hits {
        let title = store
            .row(INDEXED_TABLE, &hit.pk)?
            .and_then(|row| row.get("title").and_then(|v| v.as_str()).map(str::to_string))
            .unwrap_or_default();
        println!("{}  {}", hit.pk.yellow(), title);
    }
    Ok(())
}

fn cmd_info(config: &Config, format: OutputFormat) -> anyhow::Result<()> {
    let protocol = ProtocolInfo::from(&lestash_types::ProtocolDescriptor::current());
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "name": "lestash",
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": protocol,
            "config_path": default_config_path(),
            "database_path": config.general.database_path,
        }));
    }
    println!("lestash {}", env!("CARGO_PKG_VERSION").bold());
    println!("Protocol: v{} {}", protocol.version, protocol.format.yellow());
    println!("Replicated tables: {}", protocol.sync_tables.join(", "));
    if let Some(path) = default_config_path() {
        println!("Config: {}", path.display());
    }
    println!("Database: {}", config.general.database_path.display());
    Ok(())
}
