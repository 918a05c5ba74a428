use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use musdex_core::prelude::*;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "musdex")]
#[command(about = "musdex - keeps a music catalog in sync with a folder", long_about = None)]
struct Args {
    /// Directory holding the catalog database
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Index a folder (or the remembered one) and follow its changes until Ctrl+C
    Watch { dir: Option<PathBuf> },
    /// Replace the catalog with the contents of a folder
    Scan { dir: PathBuf },
    /// Print the catalog
    List,
    /// Mark an entry as liked
    Like { id: u64 },
    /// Clear the liked mark of an entry
    Unlike { id: u64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => AppConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => AppConfig::default(),
    };

    let data_dir = resolve_data_dir(&args, &config)?;
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating {}", data_dir.display()))?;
    let store = SledCatalogStore::open(data_dir.join("catalog"))?;

    match args.command {
        Command::Watch { dir } => watch(store, config, dir).await,
        Command::Scan { dir } => {
            let (manager, _) = session(&store, &config)?;
            let report = manager.switch_to(&dir).await?;
            manager.shutdown().await;
            println!(
                "indexed {} media files under {}",
                report.indexed,
                report.root.display()
            );
            Ok(())
        }
        Command::List => list(&store).await,
        Command::Like { id } => Ok(store.set_liked(EntryId(id), true).await?),
        Command::Unlike { id } => Ok(store.set_liked(EntryId(id), false).await?),
    }
}

fn resolve_data_dir(args: &Args, config: &AppConfig) -> anyhow::Result<PathBuf> {
    if let Some(dir) = args.data_dir.clone().or_else(|| config.data_dir.clone()) {
        return Ok(dir);
    }
    ProjectDirs::from("", "", "musdex")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .context("no data directory available; pass --data-dir")
}

fn session(
    store: &SledCatalogStore,
    config: &AppConfig,
) -> anyhow::Result<(FolderSessionManager, BroadcastRefresh)> {
    let refresh = BroadcastRefresh::default();
    let manager = FolderSessionManager::new(
        Arc::new(store.clone()),
        Arc::new(Scanner::new(Arc::new(LoftyMetadataReader::new()))),
        Arc::new(refresh.clone()),
        Arc::new(NotifyWatchProvider::new(config.sync.rename_pairing())),
        Arc::new(SledSessionState::new(store)?),
        config.sync.clone(),
    );
    Ok((manager, refresh))
}

async fn watch(
    store: SledCatalogStore,
    config: AppConfig,
    dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    let (manager, refresh) = session(&store, &config)?;
    let mut changes = refresh.subscribe();

    let report = match dir {
        Some(dir) => manager.switch_to(&dir).await?,
        None => manager
            .restore()
            .await?
            .context("no remembered folder; pass one to watch")?,
    };
    info!(
        "watching {} ({} entries)",
        report.root.display(),
        report.indexed
    );
    info!("Press Ctrl+C to stop...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, stopping...");
                break;
            }
            change = changes.recv() => match change {
                Ok(CatalogEvent::Changed) | Err(RecvError::Lagged(_)) => {
                    match store.count().await {
                        Ok(count) => info!("catalog changed, {count} entries"),
                        Err(err) => warn!("unable to count catalog: {err}"),
                    }
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn list(store: &SledCatalogStore) -> anyhow::Result<()> {
    for entry in store.list_all().await? {
        let total = entry.duration_seconds.round() as u64;
        println!(
            "{:>6} {} {} - {} ({}) {}:{:02}  {}",
            entry.id.0,
            if entry.liked { '*' } else { ' ' },
            entry.artist,
            entry.title,
            entry.album,
            total / 60,
            total % 60,
            entry.file_path.display()
        );
    }
    Ok(())
}
