use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::{Mutex, oneshot};
use tokio::task::{JoinHandle, JoinSet, spawn_blocking};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::debounce::ChangeDebouncer;
use crate::entry::NewEntry;
use crate::error::{MusdexError, Result};
use crate::refresh::RefreshHook;
use crate::scanner::Scanner;
use crate::store::{CatalogStore, SessionState};
use crate::sync::{FsEvent, SyncController};
use crate::watch::{WatchGuard, WatchProvider};

const SCAN_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Switching,
    Watching(PathBuf),
    Faulted(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchReport {
    pub root: PathBuf,
    pub indexed: usize,
}

struct ActiveSession {
    root: PathBuf,
    guard: WatchGuard,
    shutdown: oneshot::Sender<()>,
    dispatcher: JoinHandle<()>,
}

impl ActiveSession {
    /// Stops the watch, then waits for every in-flight handler to finish.
    async fn stop(self) {
        drop(self.guard);
        let _ = self.shutdown.send(());
        if let Err(err) = self.dispatcher.await {
            warn!("dispatcher for {} ended abnormally: {err}", self.root.display());
        }
        debug!("session for {} stopped", self.root.display());
    }
}

/// Owns the single active root: populates the catalog from it and keeps a
/// watch wired to the [`SyncController`].
pub struct FolderSessionManager {
    store: Arc<dyn CatalogStore>,
    scanner: Arc<Scanner>,
    debouncer: Arc<ChangeDebouncer>,
    controller: Arc<SyncController>,
    refresh: Arc<dyn RefreshHook>,
    watcher: Arc<dyn WatchProvider>,
    state: Arc<dyn SessionState>,
    status: RwLock<SessionStatus>,
    active: Mutex<Option<ActiveSession>>,
}

impl FolderSessionManager {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        scanner: Arc<Scanner>,
        refresh: Arc<dyn RefreshHook>,
        watcher: Arc<dyn WatchProvider>,
        state: Arc<dyn SessionState>,
        config: SyncConfig,
    ) -> Self {
        let debouncer = Arc::new(ChangeDebouncer::new());
        let controller = Arc::new(SyncController::new(
            store.clone(),
            scanner.clone(),
            debouncer.clone(),
            refresh.clone(),
            config,
        ));
        Self {
            store,
            scanner,
            debouncer,
            controller,
            refresh,
            watcher,
            state,
            status: RwLock::new(SessionStatus::Idle),
            active: Mutex::new(None),
        }
    }

    pub fn controller(&self) -> Arc<SyncController> {
        self.controller.clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.status.read().clone()
    }

    pub fn active_root(&self) -> Option<PathBuf> {
        match &*self.status.read() {
            SessionStatus::Watching(root) => Some(root.clone()),
            _ => None,
        }
    }

    /// Replaces the catalog with the contents of `new_root` and starts
    /// watching it.
    ///
    /// The previous watch is torn down and its in-flight events drained before
    /// the catalog is reset, so nothing from the old root lands afterwards.
    /// Events for the new root are buffered from the moment the watch is
    /// installed and replayed once the initial scan has finished.
    pub async fn switch_to(&self, new_root: &Path) -> Result<SwitchReport> {
        let root = validate_root(new_root).await?;

        let mut active = self.active.lock().await;
        self.set_status(SessionStatus::Switching);

        if let Some(previous) = active.take() {
            previous.stop().await;
        }

        match self.start(&root).await {
            Ok((session, report)) => {
                *active = Some(session);
                self.set_status(SessionStatus::Watching(root));
                info!(
                    "indexed {} media files under {}",
                    report.indexed,
                    report.root.display()
                );
                Ok(report)
            }
            Err(err) => {
                warn!("switching to {} failed: {err}", root.display());
                self.set_status(SessionStatus::Faulted(err.to_string()));
                Err(err)
            }
        }
    }

    /// Re-opens the remembered root, if there is one and it still exists.
    pub async fn restore(&self) -> Result<Option<SwitchReport>> {
        let Some(root) = self.state.remembered_root().await? else {
            return Ok(None);
        };
        if !is_dir(&root).await {
            warn!("remembered root {} is gone", root.display());
            return Ok(None);
        }
        self.switch_to(&root).await.map(Some)
    }

    pub async fn shutdown(&self) {
        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            session.stop().await;
        }
        self.set_status(SessionStatus::Idle);
    }

    async fn start(&self, root: &Path) -> Result<(ActiveSession, SwitchReport)> {
        let (sink, events) = mpsc::unbounded_channel();
        let guard = self.watcher.install(root, sink)?;

        self.store.reset().await?;
        self.debouncer.clear();
        let indexed = self.populate(root).await?;

        let (shutdown, stop) = oneshot::channel();
        let dispatcher = tokio::spawn(dispatch(self.controller.clone(), events, stop));

        self.state.remember_root(root).await?;
        let refresh = self.refresh.clone();
        spawn_blocking(move || refresh.catalog_changed());

        let session = ActiveSession {
            root: root.to_path_buf(),
            guard,
            shutdown,
            dispatcher,
        };
        let report = SwitchReport {
            root: root.to_path_buf(),
            indexed,
        };
        Ok((session, report))
    }

    async fn populate(&self, root: &Path) -> Result<usize> {
        let (tx, mut rx) = mpsc::channel::<NewEntry>(SCAN_BUFFER);
        let scanner = self.scanner.clone();
        let walk_root = root.to_path_buf();
        let walker = spawn_blocking(move || {
            for entry in scanner.scan_tree(&walk_root) {
                if tx.blocking_send(entry).is_err() {
                    break;
                }
            }
        });

        let mut indexed = 0;
        while let Some(entry) = rx.recv().await {
            match self.store.insert(entry).await {
                Ok(_) => indexed += 1,
                Err(MusdexError::DuplicateKey(path)) => {
                    debug!("{} already cataloged", path.display());
                }
                Err(err) => return Err(err),
            }
        }

        walker
            .await
            .map_err(|err| MusdexError::Store(format!("scan task failed: {err}")))?;
        Ok(indexed)
    }

    fn set_status(&self, status: SessionStatus) {
        *self.status.write() = status;
    }
}

async fn dispatch(
    controller: Arc<SyncController>,
    mut events: UnboundedReceiver<FsEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut stop => break,
            event = events.recv() => match event {
                Some(event) => {
                    debug!("dispatching {} event", event.kind());
                    let controller = controller.clone();
                    inflight.spawn(async move { controller.handle(event).await });
                }
                None => break,
            },
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(err) = joined {
                    warn!("event handler panicked: {err}");
                }
            }
        }
    }

    while let Some(joined) = inflight.join_next().await {
        if let Err(err) = joined {
            warn!("event handler panicked: {err}");
        }
    }
}

async fn validate_root(root: &Path) -> Result<PathBuf> {
    if !is_dir(root).await {
        return Err(MusdexError::InvalidRoot(root.to_path_buf()));
    }
    tokio::fs::canonicalize(root)
        .await
        .map_err(|_| MusdexError::InvalidRoot(root.to_path_buf()))
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}
