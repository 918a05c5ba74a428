use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::debounce::ChangeDebouncer;
use crate::entry::{EntryId, NewEntry};
use crate::error::{MusdexError, Result};
use crate::refresh::RefreshHook;
use crate::scanner::{Scanner, is_media_file};
use crate::store::CatalogStore;

/// A filesystem change, as delivered by a [`crate::watch::WatchProvider`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    Added(PathBuf),
    Removed(PathBuf),
    Renamed { from: PathBuf, to: PathBuf },
    Modified(PathBuf),
}

impl FsEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            FsEvent::Added(_) => "added",
            FsEvent::Removed(_) => "removed",
            FsEvent::Renamed { .. } => "renamed",
            FsEvent::Modified(_) => "modified",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Debounced,
    NotMedia,
    Missing,
    AlreadyCataloged,
    NotCataloged,
}

/// What a single event did to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Inserted(EntryId),
    Updated(EntryId),
    Deleted(PathBuf),
    Unchanged(EntryId),
    Skipped(SkipReason),
    Failed(String),
}

impl SyncOutcome {
    pub fn changed_catalog(&self) -> bool {
        matches!(
            self,
            SyncOutcome::Inserted(_) | SyncOutcome::Updated(_) | SyncOutcome::Deleted(_)
        )
    }
}

/// Reconciles the catalog with filesystem events.
///
/// Every handler swallows its own errors: a failed event is logged and
/// abandoned so the watch that delivered it keeps running.
pub struct SyncController {
    store: Arc<dyn CatalogStore>,
    scanner: Arc<Scanner>,
    debouncer: Arc<ChangeDebouncer>,
    refresh: Arc<dyn RefreshHook>,
    config: SyncConfig,
}

impl SyncController {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        scanner: Arc<Scanner>,
        debouncer: Arc<ChangeDebouncer>,
        refresh: Arc<dyn RefreshHook>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            scanner,
            debouncer,
            refresh,
            config,
        }
    }

    pub async fn handle(&self, event: FsEvent) -> SyncOutcome {
        match event {
            FsEvent::Added(path) => self.on_added(&path).await,
            FsEvent::Removed(path) => self.on_removed(&path).await,
            FsEvent::Renamed { from, to } => self.on_renamed(&from, &to).await,
            FsEvent::Modified(path) => self.on_modified(&path).await,
        }
    }

    pub async fn on_added(&self, path: &Path) -> SyncOutcome {
        if !self.debouncer.should_process(path, self.config.added_window()) {
            return debounced("added", path);
        }
        let result = self.insert_new(path).await;
        self.conclude("added", path, result)
    }

    pub async fn on_removed(&self, path: &Path) -> SyncOutcome {
        if !self.debouncer.should_process(path, self.config.removed_window()) {
            return debounced("removed", path);
        }
        let result = self.remove(path).await;
        self.conclude("removed", path, result)
    }

    pub async fn on_renamed(&self, from: &Path, to: &Path) -> SyncOutcome {
        if !self.debouncer.should_process(to, self.config.renamed_window()) {
            return debounced("renamed", to);
        }
        let result = self.rename(from, to).await;
        self.conclude("renamed", to, result)
    }

    pub async fn on_modified(&self, path: &Path) -> SyncOutcome {
        if !self.debouncer.should_process(path, self.config.modified_window()) {
            return debounced("modified", path);
        }
        let result = self.refresh_metadata(path).await;
        self.conclude("modified", path, result)
    }

    async fn insert_new(&self, path: &Path) -> Result<SyncOutcome> {
        if !is_media_file(path) {
            return Ok(SyncOutcome::Skipped(SkipReason::NotMedia));
        }
        self.settle().await;
        if !is_file(path).await {
            return Ok(SyncOutcome::Skipped(SkipReason::Missing));
        }
        if self.store.get_by_path(path).await?.is_some() {
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyCataloged));
        }

        let draft = self.extract(path).await?;
        match self.store.insert(draft).await {
            Ok(id) => Ok(SyncOutcome::Inserted(id)),
            Err(MusdexError::DuplicateKey(_)) => {
                Ok(SyncOutcome::Skipped(SkipReason::AlreadyCataloged))
            }
            Err(err) => Err(err),
        }
    }

    async fn remove(&self, path: &Path) -> Result<SyncOutcome> {
        if self.store.delete_by_path(path).await? {
            Ok(SyncOutcome::Deleted(path.to_path_buf()))
        } else {
            Ok(SyncOutcome::Skipped(SkipReason::NotCataloged))
        }
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<SyncOutcome> {
        let Some(existing) = self.store.get_by_path(from).await? else {
            if is_dir(to).await {
                // Entries below a moved folder keep their old paths until rescanned.
                debug!(
                    "directory {} moved to {}; contents not re-pathed",
                    from.display(),
                    to.display()
                );
                return Ok(SyncOutcome::Skipped(SkipReason::NotCataloged));
            }
            if self.config.rename_inserts_untracked {
                return self.insert_new(to).await;
            }
            return Ok(SyncOutcome::Skipped(SkipReason::NotCataloged));
        };

        if !is_media_file(to) {
            self.store.delete(existing.id).await?;
            return Ok(SyncOutcome::Deleted(from.to_path_buf()));
        }

        self.settle().await;
        let draft = self.extract(to).await?;

        // Re-read so a concurrent event on the same entry is not overwritten.
        let Some(mut entry) = self.store.get(existing.id).await? else {
            return Ok(SyncOutcome::Skipped(SkipReason::NotCataloged));
        };
        if entry.file_path != from {
            return Ok(SyncOutcome::Skipped(SkipReason::NotCataloged));
        }

        let id = entry.id;
        entry.file_path = to.to_path_buf();
        if draft.cover_ref.is_some() {
            entry.cover_ref = draft.cover_ref.clone();
        }
        entry.title = draft.title;
        entry.artist = draft.artist;
        entry.album = draft.album;
        entry.duration_seconds = draft.duration_seconds;

        match self.store.update(&entry).await {
            Ok(()) => Ok(SyncOutcome::Updated(id)),
            Err(MusdexError::DuplicateKey(_)) => {
                // The target is already cataloged on its own; the old row is stale.
                self.store.delete(id).await?;
                Ok(SyncOutcome::Deleted(from.to_path_buf()))
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh_metadata(&self, path: &Path) -> Result<SyncOutcome> {
        if !is_file(path).await {
            return Ok(SyncOutcome::Skipped(SkipReason::Missing));
        }
        if self.store.get_by_path(path).await?.is_none() {
            return Ok(SyncOutcome::Skipped(SkipReason::NotCataloged));
        }

        self.settle().await;
        let draft = self.extract(path).await?;

        let Some(mut entry) = self.store.get_by_path(path).await? else {
            return Ok(SyncOutcome::Skipped(SkipReason::NotCataloged));
        };
        let tags = crate::metadata::TrackTags {
            title: draft.title,
            artist: draft.artist,
            album: draft.album,
            duration_seconds: draft.duration_seconds.max(0.0),
        };
        if entry.tags() == tags {
            return Ok(SyncOutcome::Unchanged(entry.id));
        }

        entry.apply_tags(tags);
        self.store.update(&entry).await?;
        Ok(SyncOutcome::Updated(entry.id))
    }

    async fn settle(&self) {
        let delay = self.config.settle_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    async fn extract(&self, path: &Path) -> Result<NewEntry> {
        let scanner = self.scanner.clone();
        let target = path.to_path_buf();
        spawn_blocking(move || scanner.entry_for(&target))
            .await
            .map_err(|err| MusdexError::Extraction {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })
    }

    fn conclude(&self, kind: &str, path: &Path, result: Result<SyncOutcome>) -> SyncOutcome {
        match result {
            Ok(outcome) => {
                if outcome.changed_catalog() {
                    info!("{kind} {}: {outcome:?}", path.display());
                    self.signal_refresh();
                } else {
                    debug!("{kind} {}: {outcome:?}", path.display());
                }
                outcome
            }
            Err(err) => {
                warn!("{kind} event for {} abandoned: {err}", path.display());
                SyncOutcome::Failed(err.to_string())
            }
        }
    }

    fn signal_refresh(&self) {
        let refresh = self.refresh.clone();
        spawn_blocking(move || refresh.catalog_changed());
    }
}

fn debounced(kind: &str, path: &Path) -> SyncOutcome {
    debug!("{kind} {} debounced", path.display());
    SyncOutcome::Skipped(SkipReason::Debounced)
}

async fn is_dir(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false)
}
