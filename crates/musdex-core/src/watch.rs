use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use notify::event::{AccessKind, AccessMode, CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::error::{MusdexError, Result};
use crate::sync::FsEvent;

/// Installs recursive watches that feed [`FsEvent`]s into `sink`.
///
/// Events stop flowing once the returned guard is dropped.
#[cfg_attr(test, mockall::automock)]
pub trait WatchProvider: Send + Sync {
    fn install(&self, root: &Path, sink: UnboundedSender<FsEvent>) -> Result<WatchGuard>;
}

/// Keeps a watch alive. Dropping it tears the watch down.
pub struct WatchGuard {
    resource: Option<Box<dyn Send>>,
    pump: Option<JoinHandle<()>>,
}

impl WatchGuard {
    pub fn new(resource: impl Send + 'static) -> Self {
        Self {
            resource: Some(Box::new(resource)),
            pump: None,
        }
    }

    /// A guard with nothing behind it, for providers that push events by hand.
    pub fn detached() -> Self {
        Self {
            resource: None,
            pump: None,
        }
    }

    pub fn with_pump(mut self, pump: JoinHandle<()>) -> Self {
        self.pump = Some(pump);
        self
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard")
            .field("active", &self.resource.is_some())
            .finish()
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }
}

/// Folds raw notify events into the four catalog-relevant kinds.
///
/// Backends that report renames as two halves (inotify) tag both with the same
/// tracker cookie. A "from" half waits up to the pairing window for its
/// partner; once expired it is reported as a removal.
#[derive(Debug)]
pub struct EventTranslator {
    pairing: Duration,
    pending: HashMap<usize, (PathBuf, Instant)>,
}

impl EventTranslator {
    pub fn new(pairing: Duration) -> Self {
        Self {
            pairing,
            pending: HashMap::new(),
        }
    }

    pub fn pairing(&self) -> Duration {
        self.pairing
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn translate(&mut self, event: Event, now: Instant) -> Vec<FsEvent> {
        let tracker = event.attrs.tracker();
        let mut paths = event.paths;

        match event.kind {
            EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => {
                Vec::new()
            }
            EventKind::Create(_) => paths.into_iter().map(FsEvent::Added).collect(),
            EventKind::Remove(_) => paths.into_iter().map(FsEvent::Removed).collect(),
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if paths.len() == 2 => {
                let to = paths.pop().unwrap_or_default();
                let from = paths.pop().unwrap_or_default();
                vec![FsEvent::Renamed { from, to }]
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => match tracker {
                Some(cookie) => {
                    for path in paths {
                        self.pending.insert(cookie, (path, now));
                    }
                    Vec::new()
                }
                None => paths.into_iter().map(FsEvent::Removed).collect(),
            },
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => {
                let source = tracker.and_then(|cookie| self.pending.remove(&cookie));
                match (source, paths.pop()) {
                    (Some((from, _)), Some(to)) => vec![FsEvent::Renamed { from, to }],
                    (None, Some(to)) => vec![FsEvent::Added(to)],
                    (_, None) => Vec::new(),
                }
            }
            EventKind::Modify(ModifyKind::Name(_)) => paths
                .into_iter()
                .map(|path| {
                    if path.exists() {
                        FsEvent::Added(path)
                    } else {
                        FsEvent::Removed(path)
                    }
                })
                .collect(),
            EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
            EventKind::Modify(_) | EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
                paths.into_iter().map(FsEvent::Modified).collect()
            }
            _ => {
                trace!("ignoring {:?}", event.kind);
                Vec::new()
            }
        }
    }

    /// Flushes "from" halves whose partner never arrived.
    pub fn expire(&mut self, now: Instant) -> Vec<FsEvent> {
        let pairing = self.pairing;
        let mut expired = Vec::new();
        self.pending.retain(|_, (path, seen)| {
            if now.saturating_duration_since(*seen) > pairing {
                expired.push(FsEvent::Removed(std::mem::take(path)));
                false
            } else {
                true
            }
        });
        expired
    }
}

/// Watches through the platform's recommended notify backend.
#[derive(Debug, Clone)]
pub struct NotifyWatchProvider {
    rename_pairing: Duration,
}

impl NotifyWatchProvider {
    pub fn new(rename_pairing: Duration) -> Self {
        Self { rename_pairing }
    }
}

impl WatchProvider for NotifyWatchProvider {
    fn install(&self, root: &Path, sink: UnboundedSender<FsEvent>) -> Result<WatchGuard> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let mut watcher = RecommendedWatcher::new(
            move |result| {
                // Receiver gone means the guard is being dropped.
                let _ = raw_tx.send(result);
            },
            Config::default(),
        )
        .map_err(|err| MusdexError::WatchSetup(err.to_string()))?;

        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|err| MusdexError::WatchSetup(format!("{}: {err}", root.display())))?;
        debug!("watching {}", root.display());

        let translator = EventTranslator::new(self.rename_pairing);
        let pump = tokio::spawn(pump(raw_rx, sink, translator));
        Ok(WatchGuard::new(watcher).with_pump(pump))
    }
}

async fn pump(
    mut raw: UnboundedReceiver<notify::Result<Event>>,
    sink: UnboundedSender<FsEvent>,
    mut translator: EventTranslator,
) {
    let mut ticker = tokio::time::interval(translator.pairing().max(Duration::from_millis(10)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let events = tokio::select! {
            received = raw.recv() => match received {
                Some(Ok(event)) => translator.translate(event, Instant::now()),
                Some(Err(err)) => {
                    warn!("watch backend error: {err}");
                    Vec::new()
                }
                None => break,
            },
            _ = ticker.tick() => translator.expire(Instant::now()),
        };

        for event in events {
            if sink.send(event).is_err() {
                return;
            }
        }
    }
}
