use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::entry::{CatalogEntry, EntryId};
use crate::error::Result;

/// The audio engine. Implementations own decoding and output.
#[cfg_attr(test, mockall::automock)]
pub trait AudioPlayer: Send + Sync {
    /// Starts `path` from the beginning, replacing whatever was loaded.
    fn play(&self, path: &Path) -> Result<()>;
    fn pause(&self) -> Result<()>;
    fn resume(&self) -> Result<()>;
    fn stop(&self) -> Result<()>;
    fn position_seconds(&self) -> f64;
    fn seek(&self, seconds: f64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing(EntryId),
    Paused(EntryId),
}

/// Tracks what is playing on top of an [`AudioPlayer`].
pub struct PlaybackController {
    player: Arc<dyn AudioPlayer>,
    state: Mutex<PlaybackState>,
}

impl PlaybackController {
    pub fn new(player: Arc<dyn AudioPlayer>) -> Self {
        Self {
            player,
            state: Mutex::new(PlaybackState::Stopped),
        }
    }

    pub fn state(&self) -> PlaybackState {
        *self.state.lock()
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state(), PlaybackState::Playing(_))
    }

    pub fn play_entry(&self, entry: &CatalogEntry) -> Result<()> {
        let mut state = self.state.lock();
        if let Err(err) = self.player.play(&entry.file_path) {
            warn!("unable to play {}: {err}", entry.file_path.display());
            *state = PlaybackState::Stopped;
            return Err(err);
        }
        debug!("playing {} ({})", entry.title, entry.id);
        *state = PlaybackState::Playing(entry.id);
        Ok(())
    }

    /// No-op unless something is playing.
    pub fn pause(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let PlaybackState::Playing(id) = *state {
            self.player.pause()?;
            *state = PlaybackState::Paused(id);
        }
        Ok(())
    }

    /// No-op unless something is paused.
    pub fn resume(&self) -> Result<()> {
        let mut state = self.state.lock();
        if let PlaybackState::Paused(id) = *state {
            self.player.resume()?;
            *state = PlaybackState::Playing(id);
        }
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        let mut state = self.state.lock();
        *state = PlaybackState::Stopped;
        self.player.stop()
    }

    pub fn position_seconds(&self) -> f64 {
        match self.state() {
            PlaybackState::Stopped => 0.0,
            _ => self.player.position_seconds(),
        }
    }

    pub fn seek(&self, seconds: f64) -> Result<()> {
        if self.state() == PlaybackState::Stopped {
            return Ok(());
        }
        self.player.seek(seconds.max(0.0))
    }
}
