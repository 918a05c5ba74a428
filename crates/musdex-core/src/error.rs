use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::entry::EntryId;

#[derive(Debug, Error)]
pub enum MusdexError {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigValidationError),
    #[error("path already cataloged: {}", .0.display())]
    DuplicateKey(PathBuf),
    #[error("catalog entry {0} not found")]
    NotFound(EntryId),
    #[error("metadata extraction failed for {}: {reason}", .path.display())]
    Extraction { path: PathBuf, reason: String },
    #[error("unable to watch folder: {0}")]
    WatchSetup(String),
    #[error("catalog store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("catalog store error: {0}")]
    Store(String),
    #[error("playback failed: {0}")]
    Playback(String),
    #[error("not a directory: {}", .0.display())]
    InvalidRoot(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = MusdexError> = std::result::Result<T, E>;
