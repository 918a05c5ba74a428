use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::metadata::TrackTags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd)]
pub struct EntryId(pub u64);

impl EntryId {
    pub(crate) fn to_key(self) -> Vec<u8> {
        self.0.to_be_bytes().to_vec()
    }

    pub(crate) fn from_key(bytes: &[u8]) -> Option<Self> {
        let raw: [u8; 8] = bytes.try_into().ok()?;
        Some(Self(u64::from_be_bytes(raw)))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A cataloged media file as persisted by the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatalogEntry {
    pub id: EntryId,
    pub file_path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: f64,
    pub cover_ref: Option<String>,
    pub liked: bool,
    pub date_added: SystemTime,
}

impl CatalogEntry {
    pub fn tags(&self) -> TrackTags {
        TrackTags {
            title: self.title.clone(),
            artist: self.artist.clone(),
            album: self.album.clone(),
            duration_seconds: self.duration_seconds,
        }
    }

    /// Overwrites the display fields with freshly extracted tags.
    pub fn apply_tags(&mut self, tags: TrackTags) {
        self.title = tags.title;
        self.artist = tags.artist;
        self.album = tags.album;
        self.duration_seconds = tags.duration_seconds;
    }
}

/// An entry that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
    pub file_path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: f64,
    pub cover_ref: Option<String>,
}

impl NewEntry {
    pub fn new(file_path: PathBuf, tags: TrackTags) -> Self {
        Self {
            file_path,
            title: tags.title,
            artist: tags.artist,
            album: tags.album,
            duration_seconds: tags.duration_seconds,
            cover_ref: None,
        }
    }

    pub fn with_cover(mut self, cover_ref: Option<String>) -> Self {
        self.cover_ref = cover_ref;
        self
    }

    pub(crate) fn into_entry(self, id: EntryId, date_added: SystemTime) -> CatalogEntry {
        CatalogEntry {
            id,
            file_path: self.file_path,
            title: self.title,
            artist: self.artist,
            album: self.album,
            duration_seconds: self.duration_seconds.max(0.0),
            cover_ref: self.cover_ref,
            liked: false,
            date_added,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_key_keeps_numeric_order() {
        let low = EntryId(2).to_key();
        let high = EntryId(256).to_key();
        assert!(low < high);
        assert_eq!(EntryId::from_key(&high), Some(EntryId(256)));
        assert_eq!(EntryId::from_key(b"short"), None);
    }

    #[test]
    fn new_entry_clamps_negative_duration() {
        let tags = TrackTags {
            title: "Song".into(),
            artist: "Artist".into(),
            album: "Album".into(),
            duration_seconds: -3.0,
        };
        let entry = NewEntry::new("/music/song.mp3".into(), tags)
            .into_entry(EntryId(1), SystemTime::UNIX_EPOCH);
        assert_eq!(entry.duration_seconds, 0.0);
        assert!(!entry.liked);
    }
}
