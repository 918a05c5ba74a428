use std::path::Path;

use lofty::{Accessor, AudioFile, ItemKey, TaggedFileExt, read_from_path};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{MusdexError, Result};

pub const UNKNOWN_ARTIST: &str = "Unknown";
pub const UNKNOWN_ALBUM: &str = "Unknown";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackTags {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration_seconds: f64,
}

impl TrackTags {
    /// Tags derived from the file name alone.
    pub fn placeholder(path: &Path) -> Self {
        Self {
            title: file_stem(path),
            artist: UNKNOWN_ARTIST.into(),
            album: UNKNOWN_ALBUM.into(),
            duration_seconds: 0.0,
        }
    }
}

/// Best-effort tag extraction. Implementations never fail: on any error they
/// fall back to [`TrackTags::placeholder`].
#[cfg_attr(test, mockall::automock)]
pub trait MetadataReader: Send + Sync {
    fn read(&self, path: &Path) -> TrackTags;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoftyMetadataReader;

impl LoftyMetadataReader {
    pub fn new() -> Self {
        Self
    }

    pub fn probe(&self, path: &Path) -> Result<TrackTags> {
        let tagged = read_from_path(path).map_err(|err| MusdexError::Extraction {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        let duration_seconds = tagged.properties().duration().as_secs_f64();
        let mut tags = TrackTags::placeholder(path);
        tags.duration_seconds = duration_seconds;

        let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
            return Ok(tags);
        };

        if let Some(title) = non_empty(tag.title().as_deref()) {
            tags.title = title;
        }
        if let Some(artist) = non_empty(tag.get_string(&ItemKey::AlbumArtist))
            .or_else(|| non_empty(tag.artist().as_deref()))
        {
            tags.artist = artist;
        }
        if let Some(album) = non_empty(tag.album().as_deref()) {
            tags.album = album;
        }
        Ok(tags)
    }
}

impl MetadataReader for LoftyMetadataReader {
    fn read(&self, path: &Path) -> TrackTags {
        match self.probe(path) {
            Ok(tags) => tags,
            Err(err) => {
                warn!("{err}");
                TrackTags::placeholder(path)
            }
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
