use std::path::Path;
use std::sync::Arc;

use tracing::warn;
use walkdir::WalkDir;

use crate::cover::find_local_cover;
use crate::entry::NewEntry;
use crate::metadata::MetadataReader;

/// Recognized media extensions, compared case-insensitively.
pub const MEDIA_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "aac", "m4a"];

pub fn is_media_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            MEDIA_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
        .unwrap_or(false)
}

/// Turns media files on disk into catalog drafts.
pub struct Scanner {
    reader: Arc<dyn MetadataReader>,
}

impl Scanner {
    pub fn new(reader: Arc<dyn MetadataReader>) -> Self {
        Self { reader }
    }

    /// Builds a draft for a single file. Never fails: unreadable tags produce
    /// placeholder metadata.
    pub fn entry_for(&self, path: &Path) -> NewEntry {
        let tags = self.reader.read(path);
        NewEntry::new(path.to_path_buf(), tags).with_cover(find_local_cover(path))
    }

    /// Lazily walks `root` and yields a draft for every media file below it,
    /// in directory enumeration order.
    pub fn scan_tree<'a>(&'a self, root: &Path) -> impl Iterator<Item = NewEntry> + 'a {
        WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .filter_map(|item| match item {
                Ok(entry) => Some(entry),
                Err(err) => {
                    warn!("skipping unreadable entry during scan: {err}");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && is_media_file(entry.path()))
            .map(move |entry| self.entry_for(entry.path()))
    }
}
