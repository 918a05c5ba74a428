use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

const FOLDER_COVERS: &[&str] = &[
    "cover.jpg",
    "cover.jpeg",
    "cover.png",
    "cover.webp",
    "folder.jpg",
    "folder.jpeg",
    "folder.png",
    "AlbumArtSmall.jpg",
];

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Looks for a cover image next to `track` and returns its path as an opaque
/// cover reference.
pub fn find_local_cover(track: &Path) -> Option<String> {
    let dir = track.parent()?;
    candidate_paths(dir, track.file_stem())
        .into_iter()
        .find(|candidate| is_non_empty_file(candidate))
        .map(|candidate| candidate.to_string_lossy().into_owned())
}

fn candidate_paths(dir: &Path, stem: Option<&OsStr>) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = FOLDER_COVERS.iter().map(|name| dir.join(name)).collect();

    if let Some(stem) = stem.and_then(|s| s.to_str()) {
        for ext in IMAGE_EXTENSIONS {
            paths.push(dir.join(format!("{stem}.{ext}")));
        }
    }

    paths
}

fn is_non_empty_file(path: &Path) -> bool {
    fs::metadata(path)
        .map(|meta| meta.is_file() && meta.len() > 0)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn folder_cover_wins_over_track_named_image() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("song.mp3");
        fs::write(dir.path().join("song.png"), [9u8, 9]).expect("track cover");
        fs::write(dir.path().join("folder.jpg"), [1u8, 2, 3]).expect("folder cover");

        let found = find_local_cover(&track).expect("cover");
        assert!(found.ends_with("folder.jpg"));
    }

    #[test]
    fn empty_images_are_ignored() {
        let dir = tempdir().expect("tempdir");
        let track = dir.path().join("song.mp3");
        fs::write(dir.path().join("cover.jpg"), []).expect("empty cover");

        assert_eq!(find_local_cover(&track), None);

        fs::write(dir.path().join("song.webp"), [1u8]).expect("track cover");
        let found = find_local_cover(&track).expect("cover");
        assert!(found.ends_with("song.webp"));
    }
}
