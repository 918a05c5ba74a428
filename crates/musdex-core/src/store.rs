use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};

use crate::entry::{CatalogEntry, EntryId, NewEntry};
use crate::error::{MusdexError, Result};

mod sled_store;
pub use sled_store::{SledCatalogStore, SledSessionState};

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Entries,
    Paths,
    Meta,
    Session,
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use Namespace::*;
        let value = match self {
            Entries => "entries",
            Paths => "paths",
            Meta => "meta",
            Session => "session",
        };
        f.write_str(value)
    }
}

/// Durable catalog of media entries keyed by a surrogate id, with a unique
/// constraint on the file path.
///
/// Writers are serialized inside the implementation; callers never need to
/// check for duplicates before inserting.
#[async_trait]
pub trait CatalogStore: Send + Sync + 'static {
    /// Fails with [`MusdexError::DuplicateKey`] if the path is already cataloged.
    async fn insert(&self, entry: NewEntry) -> Result<EntryId>;
    /// Replaces the display fields, path and cover of an existing entry.
    /// `liked` and `date_added` are kept from the stored row.
    async fn update(&self, entry: &CatalogEntry) -> Result<()>;
    /// Returns `false` when nothing was stored under `id`.
    async fn delete(&self, id: EntryId) -> Result<bool>;
    /// Returns `false` when nothing was stored under `path`.
    async fn delete_by_path(&self, path: &Path) -> Result<bool>;
    async fn get(&self, id: EntryId) -> Result<Option<CatalogEntry>>;
    async fn get_by_path(&self, path: &Path) -> Result<Option<CatalogEntry>>;
    async fn list_all(&self) -> Result<Vec<CatalogEntry>>;
    async fn set_liked(&self, id: EntryId, liked: bool) -> Result<()>;
    async fn count(&self) -> Result<usize>;
    /// Drops every entry and restores the empty schema.
    async fn reset(&self) -> Result<()>;
}

/// The remembered session root, read at startup and written on folder switch.
#[async_trait]
pub trait SessionState: Send + Sync + 'static {
    async fn remembered_root(&self) -> Result<Option<PathBuf>>;
    async fn remember_root(&self, root: &Path) -> Result<()>;
}

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|err| MusdexError::Store(err.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| MusdexError::Store(err.to_string()))
}

pub(crate) fn path_key(path: &Path) -> Vec<u8> {
    path.as_os_str().as_encoded_bytes().to_vec()
}
