use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionResult, Transactional,
};
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};

use crate::entry::{CatalogEntry, EntryId, NewEntry};
use crate::error::{MusdexError, Result};

use super::{
    CatalogStore, Namespace, SCHEMA_VERSION, SessionState, decode, encode, path_key,
};

const SCHEMA_VERSION_KEY: &[u8] = b"schema_version";
const RESET_PENDING_KEY: &[u8] = b"reset_pending";
const ROOT_KEY: &[u8] = b"root";

struct Catalog {
    db: sled::Db,
    entries: sled::Tree,
    paths: sled::Tree,
    meta: sled::Tree,
    writer: Mutex<()>,
}

impl Catalog {
    fn open(db: sled::Db) -> Result<Self> {
        let tree = |namespace: Namespace| {
            db.open_tree(namespace.to_string().as_bytes())
                .map_err(|err| MusdexError::StoreUnavailable(format!("unable to open {namespace}: {err}")))
        };
        let catalog = Self {
            entries: tree(Namespace::Entries)?,
            paths: tree(Namespace::Paths)?,
            meta: tree(Namespace::Meta)?,
            db,
            writer: Mutex::new(()),
        };
        catalog.ensure_schema()?;
        catalog.finish_interrupted_reset()?;
        Ok(catalog)
    }

    fn ensure_schema(&self) -> Result<()> {
        let stored = self.meta.get(SCHEMA_VERSION_KEY).map_err(unavailable)?;
        match stored {
            Some(bytes) => {
                let version: u32 = decode(&bytes)?;
                if version > SCHEMA_VERSION {
                    return Err(MusdexError::StoreUnavailable(format!(
                        "catalog schema v{version} is newer than supported v{SCHEMA_VERSION}"
                    )));
                }
                Ok(())
            }
            None => self.write_schema_version(),
        }
    }

    /// Clears both trees. The marker in `meta` is written first and removed
    /// last, so a reset torn by a crash is completed on the next open.
    fn clear_all(&self) -> Result<()> {
        self.meta.insert(RESET_PENDING_KEY, vec![1u8]).map_err(storage)?;
        self.meta.flush().map_err(storage)?;
        self.paths.clear().map_err(storage)?;
        self.entries.clear().map_err(storage)?;
        self.write_schema_version()?;
        self.meta.remove(RESET_PENDING_KEY).map_err(storage)?;
        Ok(())
    }

    fn finish_interrupted_reset(&self) -> Result<()> {
        if self.meta.contains_key(RESET_PENDING_KEY).map_err(unavailable)? {
            warn!("completing a catalog reset interrupted by a previous shutdown");
            self.clear_all()?;
        }
        Ok(())
    }

    fn write_schema_version(&self) -> Result<()> {
        self.meta
            .insert(SCHEMA_VERSION_KEY, encode(&SCHEMA_VERSION)?)
            .map(|_| ())
            .map_err(storage)
    }

    fn load(&self, id: EntryId) -> Result<Option<CatalogEntry>> {
        match self.entries.get(id.to_key()).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }
}

/// sled-backed catalog: `entries` maps big-endian ids to JSON rows and
/// `paths` maps encoded file paths to ids.
#[derive(Clone)]
pub struct SledCatalogStore {
    inner: Arc<Catalog>,
}

impl SledCatalogStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let db = sled::open(path)
            .map_err(|err| MusdexError::StoreUnavailable(format!("unable to open sled db: {err}")))?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            inner: Arc::new(Catalog::open(db)?),
        })
    }

    pub fn db(&self) -> &sled::Db {
        &self.inner.db
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Catalog) -> Result<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        spawn_blocking(move || op(&inner))
            .await
            .map_err(|err| MusdexError::Store(format!("task join error: {err}")))?
    }
}

#[async_trait]
impl CatalogStore for SledCatalogStore {
    async fn insert(&self, entry: NewEntry) -> Result<EntryId> {
        self.blocking(move |catalog| {
            let id = EntryId(catalog.db.generate_id().map_err(storage)?);
            let record = entry.into_entry(id, SystemTime::now());
            let value = encode(&record)?;
            let key = path_key(&record.file_path);

            let _writer = catalog.writer.lock();
            finish(
                (&catalog.entries, &catalog.paths).transaction(|(entries, paths)| {
                    if paths.get(&key)?.is_some() {
                        return abort(MusdexError::DuplicateKey(record.file_path.clone()));
                    }
                    entries.insert(id.to_key(), value.clone())?;
                    paths.insert(key.clone(), id.to_key())?;
                    Ok(())
                }),
            )?;
            debug!("cataloged {} as {id}", record.file_path.display());
            Ok(id)
        })
        .await
    }

    async fn update(&self, entry: &CatalogEntry) -> Result<()> {
        let entry = entry.clone();
        self.blocking(move |catalog| {
            let id = entry.id;
            let _writer = catalog.writer.lock();
            finish(
                (&catalog.entries, &catalog.paths).transaction(|(entries, paths)| {
                    let Some(bytes) = entries.get(id.to_key())? else {
                        return abort(MusdexError::NotFound(id));
                    };
                    let stored: CatalogEntry =
                        decode(&bytes).map_err(ConflictableTransactionError::Abort)?;

                    let next = CatalogEntry {
                        id,
                        liked: stored.liked,
                        date_added: stored.date_added,
                        duration_seconds: entry.duration_seconds.max(0.0),
                        ..entry.clone()
                    };

                    if stored.file_path != next.file_path {
                        let new_key = path_key(&next.file_path);
                        if let Some(owner) = paths.get(&new_key)? {
                            if EntryId::from_key(&owner) != Some(id) {
                                return abort(MusdexError::DuplicateKey(next.file_path.clone()));
                            }
                        }
                        paths.remove(path_key(&stored.file_path))?;
                        paths.insert(new_key, id.to_key())?;
                    }

                    let value = encode(&next).map_err(ConflictableTransactionError::Abort)?;
                    entries.insert(id.to_key(), value)?;
                    Ok(())
                }),
            )
        })
        .await
    }

    async fn delete(&self, id: EntryId) -> Result<bool> {
        self.blocking(move |catalog| {
            let _writer = catalog.writer.lock();
            finish(
                (&catalog.entries, &catalog.paths).transaction(|(entries, paths)| {
                    let Some(bytes) = entries.remove(id.to_key())? else {
                        return Ok(false);
                    };
                    let stored: CatalogEntry =
                        decode(&bytes).map_err(ConflictableTransactionError::Abort)?;
                    paths.remove(path_key(&stored.file_path))?;
                    Ok(true)
                }),
            )
        })
        .await
    }

    async fn delete_by_path(&self, path: &Path) -> Result<bool> {
        let key = path_key(path);
        self.blocking(move |catalog| {
            let _writer = catalog.writer.lock();
            finish(
                (&catalog.entries, &catalog.paths).transaction(|(entries, paths)| {
                    let Some(id) = paths.remove(key.as_slice())? else {
                        return Ok(false);
                    };
                    entries.remove(id)?;
                    Ok(true)
                }),
            )
        })
        .await
    }

    async fn get(&self, id: EntryId) -> Result<Option<CatalogEntry>> {
        self.blocking(move |catalog| catalog.load(id)).await
    }

    async fn get_by_path(&self, path: &Path) -> Result<Option<CatalogEntry>> {
        let key = path_key(path);
        self.blocking(move |catalog| {
            let Some(id) = catalog.paths.get(&key).map_err(storage)? else {
                return Ok(None);
            };
            match EntryId::from_key(&id) {
                Some(id) => catalog.load(id),
                None => Err(MusdexError::Store("corrupt path index".into())),
            }
        })
        .await
    }

    async fn list_all(&self) -> Result<Vec<CatalogEntry>> {
        self.blocking(|catalog| {
            let mut results = Vec::with_capacity(catalog.entries.len());
            for item in catalog.entries.iter() {
                let (_, value) = item.map_err(storage)?;
                results.push(decode(&value)?);
            }
            Ok(results)
        })
        .await
    }

    async fn set_liked(&self, id: EntryId, liked: bool) -> Result<()> {
        self.blocking(move |catalog| {
            let _writer = catalog.writer.lock();
            let mut entry = catalog.load(id)?.ok_or(MusdexError::NotFound(id))?;
            entry.liked = liked;
            catalog
                .entries
                .insert(id.to_key(), encode(&entry)?)
                .map(|_| ())
                .map_err(storage)
        })
        .await
    }

    async fn count(&self) -> Result<usize> {
        self.blocking(|catalog| Ok(catalog.entries.len())).await
    }

    async fn reset(&self) -> Result<()> {
        self.blocking(|catalog| {
            let _writer = catalog.writer.lock();
            catalog.clear_all()?;
            info!("catalog reset");
            Ok(())
        })
        .await
    }
}

/// Remembered session root, kept in the `session` tree of the catalog database.
#[derive(Clone)]
pub struct SledSessionState {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledSessionState {
    pub fn new(store: &SledCatalogStore) -> Result<Self> {
        let db = store.db().clone();
        let tree = db
            .open_tree(Namespace::Session.to_string().as_bytes())
            .map_err(unavailable)?;
        Ok(Self { db, tree })
    }
}

#[async_trait]
impl SessionState for SledSessionState {
    async fn remembered_root(&self) -> Result<Option<PathBuf>> {
        let tree = self.tree.clone();
        spawn_blocking(move || match tree.get(ROOT_KEY).map_err(storage)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        })
        .await
        .map_err(|err| MusdexError::Store(format!("task join error: {err}")))?
    }

    async fn remember_root(&self, root: &Path) -> Result<()> {
        let value = encode(&root.to_path_buf())?;
        let db = self.db.clone();
        let tree = self.tree.clone();
        spawn_blocking(move || {
            tree.insert(ROOT_KEY, value).map_err(storage)?;
            db.flush().map(|_| ()).map_err(storage)
        })
        .await
        .map_err(|err| MusdexError::Store(format!("task join error: {err}")))?
    }
}

fn abort<T>(err: MusdexError) -> std::result::Result<T, ConflictableTransactionError<MusdexError>> {
    Err(ConflictableTransactionError::Abort(err))
}

fn finish<T>(result: TransactionResult<T, MusdexError>) -> Result<T> {
    result.map_err(|err| match err {
        TransactionError::Abort(err) => err,
        TransactionError::Storage(err) => storage(err),
    })
}

fn storage(err: sled::Error) -> MusdexError {
    MusdexError::Store(err.to_string())
}

fn unavailable(err: sled::Error) -> MusdexError {
    MusdexError::StoreUnavailable(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TrackTags;
    use tempfile::tempdir;

    fn test_store(path: &Path) -> Result<SledCatalogStore> {
        SledCatalogStore::open(path)
    }

    fn draft(path: &str, title: &str) -> NewEntry {
        NewEntry::new(
            PathBuf::from(path),
            TrackTags {
                title: title.into(),
                artist: "Artist".into(),
                album: "Album".into(),
                duration_seconds: 120.0,
            },
        )
    }

    #[tokio::test]
    async fn insert_and_lookup_by_path() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let id = store.insert(draft("/music/a.mp3", "A")).await.expect("insert");
        let fetched = store
            .get_by_path(Path::new("/music/a.mp3"))
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(fetched.id, id);
        assert_eq!(fetched.title, "A");
        assert!(!fetched.liked);
        assert_eq!(store.get(id).await.expect("get"), Some(fetched));
        assert_eq!(store.get_by_path(Path::new("/music/b.mp3")).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn duplicate_path_is_rejected() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        store.insert(draft("/music/a.mp3", "A")).await.expect("insert");
        let err = store
            .insert(draft("/music/a.mp3", "Again"))
            .await
            .expect_err("duplicate");
        assert!(matches!(err, MusdexError::DuplicateKey(path) if path == Path::new("/music/a.mp3")));
        assert_eq!(store.count().await.expect("count"), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_inserts_of_one_path_keep_a_single_row() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let tasks: Vec<_> = (0..8)
            .map(|idx| {
                let store = store.clone();
                tokio::spawn(async move { store.insert(draft("/music/race.flac", &format!("{idx}"))).await })
            })
            .collect();

        let mut inserted = 0;
        let mut duplicates = 0;
        for task in tasks {
            match task.await.expect("join") {
                Ok(_) => inserted += 1,
                Err(MusdexError::DuplicateKey(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(inserted, 1);
        assert_eq!(duplicates, 7);
        assert_eq!(store.list_all().await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn update_moves_path_and_keeps_user_fields() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let id = store.insert(draft("/music/old.mp3", "Old")).await.expect("insert");
        store.set_liked(id, true).await.expect("like");
        let original = store.get(id).await.expect("get").expect("present");

        let mut changed = original.clone();
        changed.file_path = PathBuf::from("/music/new.mp3");
        changed.title = "New".into();
        changed.liked = false;
        changed.date_added = SystemTime::UNIX_EPOCH;
        store.update(&changed).await.expect("update");

        let stored = store
            .get_by_path(Path::new("/music/new.mp3"))
            .await
            .expect("lookup")
            .expect("present");
        assert_eq!(stored.id, id);
        assert_eq!(stored.title, "New");
        assert!(stored.liked);
        assert_eq!(stored.date_added, original.date_added);
        assert_eq!(store.get_by_path(Path::new("/music/old.mp3")).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn update_rejects_missing_ids_and_taken_paths() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let a = store.insert(draft("/music/a.mp3", "A")).await.expect("insert");
        store.insert(draft("/music/b.mp3", "B")).await.expect("insert");

        let mut entry = store.get(a).await.expect("get").expect("present");
        entry.file_path = PathBuf::from("/music/b.mp3");
        assert!(matches!(
            store.update(&entry).await,
            Err(MusdexError::DuplicateKey(_))
        ));

        entry.id = EntryId(u64::MAX);
        assert!(matches!(
            store.update(&entry).await,
            Err(MusdexError::NotFound(id)) if id == EntryId(u64::MAX)
        ));
        assert!(matches!(
            store.set_liked(EntryId(u64::MAX), true).await,
            Err(MusdexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn deletes_are_exact_and_idempotent() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let a = store.insert(draft("/music/a.mp3", "A")).await.expect("insert");
        let b = store.insert(draft("/music/b.mp3", "B")).await.expect("insert");

        assert!(!store.delete_by_path(Path::new("/music/none.mp3")).await.expect("delete"));
        assert!(store.delete_by_path(Path::new("/music/a.mp3")).await.expect("delete"));
        assert!(!store.delete_by_path(Path::new("/music/a.mp3")).await.expect("delete"));
        assert_eq!(store.get(a).await.expect("get"), None);

        let remaining = store.list_all().await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, b);

        assert!(store.delete(b).await.expect("delete"));
        assert!(!store.delete(b).await.expect("delete"));
        assert_eq!(store.get_by_path(Path::new("/music/b.mp3")).await.expect("lookup"), None);
    }

    #[tokio::test]
    async fn reset_discards_all_entries() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        for idx in 1..=3 {
            store
                .insert(draft(&format!("/music/{idx:02}.mp3"), "T"))
                .await
                .expect("insert");
        }
        store.reset().await.expect("reset");

        assert_eq!(store.count().await.expect("count"), 0);
        assert_eq!(store.get_by_path(Path::new("/music/01.mp3")).await.expect("lookup"), None);
        store.insert(draft("/music/01.mp3", "T")).await.expect("insert after reset");
    }

    #[tokio::test]
    async fn interrupted_reset_is_completed_on_open() {
        let db = sled::Config::new().temporary(true).open().expect("temporary db");
        let store = SledCatalogStore::from_db(db.clone()).expect("store");
        store.insert(draft("/music/a.mp3", "A")).await.expect("insert");
        store.insert(draft("/music/b.mp3", "B")).await.expect("insert");
        drop(store);

        // Crash after the marker and the paths tree were cleared.
        let meta = db.open_tree(Namespace::Meta.to_string()).expect("meta");
        meta.insert(RESET_PENDING_KEY, vec![1u8]).expect("marker");
        db.open_tree(Namespace::Paths.to_string())
            .expect("paths")
            .clear()
            .expect("clear paths");

        let reopened = SledCatalogStore::from_db(db.clone()).expect("reopen");
        assert_eq!(reopened.count().await.expect("count"), 0);
        assert!(reopened.list_all().await.expect("list").is_empty());
        assert!(!meta.contains_key(RESET_PENDING_KEY).expect("marker lookup"));
        reopened
            .insert(draft("/music/a.mp3", "A"))
            .await
            .expect("insert after repair");
    }

    #[tokio::test]
    async fn durations_survive_storage_exactly() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let mut entry = draft("/music/long.flac", "Long");
        entry.duration_seconds = 122.73330532599999;
        let id = store.insert(entry).await.expect("insert");

        let stored = store.get(id).await.expect("get").expect("present");
        assert_eq!(stored.duration_seconds.to_bits(), 122.73330532599999f64.to_bits());
    }

    #[tokio::test]
    async fn list_all_is_ordered_by_id() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let mut ids = Vec::new();
        for name in ["c", "a", "b"] {
            ids.push(store.insert(draft(&format!("/music/{name}.mp3"), name)).await.expect("insert"));
        }
        let listed: Vec<EntryId> = store.list_all().await.expect("list").iter().map(|e| e.id).collect();
        assert_eq!(listed, ids);
    }

    #[tokio::test]
    async fn session_root_is_shared_across_handles() {
        let dir = tempdir().expect("tempdir");
        let store = test_store(dir.path()).expect("create store");

        let writer = SledSessionState::new(&store).expect("session");
        assert_eq!(writer.remembered_root().await.expect("load"), None);
        writer
            .remember_root(Path::new("/home/me/Music"))
            .await
            .expect("save");

        let reader = SledSessionState::new(&store).expect("session");
        assert_eq!(
            reader.remembered_root().await.expect("load"),
            Some(PathBuf::from("/home/me/Music"))
        );

        store.reset().await.expect("reset");
        assert!(reader.remembered_root().await.expect("load").is_some());
    }

    #[test]
    fn newer_schema_is_refused() {
        let db = sled::Config::new().temporary(true).open().expect("open");
        let meta = db.open_tree(Namespace::Meta.to_string().as_bytes()).expect("tree");
        meta.insert(SCHEMA_VERSION_KEY, encode(&(SCHEMA_VERSION + 1)).expect("encode"))
            .expect("insert");

        assert!(matches!(
            SledCatalogStore::from_db(db),
            Err(MusdexError::StoreUnavailable(_))
        ));
    }
}
