pub use crate::config::{AppConfig, ConfigValidationError, SyncConfig};
pub use crate::debounce::ChangeDebouncer;
pub use crate::entry::{CatalogEntry, EntryId, NewEntry};
pub use crate::error::{MusdexError, Result};
pub use crate::metadata::{LoftyMetadataReader, MetadataReader, TrackTags};
pub use crate::playback::{AudioPlayer, PlaybackController, PlaybackState};
pub use crate::refresh::{BroadcastRefresh, CatalogEvent, NoopRefresh, RefreshHook};
pub use crate::scanner::{Scanner, is_media_file};
pub use crate::session::{FolderSessionManager, SessionStatus, SwitchReport};
pub use crate::store::{CatalogStore, SessionState, SledCatalogStore, SledSessionState};
pub use crate::sync::{FsEvent, SkipReason, SyncController, SyncOutcome};
pub use crate::watch::{NotifyWatchProvider, WatchGuard, WatchProvider};
