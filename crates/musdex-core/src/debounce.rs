use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Per-path record of the last accepted notification.
///
/// One lock covers the whole table. It is never held across an await point or
/// while calling into the catalog store.
#[derive(Debug, Default)]
pub struct ChangeDebouncer {
    accepted: Mutex<HashMap<PathBuf, Instant>>,
}

impl ChangeDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` and records the current time when `path` has no record
    /// or its last accepted notification is older than `window`.
    pub fn should_process(&self, path: &Path, window: Duration) -> bool {
        self.should_process_at(path, window, Instant::now())
    }

    pub fn should_process_at(&self, path: &Path, window: Duration, now: Instant) -> bool {
        let mut accepted = self.accepted.lock();
        match accepted.get_mut(path) {
            Some(last) if now.saturating_duration_since(*last) <= window => false,
            Some(last) => {
                *last = now;
                true
            }
            None => {
                accepted.insert(path.to_path_buf(), now);
                true
            }
        }
    }

    pub fn clear(&self) {
        self.accepted.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.accepted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    const WINDOW: Duration = Duration::from_millis(300);

    #[test]
    fn burst_inside_window_is_suppressed() {
        let debouncer = ChangeDebouncer::new();
        let path = Path::new("track.mp3");
        let start = Instant::now();

        assert!(debouncer.should_process_at(path, WINDOW, start));
        assert!(!debouncer.should_process_at(path, WINDOW, start + Duration::from_millis(50)));
        assert!(debouncer.should_process_at(path, WINDOW, start + Duration::from_millis(1000)));
    }

    #[test]
    fn rejected_notifications_do_not_extend_the_window() {
        let debouncer = ChangeDebouncer::new();
        let path = Path::new("track.mp3");
        let start = Instant::now();

        assert!(debouncer.should_process_at(path, WINDOW, start));
        assert!(!debouncer.should_process_at(path, WINDOW, start + Duration::from_millis(200)));
        assert!(!debouncer.should_process_at(path, WINDOW, start + Duration::from_millis(300)));
        assert!(debouncer.should_process_at(path, WINDOW, start + Duration::from_millis(301)));
    }

    #[test]
    fn paths_are_tracked_independently() {
        let debouncer = ChangeDebouncer::new();
        let now = Instant::now();

        assert!(debouncer.should_process_at(Path::new("a.mp3"), WINDOW, now));
        assert!(debouncer.should_process_at(Path::new("b.mp3"), WINDOW, now));
        assert_eq!(debouncer.len(), 2);

        debouncer.clear();
        assert!(debouncer.is_empty());
        assert!(debouncer.should_process_at(Path::new("a.mp3"), WINDOW, now));
    }

    #[test]
    fn concurrent_callers_accept_exactly_once() {
        let debouncer = Arc::new(ChangeDebouncer::new());
        let now = Instant::now();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let debouncer = debouncer.clone();
                thread::spawn(move || {
                    debouncer.should_process_at(Path::new("same.flac"), WINDOW, now)
                })
            })
            .collect();

        let accepted = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .filter(|accepted| *accepted)
            .count();
        assert_eq!(accepted, 1);
    }
}
