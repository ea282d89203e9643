//! Persistence Manager
//!
//! Owns the open cache file. The file is read once, with blocking I/O, when a
//! connection starts; after that it is only ever rewritten in full (truncate,
//! then write the whole document).
//!
//! Background saves are debounced through a single save slot:
//!
//! ```text
//!   Idle ──schedule──▶ Scheduled ──debounce elapsed──▶ InFlight ──finish──▶ Idle
//!     ▲                    │
//!     └──cancel_pending────┘
//! ```
//!
//! A `schedule` call while the slot is not idle is a no-op, so a burst of
//! mutations produces one rewrite.

use std::fs::OpenOptions;
use std::future::Future;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Store;
use crate::error::{CacheError, Result};

/// Shared handle to the cache file, `None` once closed.
pub type FileHandle = Arc<Mutex<Option<File>>>;

/// Report of a background save that could not be written.
#[derive(Debug, Clone)]
pub struct SaveFailure {
    /// Cache file path
    pub path: PathBuf,
    /// Underlying error message
    pub message: String,
    /// Failure timestamp (Unix milliseconds)
    pub at: u64,
}

#[derive(Debug, Default)]
enum SaveSlot {
    #[default]
    Idle,
    Scheduled(JoinHandle<()>),
    InFlight,
}

/// The open cache file plus its debounced save slot.
#[derive(Debug)]
pub struct Persistence {
    path: PathBuf,
    file: FileHandle,
    slot: SaveSlot,
}

impl Persistence {
    // == Open ==
    /// Opens the cache file, creating it when missing, and restores its content.
    ///
    /// An empty file restores as an empty store. Anything else must parse as a
    /// complete cache document or the whole restore fails.
    pub fn open(path: &Path) -> Result<(Self, Store)> {
        let restore_error = |source: io::Error| CacheError::Restore {
            path: path.to_path_buf(),
            source,
        };

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(restore_error)?;
        let store = restore(&mut file).map_err(restore_error)?;

        info!(
            path = %path.display(),
            entries = store.len(),
            segments = store.segment_count(),
            byte_size = store.byte_size(),
            "Cache file restored"
        );

        let persistence = Self {
            path: path.to_path_buf(),
            file: Arc::new(Mutex::new(Some(File::from_std(file)))),
            slot: SaveSlot::Idle,
        };
        Ok((persistence, store))
    }

    /// Cache file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a save is scheduled or being written.
    pub fn is_save_pending(&self) -> bool {
        !matches!(self.slot, SaveSlot::Idle)
    }

    // == Schedule Save ==
    /// Runs `save` once `debounce` has elapsed, unless a save is already pending.
    ///
    /// Returns whether a new save was scheduled. `save` is expected to call
    /// [`Persistence::begin_save`] and later [`Persistence::finish_save`].
    pub fn schedule<F, Fut>(&mut self, debounce: Duration, save: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_save_pending() {
            return false;
        }

        self.slot = SaveSlot::Scheduled(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            save().await;
        }));
        true
    }

    /// Swaps the open file for `file`, e.g. a handle that refuses writes.
    #[cfg(test)]
    pub(crate) fn replace_file(&mut self, file: File) {
        self.file = Arc::new(Mutex::new(Some(file)));
    }

    /// Marks the scheduled save as being written and hands out the file.
    pub fn begin_save(&mut self) -> FileHandle {
        self.slot = SaveSlot::InFlight;
        Arc::clone(&self.file)
    }

    /// Frees the save slot after a background write completed.
    pub fn finish_save(&mut self) {
        if matches!(self.slot, SaveSlot::InFlight) {
            self.slot = SaveSlot::Idle;
        }
    }

    /// Cancels a scheduled save that has not started writing.
    pub fn cancel_pending(&mut self) -> bool {
        if !matches!(self.slot, SaveSlot::Scheduled(_)) {
            return false;
        }

        if let SaveSlot::Scheduled(handle) = std::mem::take(&mut self.slot) {
            handle.abort();
            debug!(path = %self.path.display(), "Pending save cancelled");
        }
        true
    }

    // == Save Now ==
    /// Rewrites the file with `document`, superseding any scheduled save.
    pub async fn save_now(&mut self, document: &[u8]) -> Result<()> {
        self.cancel_pending();
        write_snapshot(&self.file, document).await?;
        Ok(())
    }

    // == Close ==
    /// Syncs and closes the file. Later writes through old handles are skipped.
    pub async fn close(self) -> Result<()> {
        let file = self.file.lock().await.take();
        if let Some(file) = file {
            file.sync_all().await?;
        }
        debug!(path = %self.path.display(), "Cache file closed");
        Ok(())
    }
}

impl Drop for Persistence {
    fn drop(&mut self) {
        if let SaveSlot::Scheduled(handle) = &self.slot {
            handle.abort();
        }
    }
}

/// Reads the whole file and parses it as a cache document.
fn restore(file: &mut std::fs::File) -> io::Result<Store> {
    let mut content = Vec::new();
    file.read_to_end(&mut content)?;

    if content.is_empty() {
        return Ok(Store::new());
    }

    Store::from_json(&content).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

// == Write Snapshot ==
/// Replaces the file content with `document`.
///
/// Returns `Ok(false)` without writing when the handle was already closed.
pub async fn write_snapshot(file: &FileHandle, document: &[u8]) -> io::Result<bool> {
    let mut guard = file.lock().await;
    let Some(file) = guard.as_mut() else {
        return Ok(false);
    };

    file.set_len(0).await?;
    file.rewind().await?;
    file.write_all(document).await?;
    file.flush().await?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Envelope, Key};
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn cache_path(dir: &TempDir) -> PathBuf {
        dir.path().join("catbox.json")
    }

    #[tokio::test]
    async fn test_open_creates_missing_file() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);

        let (persistence, store) = Persistence::open(&path).unwrap();

        assert!(path.exists());
        assert!(store.is_empty());
        assert!(!persistence.is_save_pending());
        assert_eq!(persistence.path(), path.as_path());
    }

    #[tokio::test]
    async fn test_open_restores_document() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        fs::write(
            &path,
            r#"{"seg":{"a":{"item":"\"x\"","stored":1,"ttl":2,"byteSize":58},"b":{"item":"1","stored":1,"ttl":2}}}"#,
        )
        .unwrap();

        let (_persistence, store) = Persistence::open(&path).unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.byte_size(), 58);
        assert_eq!(store.get(&Key::new("seg", "b")).unwrap().item, "1");
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_document() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        fs::write(&path, "{\"seg\": {").unwrap();

        let result = Persistence::open(&path);

        match result {
            Err(CacheError::Restore { path: failed, source }) => {
                assert_eq!(failed, path);
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("expected Restore error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_open_rejects_overflowing_byte_sizes() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        fs::write(
            &path,
            r#"{"s":{"a":{"item":"1","stored":1,"ttl":1,"byteSize":18446744073709551615},"b":{"item":"2","stored":1,"ttl":1,"byteSize":18446744073709551615}}}"#,
        )
        .unwrap();

        let result = Persistence::open(&path);

        match result {
            Err(CacheError::Restore { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidData);
            }
            other => panic!("expected Restore error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_write_snapshot_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        let (mut persistence, _) = Persistence::open(&path).unwrap();

        persistence
            .save_now(br#"{"long":{"entry":{"item":"\"aaaaaaaaaa\"","stored":1,"ttl":1}}}"#)
            .await
            .unwrap();
        persistence.save_now(b"{}").await.unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_write_after_close_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        let (mut persistence, _) = Persistence::open(&path).unwrap();
        persistence.save_now(b"{}").await.unwrap();

        let handle = persistence.begin_save();
        persistence.close().await.unwrap();

        assert!(!write_snapshot(&handle, b"{\"late\":{}}").await.unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
    }

    #[tokio::test]
    async fn test_schedule_is_debounced() {
        let dir = TempDir::new().unwrap();
        let (mut persistence, _) = Persistence::open(&cache_path(&dir)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        assert!(persistence.schedule(Duration::from_millis(20), move || async move {
            let _ = first.send(1);
        }));
        let second = tx.clone();
        assert!(!persistence.schedule(Duration::from_millis(20), move || async move {
            let _ = second.send(2);
        }));
        assert!(persistence.is_save_pending());

        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(rx.try_recv().unwrap(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_pending_save() {
        let dir = TempDir::new().unwrap();
        let (mut persistence, _) = Persistence::open(&cache_path(&dir)).unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();

        persistence.schedule(Duration::from_millis(20), move || async move {
            let _ = tx.send(());
        });
        assert!(persistence.cancel_pending());
        assert!(!persistence.is_save_pending());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_in_flight_save_blocks_new_schedule_until_finished() {
        let dir = TempDir::new().unwrap();
        let (mut persistence, _) = Persistence::open(&cache_path(&dir)).unwrap();

        let _handle = persistence.begin_save();
        assert!(!persistence.schedule(Duration::from_millis(1), || async {}));
        // In-flight writes are not cancellable
        assert!(!persistence.cancel_pending());

        persistence.finish_save();
        assert!(!persistence.is_save_pending());
        assert!(persistence.schedule(Duration::from_millis(1), || async {}));
    }

    #[tokio::test]
    async fn test_restore_after_save() {
        let dir = TempDir::new().unwrap();
        let path = cache_path(&dir);
        let key = Key::new("seg", "a");

        let (mut persistence, mut store) = Persistence::open(&path).unwrap();
        let envelope = Envelope::encode(&key, "123", Duration::from_secs(60), true).unwrap();
        store.insert(&key, envelope.clone(), 0).unwrap();
        persistence.save_now(&store.to_json().unwrap()).await.unwrap();
        persistence.close().await.unwrap();

        let (_persistence, restored) = Persistence::open(&path).unwrap();
        assert_eq!(restored.get(&key), Some(&envelope));
        assert_eq!(restored.byte_size(), envelope.accounted_size());
    }
}
