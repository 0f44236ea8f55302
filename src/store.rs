// src/store.rs
//! State store: last observed signal per watch, read at the start of a run and
//! replaced at the end. Durability is best effort; a missing or unreadable
//! document is "no prior state", never an error.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;

use crate::signal::PersistedState;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state io error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("state encode error: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("another run holds the lock at {}", .0.display())]
    Locked(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// `None` on first run, and on any read/parse failure.
    async fn load(&self, key: &str) -> Option<PersistedState>;
    async fn save(&self, key: &str, state: &PersistedState) -> Result<(), StoreError>;
}

/// On-disk document. One entry per state key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    entries: BTreeMap<String, PersistedState>,
}

/// JSON file store. Saves go through a temp file in the same directory and a
/// rename, so readers see either the old or the new document.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_document(&self) -> Option<StateDocument> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "read state: {e}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "state file unparsable, treating as absent: {e}");
                None
            }
        }
    }

    async fn write_document(&self, doc: &StateDocument) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::io(dir, e))?;
        }

        let tmp = tmp_path(&self.path);
        fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StoreError::io(&tmp, e))?;
        if let Err(e) = fs::rename(&tmp, &self.path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(StoreError::io(&self.path, e));
        }
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "state".into());
    name.push(format!(".{}.tmp", std::process::id()));
    path.with_file_name(name)
}

#[async_trait]
impl StateStore for JsonFileStore {
    async fn load(&self, key: &str) -> Option<PersistedState> {
        self.read_document().await?.entries.remove(key)
    }

    async fn save(&self, key: &str, state: &PersistedState) -> Result<(), StoreError> {
        // Other watches sharing the file keep their entries; a corrupt file is replaced.
        let mut doc = self.read_document().await.unwrap_or_default();
        doc.entries.insert(key.to_string(), state.clone());
        self.write_document(&doc).await
    }
}

/// In-process store. Every process start is a first run.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, PersistedState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, key: &str) -> Option<PersistedState> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).cloned()
    }

    async fn save(&self, key: &str, state: &PersistedState) -> Result<(), StoreError> {
        // A panic elsewhere cannot leave the map half-written; keep using it.
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), state.clone());
        Ok(())
    }
}

/// Cross-process guard around one load → decide → save cycle. The lock file is
/// created exclusively and carries a per-acquisition token; it is only ever
/// removed by the holder of that token, or when it is older than `stale_after`
/// and still carries the token that was judged stale.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    token: String,
}

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

impl RunLock {
    pub fn lock_path_for(state_path: &Path) -> PathBuf {
        let mut name = state_path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "state".into());
        name.push(".lock");
        state_path.with_file_name(name)
    }

    pub fn acquire(path: impl Into<PathBuf>, stale_after: Duration) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }
        let token = new_token();

        match Self::create(&path, &token) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(StoreError::io(&path, e)),
        }

        // Read the holder before judging the age, so a lock recreated in
        // between is never mistaken for the stale one.
        if let Some(holder) = read_token(&path) {
            if !is_stale(&path, stale_after) {
                return Err(StoreError::Locked(path));
            }
            tracing::warn!(path = %path.display(), holder = %holder, "breaking stale run lock");
            let aside = side_path(&path, "stale", &token);
            match remove_if_held_by(&path, &holder, &aside) {
                Ok(true) => {}
                Ok(false) => return Err(StoreError::Locked(path)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        Self::create(&path, &token).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => StoreError::Locked(path.clone()),
            _ => StoreError::io(&path, e),
        })
    }

    fn create(path: &Path, token: &str) -> std::io::Result<Self> {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)?;
        if let Err(e) = writeln!(f, "{token}") {
            let _ = std::fs::remove_file(path);
            return Err(e);
        }
        Ok(Self {
            path: path.to_path_buf(),
            token: token.to_string(),
        })
    }
}

/// `<pid>-<nanos>-<seq>`: unique across processes and across acquisitions
/// within one process.
fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let seq = LOCK_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("{}-{nanos:x}-{seq}", std::process::id())
}

fn read_token(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn side_path(path: &Path, tag: &str, token: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "run.lock".into());
    name.push(format!(".{tag}.{token}"));
    path.with_file_name(name)
}

/// Move the lock at `path` to `aside` and delete it if it carries `expected`.
/// A lock held by someone else is linked back into place; `hard_link` refuses
/// to overwrite, so a lock created meanwhile is left alone.
fn remove_if_held_by(path: &Path, expected: &str, aside: &Path) -> std::io::Result<bool> {
    std::fs::rename(path, aside)?;
    let held = read_token(aside).as_deref() == Some(expected);
    if !held {
        let _ = std::fs::hard_link(aside, path);
    }
    std::fs::remove_file(aside)?;
    Ok(held)
}

fn is_stale(path: &Path, stale_after: Duration) -> bool {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| modified.elapsed().ok())
        .is_some_and(|age| age >= stale_after)
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let aside = side_path(&self.path, "release", &self.token);
        match remove_if_held_by(&self.path, &self.token, &aside) {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(path = %self.path.display(), "run lock was broken by another run, leaving it")
            }
            Err(e) => tracing::warn!(path = %self.path.display(), "release run lock: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::Signal;

    #[test]
    fn lock_path_sits_next_to_state() {
        assert_eq!(
            RunLock::lock_path_for(Path::new("state/watch_state.json")),
            PathBuf::from("state/watch_state.json.lock")
        );
    }

    #[test]
    fn second_lock_is_refused_until_released() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("s.json.lock");

        let first = RunLock::acquire(&p, Duration::from_secs(900)).unwrap();
        let second = RunLock::acquire(&p, Duration::from_secs(900));
        assert!(matches!(second, Err(StoreError::Locked(_))));

        drop(first);
        assert!(!p.exists());
        let _third = RunLock::acquire(&p, Duration::from_secs(900)).unwrap();
    }

    #[test]
    fn stale_lock_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("s.json.lock");
        std::fs::write(&p, "12345\n").unwrap();

        let lock = RunLock::acquire(&p, Duration::ZERO).unwrap();
        assert_eq!(read_token(&p).as_deref(), Some(lock.token.as_str()));
        drop(lock);
        assert!(!p.exists());
    }

    #[test]
    fn broken_lock_holder_cannot_release_its_successor() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("s.json.lock");

        let a = RunLock::acquire(&p, Duration::from_secs(900)).unwrap();
        // b judges a's lock stale and takes over
        let b = RunLock::acquire(&p, Duration::ZERO).unwrap();
        assert_ne!(a.token, b.token);

        drop(a);
        assert_eq!(read_token(&p).as_deref(), Some(b.token.as_str()));

        let c = RunLock::acquire(&p, Duration::from_secs(900));
        assert!(matches!(c, Err(StoreError::Locked(_))));

        drop(b);
        assert!(!p.exists());
        let names: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert!(names.is_empty(), "side files left behind: {names:?}");
    }

    #[test]
    fn stale_lock_is_not_broken_when_replaced_meanwhile() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("s.json.lock");
        std::fs::write(&p, "fresh-holder\n").unwrap();

        let aside = side_path(&p, "stale", "t");
        assert!(!remove_if_held_by(&p, "old-holder", &aside).unwrap());
        assert_eq!(read_token(&p).as_deref(), Some("fresh-holder"));
        assert!(!aside.exists());
    }

    #[tokio::test]
    async fn memory_store_survives_poisoned_mutex() {
        let store = MemoryStore::new();
        let poisoned = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = store.entries.lock().unwrap();
            panic!("writer died");
        }));
        assert!(poisoned.is_err());
        assert!(store.entries.is_poisoned());

        let s = PersistedState {
            signal: Signal::Boolean { available: true },
            last_notified_at: None,
        };
        store.save("k", &s).await.unwrap();
        assert_eq!(store.load("k").await, Some(s));
    }

    #[tokio::test]
    async fn entries_for_other_keys_survive_save() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested/state.json"));
        let a = PersistedState {
            signal: Signal::Boolean { available: true },
            last_notified_at: None,
        };
        let b = PersistedState {
            signal: Signal::Digest { hash: None },
            last_notified_at: None,
        };
        store.save("a", &a).await.unwrap();
        store.save("b", &b).await.unwrap();

        assert_eq!(store.load("a").await, Some(a));
        assert_eq!(store.load("b").await, Some(b));
        assert_eq!(store.load("c").await, None);
    }

    #[tokio::test]
    async fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state.json"));
        let s = PersistedState {
            signal: Signal::Boolean { available: false },
            last_notified_at: None,
        };
        store.save("k", &s).await.unwrap();
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }
}
