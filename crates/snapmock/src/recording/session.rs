//! Capture session lifecycle: directory creation, metadata, the `latest`
//! pointer, listing, resolution and deletion.

use super::latest::{self, LatestPointer, LATEST_NAME};
use super::mode::CaptureMode;
use super::query::{RecordingFilter, RecordingPage};
use super::store::{write_json_atomic, RecordingStore};
use super::transfer;
use super::types::Recording;
use crate::error::{Error, Result};
use crate::filter::FilterConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};

pub const META_FILE: &str = "meta.json";

/// Contents of `<sessionDir>/meta.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub name: String,
    pub dir_name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub port: u16,
    pub mode: CaptureMode,
    pub recording_count: usize,
    /// Sorted, deduplicated
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
}

/// A session found on disk
#[derive(Debug, Clone)]
pub struct SessionEntry {
    pub path: PathBuf,
    pub meta: SessionMeta,
}

/// End-of-session report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub name: String,
    pub dir_name: String,
    pub path: PathBuf,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
    pub recording_count: usize,
    pub hosts: Vec<String>,
}

/// Parameters for a new session
#[derive(Debug, Clone)]
pub struct NewSession {
    pub name: String,
    pub port: u16,
    pub mode: CaptureMode,
    pub filter: Option<FilterConfig>,
}

/// Owns the sessions base directory and its `latest` pointer.
pub struct SessionManager {
    base_dir: PathBuf,
    pointer: Box<dyn LatestPointer>,
}

impl SessionManager {
    /// Open (creating if needed) the sessions base directory.
    pub fn new(base_dir: impl Into<PathBuf>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| Error::store(&base_dir, e))?;
        let pointer = latest::detect(&base_dir);
        debug!(
            "Session base {:?} uses {} latest pointer",
            base_dir,
            pointer.kind()
        );
        Ok(Self { base_dir, pointer })
    }

    /// Use an explicit pointer backing instead of probing.
    pub fn with_pointer(base_dir: impl Into<PathBuf>, pointer: Box<dyn LatestPointer>) -> Result<Self> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir).map_err(|e| Error::store(&base_dir, e))?;
        Ok(Self { base_dir, pointer })
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create the session directory and write the initial `meta.json`.
    ///
    /// The session is discoverable by readers as soon as this returns.
    pub fn create_session(&self, params: NewSession) -> Result<RecordingStore> {
        let start_time = Utc::now();
        let base_name = format!(
            "{}_{}",
            sanitize_session_name(&params.name),
            start_time.format("%Y%m%d-%H%M%S")
        );

        let (dir_name, path) = self.claim_dir(&base_name)?;
        let meta = SessionMeta {
            name: params.name,
            dir_name,
            start_time,
            end_time: None,
            port: params.port,
            mode: params.mode,
            recording_count: 0,
            hosts: Vec::new(),
            filter: params.filter.filter(|f| !f.is_empty()),
        };
        init_or_remove(&path, || write_json_atomic(&path.join(META_FILE), &meta))?;
        info!("Session '{}' created at {:?}", meta.name, path);
        Ok(RecordingStore::new(path, meta))
    }

    /// Finalize `store` and make it the `latest` session.
    pub fn finalize(&self, store: &RecordingStore) -> Result<SessionSummary> {
        let meta = store.finalize()?;
        self.pointer.update(&meta.dir_name)?;

        let end_time = meta.end_time.unwrap_or_else(Utc::now);
        let summary = SessionSummary {
            name: meta.name.clone(),
            dir_name: meta.dir_name.clone(),
            path: store.dir().to_path_buf(),
            start_time: meta.start_time,
            end_time,
            duration_secs: (end_time - meta.start_time).num_seconds(),
            recording_count: meta.recording_count,
            hosts: meta.hosts.clone(),
        };
        info!(
            "Session '{}' finished: {} recording(s) across {} host(s) in {}s",
            summary.name,
            summary.recording_count,
            summary.hosts.len(),
            summary.duration_secs
        );
        Ok(summary)
    }

    /// Directory name of the most recent finalized session
    pub fn latest(&self) -> Result<Option<String>> {
        self.pointer.read()
    }

    /// All sessions with a readable `meta.json`, oldest first.
    pub fn list_sessions(&self) -> Result<Vec<SessionEntry>> {
        list_sessions(&self.base_dir)
    }

    /// Resolve `"latest"` or a session name/prefix to a directory.
    pub fn resolve(&self, name_or_latest: &str) -> Result<PathBuf> {
        resolve_session_dir(&self.base_dir, name_or_latest)
    }

    /// Open a session's store, loading its recordings from disk.
    pub fn open(&self, name_or_latest: &str) -> Result<RecordingStore> {
        RecordingStore::open(self.resolve(name_or_latest)?)
    }

    /// List recordings of the session named in `filter` (default: latest).
    pub fn list_recordings(&self, filter: &RecordingFilter) -> Result<RecordingPage> {
        let session = filter.session.as_deref().unwrap_or("latest");
        let store = self.open(session)?;
        store.list(filter)
    }

    /// Delete a session directory. Deleting a missing session is not an error.
    ///
    /// If `latest` referred to it, the pointer moves to the newest remaining
    /// session or is removed.
    pub fn delete_session(&self, dir_name: &str) -> Result<()> {
        let not_a_session = || Error::not_found(format!("session '{dir_name}'"));
        let mut components = Path::new(dir_name).components();
        let single_name = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_name || dir_name == LATEST_NAME {
            return Err(not_a_session());
        }

        let path = self.base_dir.join(dir_name);
        match fs::symlink_metadata(&path) {
            Ok(md) if md.is_dir() && path.join(META_FILE).is_file() => {}
            Ok(_) => return Err(not_a_session()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::store(&path, e)),
        }
        match fs::remove_dir_all(&path) {
            Ok(()) => info!("Deleted session {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Session {:?} already deleted", path)
            }
            Err(e) => return Err(Error::store(&path, e)),
        }
        self.repair_latest()
    }

    /// Delete every session and the `latest` pointer.
    pub fn clear(&self) -> Result<usize> {
        let sessions = self.list_session_dirs()?;
        for dir in &sessions {
            match fs::remove_dir_all(dir) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::store(dir, e)),
            }
        }
        self.pointer.clear()?;
        info!("Cleared {} session(s) from {:?}", sessions.len(), self.base_dir);
        Ok(sessions.len())
    }

    /// Re-hydrate a new session directory from exported recordings,
    /// keeping their IDs. The imported session becomes `latest`.
    pub async fn import(&self, name: &str, recordings: Vec<Recording>) -> Result<RecordingStore> {
        let recordings = transfer::importable(recordings);
        let store = self.create_session(NewSession {
            name: name.to_string(),
            port: 0,
            mode: CaptureMode::Record,
            filter: None,
        })?;
        for recording in recordings {
            if let Err(e) = store.add_recording(recording).await {
                if let Err(cleanup) = fs::remove_dir_all(store.dir()) {
                    warn!("Failed to remove partial import {:?}: {}", store.dir(), cleanup);
                }
                return Err(e);
            }
        }
        self.finalize(&store)?;
        Ok(store)
    }

    fn claim_dir(&self, base_name: &str) -> Result<(String, PathBuf)> {
        for attempt in 1..=1000u32 {
            let dir_name = if attempt == 1 {
                base_name.to_string()
            } else {
                format!("{base_name}_{attempt}")
            };
            let path = self.base_dir.join(&dir_name);
            match fs::create_dir(&path) {
                Ok(()) => return Ok((dir_name, path)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(Error::store(&path, e)),
            }
        }
        Err(Error::store(
            self.base_dir.join(base_name),
            io::Error::new(io::ErrorKind::AlreadyExists, "no free session directory name"),
        ))
    }

    fn repair_latest(&self) -> Result<()> {
        if self.pointer.read()?.is_some() {
            return Ok(());
        }
        match list_sessions(&self.base_dir)?.last() {
            Some(newest) => self.pointer.update(&newest.meta.dir_name),
            None => self.pointer.clear(),
        }
    }

    fn list_session_dirs(&self) -> Result<Vec<PathBuf>> {
        session_dirs(&self.base_dir)
    }
}

/// Scan `base_dir` for sessions; directories without a readable `meta.json`
/// are skipped.
pub fn list_sessions(base_dir: &Path) -> Result<Vec<SessionEntry>> {
    let mut sessions = Vec::new();
    for path in session_dirs(base_dir)? {
        match read_meta(&path) {
            Ok(meta) => sessions.push(SessionEntry { path, meta }),
            Err(e) => warn!("Skipping session {:?}: {}", path, e),
        }
    }
    sessions.sort_by(|a, b| {
        a.meta
            .start_time
            .cmp(&b.meta.start_time)
            .then_with(|| a.meta.dir_name.cmp(&b.meta.dir_name))
    });
    Ok(sessions)
}

/// Resolve `"latest"`, an exact directory name, or a name prefix.
///
/// Prefix matches prefer `<name>_<timestamp>` directories and pick the
/// newest when several match.
pub fn resolve_session_dir(base_dir: &Path, name_or_latest: &str) -> Result<PathBuf> {
    if name_or_latest == LATEST_NAME {
        return latest::read_latest(base_dir)?
            .map(|dir| base_dir.join(dir))
            .ok_or_else(|| Error::not_found("latest session"));
    }

    let exact = base_dir.join(name_or_latest);
    if !name_or_latest.is_empty() && exact.join(META_FILE).is_file() {
        return Ok(exact);
    }

    let sessions = list_sessions(base_dir)?;
    let sanitized = sanitize_session_name(name_or_latest);
    let by_name = format!("{sanitized}_");
    let newest = |pred: &dyn Fn(&SessionEntry) -> bool| {
        sessions.iter().filter(|s| pred(s)).last().map(|s| s.path.clone())
    };

    newest(&|s| s.meta.dir_name.starts_with(&by_name))
        .or_else(|| newest(&|s| s.meta.dir_name.starts_with(name_or_latest)))
        .ok_or_else(|| Error::not_found(format!("session '{name_or_latest}'")))
}

pub fn read_meta(session_dir: &Path) -> Result<SessionMeta> {
    let path = session_dir.join(META_FILE);
    let data = fs::read_to_string(&path).map_err(|e| Error::store(&path, e))?;
    serde_json::from_str(&data).map_err(|e| Error::corrupt(&path, e))
}

pub fn write_meta(session_dir: &Path, meta: &SessionMeta) -> Result<()> {
    write_json_atomic(&session_dir.join(META_FILE), meta)
}

/// Session names become directory prefixes; keep them filesystem-safe.
pub fn sanitize_session_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' => c,
            _ => '-',
        })
        .collect();
    if cleaned.is_empty() {
        "session".to_string()
    } else {
        cleaned
    }
}

/// Run `init` on a freshly claimed directory, removing the directory if
/// `init` fails.
fn init_or_remove<T>(dir: &Path, init: impl FnOnce() -> Result<T>) -> Result<T> {
    init().inspect_err(|_| {
        if let Err(cleanup) = fs::remove_dir_all(dir) {
            warn!("Failed to remove incomplete session {:?}: {}", dir, cleanup);
        }
    })
}

fn session_dirs(base_dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(Error::store(base_dir, e)),
    };
    let mut dirs = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| Error::store(base_dir, e))?;
        let file_type = entry.file_type().map_err(|e| Error::store(entry.path(), e))?;
        // `latest` may be a symlink to a session; only real directories count
        if file_type.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::latest::FilePointer;
    use crate::recording::test_support::sample_recording;
    use tempfile::TempDir;

    fn new_session(name: &str) -> NewSession {
        NewSession {
            name: name.to_string(),
            port: 8888,
            mode: CaptureMode::Record,
            filter: None,
        }
    }

    #[test]
    fn test_create_session_writes_meta_immediately() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let store = manager.create_session(new_session("checkout flow")).unwrap();

        let meta = read_meta(store.dir()).unwrap();
        assert_eq!(meta.name, "checkout flow");
        assert!(meta.dir_name.starts_with("checkout-flow_"));
        assert_eq!(meta.recording_count, 0);
        assert!(meta.end_time.is_none());
        assert_eq!(list_sessions(tmp.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_session_dirs_are_unique() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let a = manager.create_session(new_session("same")).unwrap();
        let b = manager.create_session(new_session("same")).unwrap();
        assert_ne!(a.dir(), b.dir());
    }

    #[test]
    fn test_filter_snapshot_is_kept() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let filter = FilterConfig {
            exclude_hosts: vec!["*.internal.test".into()],
            ..Default::default()
        };
        let store = manager
            .create_session(NewSession {
                filter: Some(filter.clone()),
                ..new_session("filtered")
            })
            .unwrap();
        assert_eq!(read_meta(store.dir()).unwrap().filter, Some(filter));
    }

    #[tokio::test]
    async fn test_finalize_updates_meta_and_latest() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let store = manager.create_session(new_session("api")).unwrap();
        store
            .add_recording(sample_recording("GET", "api.test", "/users/1", 200))
            .await
            .unwrap();
        store
            .add_recording(sample_recording("GET", "cdn.test", "/logo.png", 200))
            .await
            .unwrap();

        let summary = manager.finalize(&store).unwrap();
        assert_eq!(summary.recording_count, 2);
        assert_eq!(summary.hosts, vec!["api.test", "cdn.test"]);

        let meta = read_meta(store.dir()).unwrap();
        assert!(meta.end_time.is_some());
        assert_eq!(meta.recording_count, 2);
        assert_eq!(manager.latest().unwrap(), Some(meta.dir_name.clone()));
        assert_eq!(manager.resolve("latest").unwrap(), store.dir());
    }

    #[test]
    fn test_meta_round_trips_byte_for_byte() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let store = manager.create_session(new_session("rt")).unwrap();
        let path = store.dir().join(META_FILE);
        let original = fs::read_to_string(&path).unwrap();
        let meta = read_meta(store.dir()).unwrap();
        write_meta(store.dir(), &meta).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), original);
    }

    #[test]
    fn test_list_skips_unreadable_sessions() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        manager.create_session(new_session("good")).unwrap();
        fs::create_dir(tmp.path().join("no-meta")).unwrap();
        fs::create_dir(tmp.path().join("bad-meta")).unwrap();
        fs::write(tmp.path().join("bad-meta").join(META_FILE), "{not json").unwrap();

        let sessions = manager.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].meta.name, "good");
    }

    #[test]
    fn test_list_missing_base_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(list_sessions(&tmp.path().join("nope")).unwrap().is_empty());
    }

    #[test]
    fn test_resolve_by_name_and_prefix() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let first = manager.create_session(new_session("orders")).unwrap();
        let second = manager.create_session(new_session("orders")).unwrap();
        let other = manager.create_session(new_session("orders-v2")).unwrap();

        // Exact directory name
        let dir_name = first.meta().dir_name;
        assert_eq!(manager.resolve(&dir_name).unwrap(), first.dir());
        // Name resolves to the newest `orders_*`, not `orders-v2_*`
        assert_eq!(manager.resolve("orders").unwrap(), second.dir());
        // Plain prefix
        assert_eq!(manager.resolve("orders-v").unwrap(), other.dir());
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let err = manager.resolve("missing").unwrap_err();
        assert!(err.is_not_found());
        let err = manager.resolve("latest").unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_delete_is_idempotent_and_repairs_latest() {
        let tmp = TempDir::new().unwrap();
        let manager =
            SessionManager::with_pointer(tmp.path(), Box::new(FilePointer::new(tmp.path())))
                .unwrap();
        let older = manager.create_session(new_session("a")).unwrap();
        manager.finalize(&older).unwrap();
        let newer = manager.create_session(new_session("b")).unwrap();
        manager.finalize(&newer).unwrap();
        assert_eq!(manager.latest().unwrap(), Some(newer.meta().dir_name));

        manager.delete_session(&newer.meta().dir_name).unwrap();
        manager.delete_session(&newer.meta().dir_name).unwrap();
        assert_eq!(manager.latest().unwrap(), Some(older.meta().dir_name));

        manager.delete_session(&older.meta().dir_name).unwrap();
        assert_eq!(manager.latest().unwrap(), None);
        assert!(!tmp.path().join(LATEST_NAME).exists());
    }

    #[test]
    fn test_delete_rejects_escaping_names() {
        let tmp = TempDir::new().unwrap();
        let sessions = tmp.path().join("sessions");
        let manager = SessionManager::new(&sessions).unwrap();
        let sibling = tmp.path().join("keep.txt");
        fs::write(&sibling, "keep").unwrap();
        let kept = manager.create_session(new_session("kept")).unwrap();

        for name in ["..", ".", "../etc", "a/b", "/tmp", "latest", ""] {
            let err = manager.delete_session(name).unwrap_err();
            assert!(err.is_not_found(), "{name:?} should be rejected");
        }
        assert!(sibling.is_file());
        assert!(kept.dir().join(META_FILE).is_file());
    }

    #[test]
    fn test_delete_refuses_directories_without_meta() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        fs::create_dir(tmp.path().join("notes")).unwrap();
        fs::write(tmp.path().join("notes").join("todo.txt"), "x").unwrap();
        fs::write(tmp.path().join("stray.txt"), "x").unwrap();

        assert!(manager.delete_session("notes").unwrap_err().is_not_found());
        assert!(manager.delete_session("stray.txt").unwrap_err().is_not_found());
        assert!(tmp.path().join("notes").join("todo.txt").is_file());
        assert!(tmp.path().join("stray.txt").is_file());
    }

    #[test]
    fn test_failed_initialization_removes_directory() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("half-made");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("partial.tmp"), "x").unwrap();

        let err = init_or_remove(&dir, || -> Result<()> {
            Err(Error::store(&dir, io::Error::new(io::ErrorKind::Other, "disk full")))
        })
        .unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
        assert!(!dir.exists());

        let kept = tmp.path().join("complete");
        fs::create_dir(&kept).unwrap();
        assert_eq!(init_or_remove(&kept, || Ok(7)).unwrap(), 7);
        assert!(kept.is_dir());
    }

    #[test]
    fn test_clear_removes_everything() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path()).unwrap();
        let s = manager.create_session(new_session("a")).unwrap();
        manager.finalize(&s).unwrap();
        manager.create_session(new_session("b")).unwrap();

        assert_eq!(manager.clear().unwrap(), 2);
        assert!(manager.list_sessions().unwrap().is_empty());
        assert_eq!(manager.latest().unwrap(), None);
        assert_eq!(manager.clear().unwrap(), 0);
    }

    #[test]
    fn test_sanitize_session_name() {
        assert_eq!(sanitize_session_name("my session/1"), "my-session-1");
        assert_eq!(sanitize_session_name("  "), "session");
        assert_eq!(sanitize_session_name("ok_name-2"), "ok_name-2");
    }
}
