//! Session-scoped recording storage.
//!
//! Each recording is its own file, `<sessionDir>/<host>/rec_<id>.json`,
//! written to a temporary name and renamed into place. The in-memory index
//! is guarded by a `RwLock` that is only taken after the file is on disk,
//! so writers never hold it across I/O and readers never see a recording
//! whose file is incomplete.

use super::query::{RecordingFilter, RecordingPage};
use super::session::{read_meta, write_meta, SessionMeta};
use super::transfer;
use super::types::Recording;
use crate::error::{Error, Result};
use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A recording file that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedRecording {
    pub path: PathBuf,
    pub reason: String,
}

struct StoreState {
    meta: SessionMeta,
    recordings: Vec<Recording>,
    hosts: BTreeSet<String>,
}

pub struct RecordingStore {
    dir: PathBuf,
    state: RwLock<StoreState>,
    skipped: Vec<SkippedRecording>,
}

impl RecordingStore {
    pub(crate) fn new(dir: PathBuf, meta: SessionMeta) -> Self {
        let hosts = meta.hosts.iter().cloned().collect();
        Self {
            dir,
            state: RwLock::new(StoreState {
                meta,
                recordings: Vec::new(),
                hosts,
            }),
            skipped: Vec::new(),
        }
    }

    /// Rebuild the index from an existing session directory.
    ///
    /// Recordings are ordered by timestamp then ID. Unreadable recording
    /// files are skipped and reported through [`RecordingStore::skipped`].
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let mut meta = read_meta(&dir)?;
        let (mut recordings, skipped) = load_recordings(&dir)?;
        recordings.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

        let hosts: BTreeSet<String> = recordings.iter().map(|r| r.request.host.clone()).collect();
        meta.recording_count = recordings.len();
        meta.hosts = hosts.iter().cloned().collect();
        debug!(
            "Loaded {} recording(s) from {:?} ({} skipped)",
            recordings.len(),
            dir,
            skipped.len()
        );

        Ok(Self {
            dir,
            state: RwLock::new(StoreState {
                meta,
                recordings,
                hosts,
            }),
            skipped,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of the session metadata with live counts
    pub fn meta(&self) -> SessionMeta {
        let state = self.state.read();
        snapshot_meta(&state)
    }

    pub fn len(&self) -> usize {
        self.state.read().recordings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn hosts(&self) -> Vec<String> {
        self.state.read().hosts.iter().cloned().collect()
    }

    /// Files that failed to load when the store was opened
    pub fn skipped(&self) -> &[SkippedRecording] {
        &self.skipped
    }

    /// Persist `recording` and append it to the index.
    ///
    /// Safe for concurrent callers. On failure nothing is added and
    /// previously stored recordings are untouched.
    pub async fn add_recording(&self, recording: Recording) -> Result<()> {
        validate_id(&self.dir, &recording)?;
        let host_dir = self.dir.join(recording.host_dir());
        tokio::fs::create_dir_all(&host_dir)
            .await
            .map_err(|e| Error::store(&host_dir, e))?;

        let path = host_dir.join(recording.file_name());
        let bytes = to_json_bytes(&path, &recording)?;
        let tmp = temp_path(&path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| Error::store(&tmp, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::store(&path, e));
        }

        debug!(
            "Stored {} {}{} -> {}",
            recording.request.method,
            recording.request.host,
            recording.request.path,
            recording.response.status_code
        );
        let mut state = self.state.write();
        state.hosts.insert(recording.request.host.clone());
        state.recordings.push(recording);
        state.meta.recording_count = state.recordings.len();
        Ok(())
    }

    /// All recordings in capture order
    pub fn recordings(&self) -> Vec<Recording> {
        self.state.read().recordings.clone()
    }

    pub fn get(&self, id: &str) -> Result<Recording> {
        self.state
            .read()
            .recordings
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("recording '{id}'")))
    }

    /// Recordings matching `filter`, paginated, plus the unpaginated total.
    pub fn list(&self, filter: &RecordingFilter) -> Result<RecordingPage> {
        let matcher = filter.compile()?;
        let state = self.state.read();
        let matching: Vec<&Recording> = state
            .recordings
            .iter()
            .filter(|r| matcher.matches(r))
            .collect();
        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(filter.offset)
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(RecordingPage { items, total })
    }

    /// Rewrite `meta.json` with the current count and host set.
    pub fn flush(&self) -> Result<()> {
        let meta = self.meta();
        write_meta(&self.dir, &meta)
    }

    /// Stamp the end time and write the final `meta.json`.
    pub(crate) fn finalize(&self) -> Result<SessionMeta> {
        let meta = {
            let mut state = self.state.write();
            state.meta.end_time = Some(Utc::now());
            snapshot_meta(&state)
        };
        write_meta(&self.dir, &meta)?;
        Ok(meta)
    }

    /// The session's recordings as a JSON array
    pub fn export_json(&self) -> Result<String> {
        transfer::export_recordings(&self.recordings())
    }

    pub fn export_to(&self, path: &Path) -> Result<usize> {
        let recordings = self.recordings();
        transfer::write_recordings_file(path, &recordings)?;
        Ok(recordings.len())
    }
}

fn snapshot_meta(state: &StoreState) -> SessionMeta {
    let mut meta = state.meta.clone();
    meta.recording_count = state.recordings.len();
    meta.hosts = state.hosts.iter().cloned().collect();
    meta
}

/// Recording IDs become file names, so only `[A-Za-z0-9_-]` is accepted.
pub(crate) fn is_safe_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn validate_id(dir: &Path, recording: &Recording) -> Result<()> {
    if is_safe_id(&recording.id) {
        return Ok(());
    }
    Err(Error::store(
        dir,
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "recording id '{}' must be non-empty and contain only [A-Za-z0-9_-]",
                recording.id
            ),
        ),
    ))
}

fn load_recordings(dir: &Path) -> Result<(Vec<Recording>, Vec<SkippedRecording>)> {
    let mut recordings = Vec::new();
    let mut skipped = Vec::new();

    for host_entry in fs::read_dir(dir).map_err(|e| Error::store(dir, e))? {
        let host_entry = host_entry.map_err(|e| Error::store(dir, e))?;
        let host_path = host_entry.path();
        if !host_path.is_dir() {
            continue;
        }
        let files = fs::read_dir(&host_path).map_err(|e| Error::store(&host_path, e))?;
        for file in files {
            let path = file.map_err(|e| Error::store(&host_path, e))?.path();
            let is_recording = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("rec_") && n.ends_with(".json"));
            if !is_recording {
                continue;
            }
            match read_recording(&path) {
                Ok(recording) => recordings.push(recording),
                Err(e) => {
                    warn!("Skipping unreadable recording {:?}: {}", path, e);
                    skipped.push(SkippedRecording {
                        path,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    Ok((recordings, skipped))
}

fn read_recording(path: &Path) -> Result<Recording> {
    let data = fs::read_to_string(path).map_err(|e| Error::store(path, e))?;
    serde_json::from_str(&data).map_err(|e| Error::corrupt(path, e))
}

fn to_json_bytes<T: Serialize>(path: &Path, value: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::store(path, io::Error::new(io::ErrorKind::InvalidData, e)))?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp-{}", name, uuid::Uuid::new_v4().simple()))
}

/// Write pretty JSON to `path` via a temporary file and rename.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = to_json_bytes(path, value)?;
    let tmp = temp_path(path);
    fs::write(&tmp, &bytes).map_err(|e| Error::store(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        Error::store(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::mode::CaptureMode;
    use crate::recording::session::{NewSession, SessionManager};
    use crate::recording::test_support::sample_recording;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn new_store(tmp: &TempDir) -> RecordingStore {
        SessionManager::new(tmp.path())
            .unwrap()
            .create_session(NewSession {
                name: "test".into(),
                port: 0,
                mode: CaptureMode::Record,
                filter: None,
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_add_writes_one_file_per_recording() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        let rec = sample_recording("GET", "api.test", "/users/1", 200);
        let id = rec.id.clone();
        store.add_recording(rec).await.unwrap();

        let path = store.dir().join("api.test").join(format!("rec_{id}.json"));
        assert!(path.is_file());
        let on_disk: Recording =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(on_disk.id, id);
        assert_eq!(store.len(), 1);
        assert_eq!(store.hosts(), vec!["api.test"]);
    }

    #[tokio::test]
    async fn test_meta_not_rewritten_per_recording() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        store
            .add_recording(sample_recording("GET", "a.test", "/", 200))
            .await
            .unwrap();
        assert_eq!(read_meta(store.dir()).unwrap().recording_count, 0);

        store.flush().unwrap();
        let meta = read_meta(store.dir()).unwrap();
        assert_eq!(meta.recording_count, 1);
        assert_eq!(meta.hosts, vec!["a.test"]);
        assert!(meta.end_time.is_none());
    }

    #[tokio::test]
    async fn test_concurrent_adds() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(new_store(&tmp));
        let mut handles = Vec::new();
        for i in 0..40 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let host = if i % 2 == 0 { "even.test" } else { "odd.test" };
                store
                    .add_recording(sample_recording("GET", host, &format!("/items/{i}"), 200))
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(store.len(), 40);

        let reopened = RecordingStore::open(store.dir()).unwrap();
        assert_eq!(reopened.len(), 40);
        assert_eq!(reopened.hosts(), vec!["even.test", "odd.test"]);
    }

    #[tokio::test]
    async fn test_failed_write_keeps_earlier_recordings() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        store
            .add_recording(sample_recording("GET", "ok.test", "/1", 200))
            .await
            .unwrap();
        // A plain file where the host directory should go
        fs::write(store.dir().join("blocked.test"), "x").unwrap();
        let err = store
            .add_recording(sample_recording("GET", "blocked.test", "/2", 200))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store { .. }));
        assert_eq!(store.len(), 1);
        assert_eq!(RecordingStore::open(store.dir()).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_unsafe_ids() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        let mut rec = sample_recording("GET", "a.test", "/", 200);
        rec.id = "../escape".into();
        match store.add_recording(rec).await {
            Err(Error::Store { source, .. }) => {
                assert_eq!(source.kind(), io::ErrorKind::InvalidInput)
            }
            other => panic!("expected a storage rejection, got {other:?}"),
        }
        assert!(store.is_empty());
        assert!(!store.dir().join("escape").exists());
    }

    #[tokio::test]
    async fn test_open_skips_corrupt_files() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        store
            .add_recording(sample_recording("GET", "a.test", "/", 200))
            .await
            .unwrap();
        fs::write(store.dir().join("a.test").join("rec_broken.json"), "{").unwrap();
        fs::write(store.dir().join("a.test").join("notes.txt"), "ignored").unwrap();

        let reopened = RecordingStore::open(store.dir()).unwrap();
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.skipped().len(), 1);
        assert!(reopened.skipped()[0].path.ends_with("rec_broken.json"));
    }

    #[tokio::test]
    async fn test_list_preserves_capture_order_and_paginates() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        for i in 0..5 {
            store
                .add_recording(sample_recording("GET", "a.test", &format!("/n/{i}"), 200))
                .await
                .unwrap();
        }
        store
            .add_recording(sample_recording("POST", "a.test", "/n", 201))
            .await
            .unwrap();

        let page = store
            .list(&RecordingFilter {
                method: Some("get".into()),
                offset: 1,
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 5);
        let paths: Vec<_> = page.items.iter().map(|r| r.request.path.as_str()).collect();
        assert_eq!(paths, vec!["/n/1", "/n/2"]);
    }

    #[tokio::test]
    async fn test_get_unknown_id() {
        let tmp = TempDir::new().unwrap();
        let store = new_store(&tmp);
        assert!(store.get("nope").unwrap_err().is_not_found());
    }

    #[test]
    fn test_write_json_atomic_leaves_no_temp_files() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("value.json");
        write_json_atomic(&path, &serde_json::json!({"a": 1})).unwrap();
        write_json_atomic(&path, &serde_json::json!({"a": 2})).unwrap();
        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names.len(), 1);
        assert!(fs::read_to_string(&path).unwrap().contains("2"));
    }
}
