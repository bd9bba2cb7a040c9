//! Export and import of recordings as a single JSON array.

use super::store::is_safe_id;
use super::types::Recording;
use crate::error::{Error, Result};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::warn;

/// Serialize recordings as a pretty JSON array.
pub fn export_recordings(recordings: &[Recording]) -> Result<String> {
    serde_json::to_string_pretty(recordings)
        .map_err(|e| Error::store("<export>", io::Error::new(io::ErrorKind::InvalidData, e)))
}

pub fn write_recordings_file(path: &Path, recordings: &[Recording]) -> Result<()> {
    let json = export_recordings(recordings)?;
    fs::write(path, json + "\n").map_err(|e| Error::store(path, e))
}

/// Parse an exported JSON array. `origin` names the source in errors.
pub fn parse_recordings(json: &str, origin: &Path) -> Result<Vec<Recording>> {
    serde_json::from_str(json).map_err(|e| Error::corrupt(origin, e))
}

pub fn read_recordings_file(path: &Path) -> Result<Vec<Recording>> {
    let json = fs::read_to_string(path).map_err(|e| Error::store(path, e))?;
    parse_recordings(&json, path)
}

/// Keep recordings whose ID is usable as a file name and not already
/// seen; the first occurrence of a repeated ID wins.
pub(crate) fn importable(recordings: Vec<Recording>) -> Vec<Recording> {
    let mut seen = HashSet::new();
    recordings
        .into_iter()
        .filter(|r| {
            if !is_safe_id(&r.id) {
                warn!("Ignoring recording with unusable id {:?}", r.id);
                return false;
            }
            let fresh = seen.insert(r.id.clone());
            if !fresh {
                warn!("Ignoring duplicate recording id {}", r.id);
            }
            fresh
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recording::session::SessionManager;
    use crate::recording::test_support::sample_recording;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_export_import_preserves_ids() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path().join("sessions")).unwrap();
        let originals = vec![
            sample_recording("GET", "api.test", "/users/1", 200),
            sample_recording("POST", "api.test", "/users", 201),
            sample_recording("GET", "cdn.test", "/img.png", 404),
        ];

        let file = tmp.path().join("export.json");
        write_recordings_file(&file, &originals).unwrap();
        let parsed = read_recordings_file(&file).unwrap();
        let store = manager.import("imported", parsed).await.unwrap();

        let key = |r: &Recording| {
            (
                r.id.clone(),
                r.request.method.clone(),
                r.request.path.clone(),
                r.response.status_code,
            )
        };
        let mut expected: Vec<_> = originals.iter().map(key).collect();
        let mut actual: Vec<_> = store.recordings().iter().map(key).collect();
        expected.sort();
        actual.sort();
        assert_eq!(actual, expected);

        assert_eq!(
            manager.latest().unwrap().as_deref(),
            Some(store.meta().dir_name.as_str())
        );
    }

    #[tokio::test]
    async fn test_import_drops_unusable_ids_and_finalizes() {
        let tmp = TempDir::new().unwrap();
        let manager = SessionManager::new(tmp.path().join("sessions")).unwrap();
        let good = sample_recording("GET", "api.test", "/users/1", 200);
        let mut escaping = sample_recording("GET", "api.test", "/users/2", 200);
        escaping.id = "../x".into();
        let mut blank = sample_recording("GET", "api.test", "/users/3", 200);
        blank.id = String::new();

        let store = manager
            .import("mixed", vec![good.clone(), escaping, blank])
            .await
            .unwrap();

        let ids: Vec<_> = store.recordings().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![good.id]);
        let sessions = manager.list_sessions().unwrap();
        assert_eq!(sessions.len(), 1);
        assert!(sessions[0].meta.end_time.is_some());
        assert_eq!(sessions[0].meta.recording_count, 1);
        assert!(!tmp.path().join("x").exists());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = parse_recordings("{\"not\":\"an array\"}", Path::new("in.json")).unwrap_err();
        assert!(matches!(err, Error::Corrupt { .. }));
        assert!(err.to_string().contains("in.json"));
    }

    #[test]
    fn test_importable_keeps_first_of_repeated_ids() {
        let a = sample_recording("GET", "h", "/a", 200);
        let mut b = sample_recording("GET", "h", "/b", 200);
        b.id = a.id.clone();
        let out = importable(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].request.path, "/a");
    }
}
