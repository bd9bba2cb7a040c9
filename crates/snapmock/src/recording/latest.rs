//! The `latest` pointer naming the most recent session directory.
//!
//! Two backings exist: a symlink (preferred) and a plain text file holding
//! the directory name, for filesystems where symlinks cannot be created.
//! Both are swapped in with a rename so readers never see a half-written
//! pointer. Reads accept either form regardless of which backing is active.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const LATEST_NAME: &str = "latest";

pub trait LatestPointer: Send + Sync {
    /// Directory name the pointer refers to, if it exists and is valid
    fn read(&self) -> Result<Option<String>>;

    /// Atomically repoint to `dir_name`
    fn update(&self, dir_name: &str) -> Result<()>;

    /// Remove the pointer; absent pointers are not an error
    fn clear(&self) -> Result<()>;

    fn kind(&self) -> &'static str;
}

/// Symlink-backed pointer: `latest -> <dir_name>`
#[derive(Debug, Clone)]
pub struct SymlinkPointer {
    base_dir: PathBuf,
}

/// File-backed pointer: `latest` contains `<dir_name>`
#[derive(Debug, Clone)]
pub struct FilePointer {
    base_dir: PathBuf,
}

impl SymlinkPointer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl FilePointer {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }
}

impl LatestPointer for SymlinkPointer {
    fn read(&self) -> Result<Option<String>> {
        read_latest(&self.base_dir)
    }

    fn update(&self, dir_name: &str) -> Result<()> {
        let tmp = temp_path(&self.base_dir);
        remove_if_present(&tmp)?;
        make_symlink(Path::new(dir_name), &tmp).map_err(|e| Error::store(&tmp, e))?;
        let target = self.base_dir.join(LATEST_NAME);
        fs::rename(&tmp, &target).map_err(|e| Error::store(&target, e))?;
        debug!("latest -> {} (symlink)", dir_name);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        remove_if_present(&self.base_dir.join(LATEST_NAME))
    }

    fn kind(&self) -> &'static str {
        "symlink"
    }
}

impl LatestPointer for FilePointer {
    fn read(&self) -> Result<Option<String>> {
        read_latest(&self.base_dir)
    }

    fn update(&self, dir_name: &str) -> Result<()> {
        let tmp = temp_path(&self.base_dir);
        fs::write(&tmp, dir_name).map_err(|e| Error::store(&tmp, e))?;
        let target = self.base_dir.join(LATEST_NAME);
        // A leftover symlink would be replaced by rename as well
        fs::rename(&tmp, &target).map_err(|e| Error::store(&target, e))?;
        debug!("latest -> {} (file)", dir_name);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        remove_if_present(&self.base_dir.join(LATEST_NAME))
    }

    fn kind(&self) -> &'static str {
        "file"
    }
}

/// Pick the pointer backing supported by `base_dir`'s filesystem.
pub fn detect(base_dir: &Path) -> Box<dyn LatestPointer> {
    if symlinks_supported(base_dir) {
        Box::new(SymlinkPointer::new(base_dir))
    } else {
        Box::new(FilePointer::new(base_dir))
    }
}

/// Read the pointer in whichever form it is stored.
///
/// Returns `None` when the pointer is missing, empty, or refers to a
/// directory that no longer exists.
pub fn read_latest(base_dir: &Path) -> Result<Option<String>> {
    let path = base_dir.join(LATEST_NAME);
    let meta = match fs::symlink_metadata(&path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::store(&path, e)),
    };

    let name = if meta.file_type().is_symlink() {
        let target = fs::read_link(&path).map_err(|e| Error::store(&path, e))?;
        target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else if meta.is_file() {
        fs::read_to_string(&path)
            .map_err(|e| Error::store(&path, e))?
            .trim()
            .to_string()
    } else {
        return Ok(None);
    };

    if name.is_empty() || !base_dir.join(&name).is_dir() {
        return Ok(None);
    }
    Ok(Some(name))
}

fn symlinks_supported(base_dir: &Path) -> bool {
    let probe = base_dir.join(format!(".latest-probe-{}", std::process::id()));
    let _ = fs::remove_file(&probe);
    let ok = make_symlink(Path::new("."), &probe).is_ok();
    let _ = fs::remove_file(&probe);
    ok
}

fn temp_path(base_dir: &Path) -> PathBuf {
    base_dir.join(format!(".{}.tmp-{}", LATEST_NAME, std::process::id()))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::store(path, e)),
    }
}

#[cfg(unix)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn make_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
}

#[cfg(not(any(unix, windows)))]
fn make_symlink(_target: &Path, _link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symlinks are not supported on this platform",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn pointers(base: &Path) -> Vec<Box<dyn LatestPointer>> {
        vec![
            Box::new(FilePointer::new(base)),
            Box::new(SymlinkPointer::new(base)),
        ]
    }

    #[test]
    fn test_missing_pointer_reads_none() {
        let tmp = TempDir::new().unwrap();
        for p in pointers(tmp.path()) {
            assert_eq!(p.read().unwrap(), None);
        }
    }

    #[test]
    fn test_update_and_read() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("a_20240101_000000")).unwrap();
        fs::create_dir(tmp.path().join("b_20240102_000000")).unwrap();

        for p in pointers(tmp.path()) {
            if p.kind() == "symlink" && !symlinks_supported(tmp.path()) {
                continue;
            }
            p.update("a_20240101_000000").unwrap();
            assert_eq!(p.read().unwrap().as_deref(), Some("a_20240101_000000"));
            p.update("b_20240102_000000").unwrap();
            assert_eq!(p.read().unwrap().as_deref(), Some("b_20240102_000000"));
            p.clear().unwrap();
            assert_eq!(p.read().unwrap(), None);
            // clearing twice is fine
            p.clear().unwrap();
        }
    }

    #[test]
    fn test_pointer_to_deleted_dir_reads_none() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("gone")).unwrap();
        let p = FilePointer::new(tmp.path());
        p.update("gone").unwrap();
        fs::remove_dir(tmp.path().join("gone")).unwrap();
        assert_eq!(p.read().unwrap(), None);
    }

    #[test]
    fn test_read_accepts_either_form() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("s1")).unwrap();
        FilePointer::new(tmp.path()).update("s1").unwrap();
        assert_eq!(read_latest(tmp.path()).unwrap().as_deref(), Some("s1"));

        let detected = detect(tmp.path());
        detected.update("s1").unwrap();
        assert_eq!(detected.read().unwrap().as_deref(), Some("s1"));
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir(tmp.path().join("s1")).unwrap();
        detect(tmp.path()).update("s1").unwrap();
        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with('.'))
            .collect();
        assert!(leftovers.is_empty(), "leftovers: {leftovers:?}");
    }
}
