//! Error types shared by the capture and conversion pipeline.

use std::io;
use std::path::{Path, PathBuf};

/// Result type for snapmock operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy for capture, storage and conversion.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Root CA missing, corrupt, or not writable
    #[error("CA error: {0}")]
    Ca(String),

    /// Listener bind failure or upstream dial failure
    #[error("proxy error: {0}")]
    Proxy(String),

    /// Disk I/O failure while reading or writing session data
    #[error("storage error at {}: {source}", path.display())]
    Store {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A session or recording file exists but cannot be parsed
    #[error("corrupt data in {}: {source}", path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Unknown session name or recording ID
    #[error("{0} not found")]
    NotFound(String),

    /// A recording cannot be turned back into a request/response shape
    #[error("cannot convert recording {id}: {reason}")]
    Conversion { id: String, reason: String },

    /// Filtering left nothing for the conversion engine to work on
    #[error("nothing to convert: {0}")]
    NothingToConvert(String),

    /// Invalid configuration value
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Wrap an I/O error with the path it happened on
    pub fn store(path: impl AsRef<Path>, source: io::Error) -> Self {
        Error::Store {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Wrap a JSON error with the file it was read from
    pub fn corrupt(path: impl AsRef<Path>, source: serde_json::Error) -> Self {
        Error::Corrupt {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    pub fn ca(msg: impl Into<String>) -> Self {
        Error::Ca(msg.into())
    }

    pub fn proxy(msg: impl Into<String>) -> Self {
        Error::Proxy(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    /// True for the NotFound class, including "nothing to convert"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::NothingToConvert(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_carries_path() {
        let err = Error::store(
            "/tmp/session/meta.json",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("/tmp/session/meta.json"));
        assert!(msg.contains("denied"));
    }

    #[test]
    fn test_not_found_class() {
        assert!(Error::not_found("session 'checkout'").is_not_found());
        assert!(Error::NothingToConvert("all filtered".into()).is_not_found());
        assert!(!Error::ca("missing").is_not_found());
    }

    #[test]
    fn test_conversion_error_message() {
        let err = Error::Conversion {
            id: "abc".into(),
            reason: "bad body".into(),
        };
        assert_eq!(err.to_string(), "cannot convert recording abc: bad body");
    }
}
