//! Durable, session-scoped storage of captured exchanges.
//!
//! Layout of a sessions base directory:
//!
//! ```text
//! <sessionsDir>/
//!   latest                      -> checkout_20240101-120000 (symlink or file)
//!   checkout_20240101-120000/
//!     meta.json
//!     api.example.com/
//!       rec_<id>.json
//! ```

mod latest;
mod mode;
mod query;
mod session;
mod store;
mod transfer;
mod types;

pub use latest::{detect as detect_latest_pointer, FilePointer, LatestPointer, SymlinkPointer};
pub use mode::CaptureMode;
pub use query::{RecordingFilter, RecordingPage};
pub use session::{
    list_sessions, read_meta, resolve_session_dir, sanitize_session_name, NewSession,
    SessionEntry, SessionManager, SessionMeta, SessionSummary, META_FILE,
};
pub use store::{RecordingStore, SkippedRecording};
pub use transfer::{export_recordings, parse_recordings, read_recordings_file, write_recordings_file};
pub use types::{host_dir_name, BodyEncoding, BodySnapshot, RecordedRequest, RecordedResponse, Recording};
