//! snapmock: record live API traffic through an intercepting proxy and turn
//! the recordings into replayable mock definitions.
//!
//! - [`proxy`] captures plain HTTP and CONNECT (HTTPS) traffic into a session
//! - [`recording`] stores sessions on disk and answers queries over them
//! - [`convert`] turns recordings into a [`convert::MockDocument`]
//! - [`ca`] owns the root CA and mints per-host leaf certificates

pub mod ca;
pub mod config;
pub mod convert;
pub mod error;
pub mod filter;
pub mod proxy;
pub mod recording;
pub mod scanner;

pub use ca::CertificateAuthority;
pub use config::Config;
pub use convert::{
    convert_recordings_with_options, convert_session, to_mock, ConversionResult, ConvertOptions,
    Converter, MockDocument, SessionConvertOptions,
};
pub use error::{Error, Result};
pub use filter::{CompiledFilter, FilterConfig};
pub use proxy::{CaptureStats, ProxyHandle, ProxySession};
pub use recording::{CaptureMode, Recording, RecordingStore, SessionManager};
pub use scanner::{SensitiveDataScanner, SensitiveDataWarning};
