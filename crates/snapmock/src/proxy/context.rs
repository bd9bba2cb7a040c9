use crate::ca::CertificateAuthority;
use crate::filter::CompiledFilter;
use crate::proxy::client::HttpClient;
use crate::proxy::server::TaskSet;
use crate::recording::{CaptureMode, RecordingStore};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// State shared by every connection of one capture session.
pub(crate) struct ProxyContext {
    pub client: HttpClient,
    pub ca: Arc<CertificateAuthority>,
    pub store: Arc<RecordingStore>,
    pub filter: CompiledFilter,
    pub max_body_bytes: usize,
    /// Connection and tunnel tasks, drained at shutdown
    pub tasks: TaskSet,
    /// Cancelled when the session stops accepting
    pub shutdown: CancellationToken,
    mode: AtomicU8,
    counters: Counters,
}

#[derive(Default)]
struct Counters {
    forwarded: AtomicU64,
    filtered_out: AtomicU64,
    upstream_errors: AtomicU64,
    write_failures: AtomicU64,
}

/// Live numbers for a running capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    pub session_dir: PathBuf,
    pub mode: CaptureMode,
    pub recordings: usize,
    pub hosts: Vec<String>,
    /// Exchanges relayed to an origin, recorded or not
    pub forwarded: u64,
    /// Exchanges the capture filter declined to record
    pub filtered_out: u64,
    pub upstream_errors: u64,
    pub write_failures: u64,
}

impl ProxyContext {
    pub fn new(
        client: HttpClient,
        ca: Arc<CertificateAuthority>,
        store: Arc<RecordingStore>,
        filter: CompiledFilter,
        max_body_bytes: usize,
        mode: CaptureMode,
    ) -> Self {
        Self {
            client,
            ca,
            store,
            filter,
            max_body_bytes,
            tasks: TaskSet::default(),
            shutdown: CancellationToken::new(),
            mode: AtomicU8::new(mode.as_u8()),
            counters: Counters::default(),
        }
    }

    pub fn mode(&self) -> CaptureMode {
        CaptureMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    /// Takes effect for the next completed exchange
    pub fn set_mode(&self, mode: CaptureMode) {
        self.mode.store(mode.as_u8(), Ordering::Release);
    }

    pub fn note_forwarded(&self) {
        self.counters.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_filtered_out(&self) {
        self.counters.filtered_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_upstream_error(&self) {
        self.counters.upstream_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn note_write_failure(&self) {
        self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            session_dir: self.store.dir().to_path_buf(),
            mode: self.mode(),
            recordings: self.store.len(),
            hosts: self.store.hosts(),
            forwarded: self.counters.forwarded.load(Ordering::Relaxed),
            filtered_out: self.counters.filtered_out.load(Ordering::Relaxed),
            upstream_errors: self.counters.upstream_errors.load(Ordering::Relaxed),
            write_failures: self.counters.write_failures.load(Ordering::Relaxed),
        }
    }
}
