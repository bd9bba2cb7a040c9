//! Capture session lifecycle: listener, accept loop and shutdown.
//!
//! A [`ProxySession`] owns everything one capture run needs. Starting it
//! binds the listener, creates the session directory and returns a
//! [`ProxyHandle`]. On shutdown the listener closes first, in-flight
//! connections get the grace period to finish, stragglers are aborted, and
//! the session is finalized from what was already written.

use super::client::create_http_client;
use super::context::{CaptureStats, ProxyContext};
use super::handler::handle_request;
use crate::ca::CertificateAuthority;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::recording::{CaptureMode, NewSession, RecordingStore, SessionManager, SessionSummary};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoConnBuilder;
use parking_lot::Mutex;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tasks spawned on behalf of connections.
///
/// Finished tasks are reaped on every spawn. Dropping a batch taken by
/// [`TaskSet::drain`] aborts whatever in it is still running.
#[derive(Default)]
pub(crate) struct TaskSet {
    inner: Mutex<JoinSet<()>>,
}

impl TaskSet {
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.inner.lock();
        while let Some(done) = set.try_join_next() {
            log_join(done);
        }
        set.spawn(task);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Wait for every task, including ones spawned while waiting
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.inner.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(done) = batch.join_next().await {
                log_join(done);
            }
        }
    }

    pub fn abort_all(&self) {
        self.inner.lock().abort_all();
    }
}

fn log_join(result: std::result::Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Connection task panicked: {}", e);
        }
    }
}

/// One capture run: configuration, CA and session storage.
pub struct ProxySession {
    config: Config,
    ca: Arc<CertificateAuthority>,
    manager: SessionManager,
}

impl ProxySession {
    pub fn new(config: Config) -> Result<Self> {
        let manager = SessionManager::new(&config.capture.sessions_dir)?;
        let ca = Arc::new(CertificateAuthority::new(config.ca.clone()));
        Ok(Self {
            config,
            ca,
            manager,
        })
    }

    /// Use an already-loaded CA instead of the configured one
    pub fn with_ca(mut self, ca: Arc<CertificateAuthority>) -> Self {
        self.ca = ca;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    /// Bind the listener, create the session and start accepting.
    ///
    /// Nothing is accepted until the session directory and `meta.json`
    /// exist, so a storage failure leaves no half-started capture behind.
    pub async fn start(self) -> Result<ProxyHandle> {
        let filter = self.config.filter.compile()?;
        self.ca.ensure()?;

        let capture = &self.config.capture;
        let addr = format!("{}:{}", capture.bind, capture.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| Error::proxy(format!("failed to bind {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| Error::proxy(format!("listener address: {e}")))?;

        let store = Arc::new(self.manager.create_session(NewSession {
            name: capture.session_name.clone(),
            port: local_addr.port(),
            mode: capture.mode,
            filter: Some(self.config.filter.clone()),
        })?);

        let ctx = Arc::new(ProxyContext::new(
            create_http_client(&self.config.upstream),
            self.ca.clone(),
            store.clone(),
            filter,
            capture.max_body_bytes,
            capture.mode,
        ));
        let grace = Duration::from_secs(capture.grace_period_secs);

        info!(
            "Capture proxy listening on http://{} (session '{}', mode: {})",
            local_addr, capture.session_name, capture.mode
        );
        info!("Session directory: {:?}", store.dir());

        let task = tokio::spawn(run(listener, ctx.clone(), grace, self.manager, store));
        Ok(ProxyHandle {
            local_addr,
            ctx,
            task,
        })
    }
}

/// Control surface of a running capture session.
pub struct ProxyHandle {
    local_addr: SocketAddr,
    ctx: Arc<ProxyContext>,
    task: JoinHandle<Result<SessionSummary>>,
}

impl ProxyHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL clients use as their HTTP(S) proxy
    pub fn proxy_url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub fn session_dir(&self) -> &Path {
        self.ctx.store.dir()
    }

    pub fn mode(&self) -> CaptureMode {
        self.ctx.mode()
    }

    /// Switch between record and passthrough without restarting
    pub fn set_mode(&self, mode: CaptureMode) {
        let previous = self.ctx.mode();
        self.ctx.set_mode(mode);
        if previous != mode {
            info!("Capture mode changed: {} -> {}", previous, mode);
        }
    }

    pub fn stats(&self) -> CaptureStats {
        self.ctx.stats()
    }

    /// Write current counts to `meta.json` without ending the session
    pub fn flush(&self) -> Result<()> {
        self.ctx.store.flush()
    }

    /// Token that stops the session when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.ctx.shutdown.clone()
    }

    /// Stop accepting, drain, finalize and return the summary.
    pub async fn shutdown(self) -> Result<SessionSummary> {
        self.ctx.shutdown.cancel();
        self.wait().await
    }

    /// Wait for the session to end by other means (see [`Self::shutdown_token`]).
    pub async fn wait(self) -> Result<SessionSummary> {
        self.task
            .await
            .map_err(|e| Error::proxy(format!("capture task failed: {e}")))?
    }
}

async fn run(
    listener: TcpListener,
    ctx: Arc<ProxyContext>,
    grace: Duration,
    manager: SessionManager,
    store: Arc<RecordingStore>,
) -> Result<SessionSummary> {
    accept_loop(listener, &ctx).await;

    let open = ctx.tasks.len();
    if open > 0 {
        info!(
            "Listener closed; waiting up to {}s for {} connection(s)",
            grace.as_secs(),
            open
        );
    }
    if tokio::time::timeout(grace, ctx.tasks.drain()).await.is_err() {
        warn!("Grace period elapsed; aborting remaining connections");
        ctx.tasks.abort_all();
    }

    manager.finalize(&store)
}

async fn accept_loop(listener: TcpListener, ctx: &Arc<ProxyContext>) {
    loop {
        tokio::select! {
            _ = ctx.shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    ctx.tasks.spawn(serve_connection(ctx.clone(), stream, remote_addr));
                }
                Err(e) => {
                    // Usually descriptor exhaustion; retry shortly
                    warn!("Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            },
        }
    }
}

async fn serve_connection(ctx: Arc<ProxyContext>, stream: TcpStream, remote_addr: SocketAddr) {
    debug!("Accepted connection from {}", remote_addr);
    let shutdown = ctx.shutdown.clone();
    let service = service_fn(move |req: Request<Incoming>| handle_request(ctx.clone(), req));

    let builder = AutoConnBuilder::new(TokioExecutor::new());
    let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        res = conn.as_mut() => res,
        _ = shutdown.cancelled() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };
    if let Err(e) = result {
        debug!("Connection from {} ended with error: {}", remote_addr, e);
    }
}
