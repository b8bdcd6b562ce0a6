use std::net::{SocketAddr, TcpListener};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{Router, routing::get};
use tokio::net::TcpListener as TokioTcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::{AuthorizationResult, OAuthError};

use super::config::LocalServerConfig;
use super::http::{CaptureState, callback_handler, fallback_handler};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle of a started capture server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapturePhase {
    Listening,
    Captured,
    Failed,
    TimedOut,
    Stopped,
}

/// An idle redirect capture server. Nothing is bound until [`LocalServer::start`].
#[derive(Debug, Clone)]
pub struct LocalServer {
    config: LocalServerConfig,
    expected_state: Option<String>,
}

impl LocalServer {
    pub fn new(config: LocalServerConfig) -> Self {
        Self {
            config,
            expected_state: None,
        }
    }

    pub fn from_redirect_uri(redirect_uri: &str, port: u16) -> Result<Self, OAuthError> {
        Ok(Self::new(LocalServerConfig::from_redirect_uri(
            redirect_uri,
            port,
        )?))
    }

    /// Callbacks whose `state` differs from `state` are rejected.
    pub fn expect_state(mut self, state: impl Into<String>) -> Self {
        self.expected_state = Some(state.into());
        self
    }

    pub fn config(&self) -> &LocalServerConfig {
        &self.config
    }

    pub fn bind(&self) -> Result<TcpListener, OAuthError> {
        let port = self.config.port;
        TcpListener::bind((self.config.host.as_str(), port))
            .map_err(|source| OAuthError::Bind { port, source })
    }

    pub async fn start(&self) -> Result<CaptureHandle, OAuthError> {
        let listener = self.bind()?;
        self.start_with(listener).await
    }

    pub async fn start_with(&self, listener: TcpListener) -> Result<CaptureHandle, OAuthError> {
        let local_addr = listener.local_addr()?;
        let (result_tx, result_rx) = oneshot::channel::<AuthorizationResult>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = CaptureState {
            expected_state: self.expected_state.clone(),
            success_html: self.config.success_html.clone(),
            error_html: self.config.error_html.clone(),
            result_tx: Arc::new(Mutex::new(Some(result_tx))),
        };

        let app = Router::new()
            .route(&self.config.path, get(callback_handler))
            .fallback(fallback_handler)
            .with_state(state);

        listener.set_nonblocking(true)?;
        let listener = TokioTcpListener::from_std(listener)?;

        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });

        let server_handle = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "callback server stopped with error");
            }
        });

        debug!(%local_addr, path = %self.config.path, "callback server listening");

        Ok(CaptureHandle {
            local_addr,
            phase: CapturePhase::Listening,
            result_rx: Some(result_rx),
            shutdown_tx: Some(shutdown_tx),
            server: Some(server_handle),
        })
    }
}

/// A listening capture server. Dropping the handle releases the listener.
#[derive(Debug)]
pub struct CaptureHandle {
    local_addr: SocketAddr,
    phase: CapturePhase,
    result_rx: Option<oneshot::Receiver<AuthorizationResult>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn phase(&self) -> CapturePhase {
        self.phase
    }

    /// Waits up to `deadline` for one callback, then stops the server.
    ///
    /// The wait wakes at least once per second so the deadline is observed promptly.
    pub async fn wait(&mut self, deadline: Duration) -> AuthorizationResult {
        let Some(mut result_rx) = self.result_rx.take() else {
            return AuthorizationResult::Error("callback already consumed".to_string());
        };

        let started = Instant::now();
        let result = loop {
            let remaining = deadline.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break AuthorizationResult::TimedOut;
            }

            match tokio::time::timeout(remaining.min(POLL_INTERVAL), &mut result_rx).await {
                Ok(Ok(result)) => break result,
                Ok(Err(_)) => {
                    break AuthorizationResult::Error(
                        "callback server stopped unexpectedly".to_string(),
                    );
                }
                Err(_) => continue,
            }
        };

        self.phase = match &result {
            AuthorizationResult::Code(_) => CapturePhase::Captured,
            AuthorizationResult::TimedOut => CapturePhase::TimedOut,
            AuthorizationResult::Error(_) | AuthorizationResult::StateMismatch { .. } => {
                CapturePhase::Failed
            }
        };
        debug!(phase = ?self.phase, "callback wait finished");

        self.stop().await;
        result
    }

    /// Stops accepting connections and releases the listener. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(mut server) = self.server.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut server)
                .await
                .is_err()
            {
                warn!("callback server did not shut down in time, aborting");
                server.abort();
                let _ = server.await;
            }
        }

        if self.phase != CapturePhase::Stopped {
            debug!(local_addr = %self.local_addr, "callback server stopped");
            self.phase = CapturePhase::Stopped;
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}
