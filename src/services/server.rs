//! The proxy listener and its lifecycle.

use crate::{models::mime::MimeTable, routes::routes::app, services::registry::ClientRegistry};
use std::{io, net::SocketAddr, sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    net::TcpListener,
    sync::oneshot,
    task::{JoinError, JoinHandle},
    time,
};
use tracing::{info, warn};

/// How long `stop` waits for in-flight responses before aborting them.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, read-only state of the proxy handlers.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<ClientRegistry>,
    pub mime: Arc<MimeTable>,
}

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("proxy already listening on {0}")]
    AlreadyRunning(SocketAddr),
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    #[error("proxy stopped with an error: {0}")]
    Serve(#[from] io::Error),
    #[error("proxy task failed: {0}")]
    Join(#[from] JoinError),
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<io::Result<()>>,
}

/// A single HTTP listener on the loopback interface.
///
/// `start` binds once, `stop` releases the port and may be called any
/// number of times. A port of 0 binds an ephemeral port that is then kept
/// for later restarts.
pub struct ProxyServer {
    host: String,
    port: u16,
    state: ProxyState,
    running: Option<Running>,
}

impl ProxyServer {
    pub fn new(host: impl Into<String>, port: u16, state: ProxyState) -> Self {
        Self {
            host: host.into(),
            port,
            state,
            running: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub async fn start(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(running) = &self.running {
            return Err(ServerError::AlreadyRunning(running.addr));
        }

        let listener = TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|source| ServerError::Bind {
                addr: format!("{}:{}", self.host, self.port),
                source,
            })?;
        let addr = listener.local_addr()?;
        self.port = addr.port();

        let (shutdown, signal) = oneshot::channel::<()>();
        let router = app(self.state.clone());
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    let _ = signal.await;
                })
                .await
        });

        info!(%addr, "proxy listening");
        self.running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Close the listener. Returns once the port is free.
    pub async fn stop(&mut self) -> Result<(), ServerError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let _ = running.shutdown.send(());

        let mut task = running.task;
        match time::timeout(STOP_TIMEOUT, &mut task).await {
            Ok(joined) => joined??,
            Err(_) => {
                warn!(addr = %running.addr, "proxy did not drain in time, aborting");
                task.abort();
                if let Err(err) = task.await {
                    if !err.is_cancelled() {
                        return Err(err.into());
                    }
                }
            }
        }

        info!(addr = %running.addr, "proxy stopped");
        Ok(())
    }
}
