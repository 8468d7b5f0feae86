//! # Device Listener
//!
//! Accepts device connections over TCP (optionally TLS) and runs one
//! [`Session`] task per connection.
//!
//! ## Shutdown
//! `run` installs a Ctrl-C handler; `run_with_shutdown` takes an external
//! channel instead. On shutdown every live session is disposed and the loop
//! waits up to `shutdown_timeout` for connection tasks to finish.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, instrument, warn};

use crate::error::Result;
use crate::host::{DeviceListener, OfflineReason};
use crate::session::{EngineContext, Session};
use crate::transport::tls::TlsServerConfig;

/// Builds the host listener for each accepted connection.
pub type ListenerFactory = Arc<dyn Fn(SocketAddr) -> Arc<dyn DeviceListener> + Send + Sync>;

pub struct DeviceServer {
    ctx: Arc<EngineContext>,
    factory: ListenerFactory,
    tls: Option<TlsAcceptor>,
    live: Arc<DashMap<u64, Weak<Session>>>,
    active_connections: Arc<Mutex<usize>>,
}

impl DeviceServer {
    /// Loads TLS material when the config asks for it.
    pub fn new(ctx: Arc<EngineContext>, factory: ListenerFactory) -> Result<Self> {
        let tls = match &ctx.config.server.tls {
            Some(settings) => Some(TlsServerConfig::from_settings(settings)?.acceptor()?),
            None => None,
        };
        Ok(Self {
            ctx,
            factory,
            tls,
            live: Arc::new(DashMap::new()),
            active_connections: Arc::new(Mutex::new(0)),
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub async fn active_connections(&self) -> usize {
        *self.active_connections.lock().await
    }

    /// Bind the configured address and serve until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received shutdown signal, initiating graceful shutdown");
                let _ = shutdown_tx.send(()).await;
            }
        });
        self.run_with_shutdown(shutdown_rx).await
    }

    pub async fn run_with_shutdown(self, shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let listener = TcpListener::bind(&self.ctx.config.server.address).await?;
        self.serve(listener, shutdown_rx).await
    }

    /// Serve on an already bound listener.
    #[instrument(skip_all, fields(address = ?listener.local_addr().ok(), tls = self.tls.is_some()))]
    pub async fn serve(self, listener: TcpListener, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("Accepting device connections");
        let max_connections = self.ctx.config.server.max_connections;

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    self.shutdown().await;
                    return Ok(());
                }

                accept_result = listener.accept() => {
                    let (stream, peer) = match accept_result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            error!(error = %e, "Error accepting connection");
                            continue;
                        }
                    };

                    {
                        let mut count = self.active_connections.lock().await;
                        if *count >= max_connections {
                            self.ctx.metrics.connection_refused();
                            warn!(%peer, limit = max_connections, "Connection limit reached; refusing");
                            continue;
                        }
                        *count += 1;
                    }
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(%peer, error = %e, "Could not set TCP_NODELAY");
                    }

                    let listener = (self.factory)(peer);
                    let ctx = self.ctx.clone();
                    let live = self.live.clone();
                    let active_connections = self.active_connections.clone();
                    let tls = self.tls.clone();

                    tokio::spawn(async move {
                        match tls {
                            Some(acceptor) => match acceptor.accept(stream).await {
                                Ok(tls_stream) => run_session(tls_stream, peer, ctx, listener, &live).await,
                                Err(e) => warn!(%peer, error = %e, "TLS handshake failed"),
                            },
                            None => run_session(stream, peer, ctx, listener, &live).await,
                        }
                        let mut count = active_connections.lock().await;
                        *count = count.saturating_sub(1);
                    });
                }
            }
        }
    }

    async fn shutdown(&self) {
        info!("Shutting down server. Disposing sessions...");
        let sessions: Vec<Arc<Session>> = self
            .live
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for session in sessions {
            session
                .dispose(OfflineReason::Disposed, "Server shutting down")
                .await;
        }

        let timeout = tokio::time::sleep(self.ctx.config.server.shutdown_timeout);
        tokio::pin!(timeout);
        loop {
            tokio::select! {
                _ = &mut timeout => {
                    warn!("Shutdown timeout reached, forcing exit");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(100)) => {
                    let connections = *self.active_connections.lock().await;
                    if connections == 0 {
                        info!("All connections closed, shutting down");
                        break;
                    }
                    debug!(connections, "Waiting for connections to close");
                }
            }
        }
        self.ctx.metrics.log_metrics();
    }
}

async fn run_session<S>(
    stream: S,
    peer: SocketAddr,
    ctx: Arc<EngineContext>,
    listener: Arc<dyn DeviceListener>,
    live: &DashMap<u64, Weak<Session>>,
) where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (session, task) = Session::spawn(stream, peer.to_string(), ctx, listener);
    let id = session.id();
    live.insert(id, Arc::downgrade(&session));
    drop(session);

    match task.await {
        Ok(Ok(())) => debug!(%peer, "Connection closed"),
        Ok(Err(e)) => debug!(%peer, error = %e, "Connection ended with error"),
        Err(e) => error!(%peer, error = %e, "Session task failed"),
    }
    live.remove(&id);
}
