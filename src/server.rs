//! TCP listener and per-connection workers
//!
//! The listener accepts connections in a single dedicated loop and hands
//! each one to a spawned worker. A worker performs exactly one exchange:
//! read a request frame, run inference, write the response frame, close.
//! Worker concurrency is bounded by a semaphore; connections past capacity
//! are rejected without a response.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::engine::InferenceEngine;
use crate::frame::{read_frame, write_frame};
use crate::metrics::{
    CONNECTIONS_REJECTED_TOTAL, CONNECTIONS_TOTAL, PROTOCOL_ERRORS_TOTAL, REQUESTS_IN_FLIGHT,
    REQUEST_SIZE_BYTES, RESPONSE_SIZE_BYTES,
};

/// The inference server: a bound listener plus the shared engine
pub struct NpuServer {
    listener: TcpListener,
    engine: Arc<InferenceEngine>,
    config: ServerConfig,
}

impl NpuServer {
    /// Bind the listening socket.
    ///
    /// A bind failure is fatal to startup; the caller terminates the
    /// process before any client is served.
    pub async fn bind(config: ServerConfig, engine: Arc<InferenceEngine>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(config.listen_addr()).await?;
        info!(
            addr = %listener.local_addr()?,
            engine_state = %engine.state(),
            max_connections = config.max_connections,
            "Server listening"
        );
        Ok(Self {
            listener,
            engine,
            config,
        })
    }

    /// Address the listener actually bound to (useful with port 0)
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until `shutdown` resolves, then drain in-flight
    /// workers for at most the configured drain window.
    ///
    /// Transient accept errors are logged and looped past; they never stop
    /// the listener.
    pub async fn serve_with_shutdown<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let permits = Arc::new(Semaphore::new(self.config.max_connections));
        let mut workers: JoinSet<()> = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown signal received, stopping accept loop");
                    break;
                }
                // Reap finished workers so the set does not grow unbounded.
                Some(_) = workers.join_next(), if !workers.is_empty() => {}
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                                warn!(%peer, "Connection rejected: worker pool at capacity");
                                CONNECTIONS_REJECTED_TOTAL.inc();
                                drop(stream);
                                continue;
                            };
                            let engine = Arc::clone(&self.engine);
                            let io_timeout = self.config.io_timeout;
                            workers.spawn(async move {
                                handle_connection(stream, peer, engine, io_timeout).await;
                                drop(permit);
                            });
                        }
                        Err(e) => {
                            warn!(error = %e, "Accept error");
                        }
                    }
                }
            }
        }

        self.drain(workers).await;
        info!("Server stopped");
    }

    /// Bounded graceful drain: wait for in-flight workers up to the drain
    /// window, then abandon whatever is left.
    async fn drain(&self, mut workers: JoinSet<()>) {
        if workers.is_empty() {
            return;
        }

        info!(
            in_flight = workers.len(),
            window_ms = self.config.drain_timeout.as_millis() as u64,
            "Draining in-flight workers"
        );

        let drained = timeout(self.config.drain_timeout, async {
            while workers.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = workers.len(),
                "Drain window expired, abandoning remaining workers"
            );
            workers.shutdown().await;
        }
    }
}

/// Per-connection worker: exactly one request/response exchange
async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<InferenceEngine>,
    io_timeout: Duration,
) {
    let conn_id = Uuid::now_v7();
    CONNECTIONS_TOTAL.inc();
    REQUESTS_IN_FLIGHT.inc();
    info!(%conn_id, %peer, "New client connected");

    serve_once(&mut stream, conn_id, peer, &engine, io_timeout).await;

    REQUESTS_IN_FLIGHT.dec();
    info!(%conn_id, %peer, "Client disconnected");
}

async fn serve_once(
    stream: &mut TcpStream,
    conn_id: Uuid,
    peer: SocketAddr,
    engine: &InferenceEngine,
    io_timeout: Duration,
) {
    // On any protocol error the connection is closed with nothing written;
    // the failure never propagates beyond this connection.
    let request = match timeout(io_timeout, read_frame(stream)).await {
        Ok(Ok(payload)) => payload,
        Ok(Err(e)) => {
            warn!(%conn_id, %peer, error = %e, "Protocol error, closing connection");
            PROTOCOL_ERRORS_TOTAL.with_label_values(&[e.kind()]).inc();
            return;
        }
        Err(_) => {
            warn!(
                %conn_id, %peer,
                timeout_ms = io_timeout.as_millis() as u64,
                "Request read timed out, closing connection"
            );
            PROTOCOL_ERRORS_TOTAL.with_label_values(&["timeout"]).inc();
            return;
        }
    };

    REQUEST_SIZE_BYTES.observe(request.len() as f64);
    debug!(%conn_id, bytes = request.len(), "Request received");

    let response = engine.run(&request).await;
    RESPONSE_SIZE_BYTES.observe(response.len() as f64);

    if response.is_empty() {
        info!(%conn_id, "Sending empty result (inference failed)");
    } else {
        info!(%conn_id, bytes = response.len(), "Sending result");
    }

    match timeout(io_timeout, write_frame(stream, &response)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(%conn_id, %peer, error = %e, "Failed to write response"),
        Err(_) => warn!(%conn_id, %peer, "Response write timed out"),
    }
}
