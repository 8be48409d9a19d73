// ABOUTME: HTTP listener: accept loop, per-connection limits and graceful shutdown
// ABOUTME: Drives the axum router over hyper's auto HTTP/1 + HTTP/2 connections

use anyhow::{Context, Result};
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder;
use std::{future::Future, net::SocketAddr, time::Duration};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower::Service;
use tracing::{debug, error, info, warn};

/// Per-connection limits and the shutdown grace period
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Time allowed to receive the request headers
    pub read_timeout: Duration,
    /// Time allowed to handle a request and produce the response
    pub write_timeout: Duration,
    pub max_header_bytes: usize,
    /// How long shutdown waits for in-flight requests
    pub shutdown_grace: Duration,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            max_header_bytes: 1 << 20,
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

pub struct HttpListener {
    listener: TcpListener,
    router: Router,
    limits: ConnectionLimits,
    shutdown: CancellationToken,
    connections: TaskTracker,
}

impl HttpListener {
    /// Bind the listening socket. Failing to bind is fatal for the caller.
    pub async fn bind(addr: &str, router: Router, limits: ConnectionLimits) -> Result<Self> {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("listen: {}", e);
                return Err(e).with_context(|| format!("failed to bind {}", addr));
            }
        };

        Ok(Self {
            listener,
            router,
            limits,
            shutdown: CancellationToken::new(),
            connections: TaskTracker::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `signal` resolves, then shut down gracefully
    pub async fn serve<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.spawn_connection(stream, peer),
                    Err(e) => {
                        // e.g. EMFILE, back off instead of spinning
                        error!("Accept error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
                () = &mut signal => break,
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop accepting, ask open connections to finish and wait up to the
    /// grace period. Expiry is logged, not returned.
    pub async fn shutdown(self) {
        let HttpListener {
            listener,
            limits,
            shutdown,
            connections,
            ..
        } = self;
        drop(listener);

        shutdown.cancel();
        connections.close();

        match tokio::time::timeout(limits.shutdown_grace, connections.wait()).await {
            Ok(()) => info!("Server stopped, all connections drained"),
            Err(_) => warn!(
                in_flight = connections.len(),
                "Shutdown grace period of {:?} elapsed, abandoning in-flight requests",
                limits.shutdown_grace
            ),
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let io = TokioIo::new(stream);
        let router = self.router.clone();
        let limits = self.limits.clone();
        let shutdown = self.shutdown.clone();

        self.connections.spawn(async move {
            let builder = connection_builder(&limits);
            let conn = builder.serve_connection(
                io,
                hyper::service::service_fn(move |req| {
                    let mut router = router.clone();
                    async move { router.call(req).await }
                }),
            );
            tokio::pin!(conn);

            let mut draining = false;
            loop {
                tokio::select! {
                    result = conn.as_mut() => {
                        if let Err(e) = result {
                            debug!(%peer, "Connection error: {}", e);
                        }
                        break;
                    }
                    () = shutdown.cancelled(), if !draining => {
                        draining = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            }
        });
    }
}

fn connection_builder(limits: &ConnectionLimits) -> Builder<TokioExecutor> {
    let mut builder = Builder::new(TokioExecutor::new());
    builder
        .http1()
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout)
        .max_buf_size(limits.max_header_bytes);
    builder
        .http2()
        .max_header_list_size(u32::try_from(limits.max_header_bytes).unwrap_or(u32::MAX));
    builder
}
