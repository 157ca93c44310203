//! HTTP/1.1 server loop.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};

use crate::dispatcher::Gateway;
use crate::error::{GatewayError, GatewayResult};
use crate::shutdown::{ConnectionTracker, ShutdownSignal};

/// Serves a [`Gateway`] over TCP, one task per connection.
#[derive(Debug, Clone)]
pub struct GatewayServer {
    gateway: Gateway,
    shutdown_timeout: Duration,
}

impl GatewayServer {
    /// Create a server.
    pub fn new(gateway: Gateway, shutdown_timeout: Duration) -> Self {
        Self {
            gateway,
            shutdown_timeout,
        }
    }

    /// Bind `addr` and serve until `shutdown` fires.
    pub async fn run(self, addr: SocketAddr, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::server(format!("failed to bind {addr}: {e}")))?;
        self.serve(listener, shutdown).await
    }

    /// Serve connections from `listener` until `shutdown` fires.
    ///
    /// Readiness is set once serving starts and cleared when shutdown begins.
    /// Open connections are then closed gracefully, bounded by the shutdown
    /// timeout.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownSignal) -> GatewayResult<()> {
        let local_addr = listener.local_addr()?;
        let tracker = ConnectionTracker::new();

        self.gateway.health().set_ready(true);
        tracing::info!(
            addr = %local_addr,
            routes = self.gateway.routes().len(),
            "Gateway listening"
        );

        loop {
            tokio::select! {
                result = listener.accept() => match result {
                    Ok((stream, peer)) => {
                        let gateway = self.gateway.clone();
                        let token = tracker.acquire();
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            serve_connection(gateway, stream, peer, shutdown).await;
                            drop(token);
                        });
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to accept connection"),
                },
                () = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        self.gateway.health().set_ready(false);
        drop(listener);

        tracing::info!(
            active = tracker.active_connections(),
            timeout = ?self.shutdown_timeout,
            "Draining connections"
        );
        tokio::select! {
            () = tracker.wait_for_drain() => tracing::info!("All connections closed"),
            () = tokio::time::sleep(self.shutdown_timeout) => tracing::warn!(
                active = tracker.active_connections(),
                "Shutdown timeout reached with connections still open"
            ),
        }

        tracing::info!("Gateway stopped");
        Ok(())
    }
}

async fn serve_connection(
    gateway: Gateway,
    stream: TcpStream,
    peer: SocketAddr,
    shutdown: ShutdownSignal,
) {
    let service = service_fn(move |req: Request<Incoming>| {
        let gateway = gateway.clone();
        async move { Ok::<_, Infallible>(gateway.dispatch(req, peer).await) }
    });

    let conn = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(conn);

    let result = tokio::select! {
        result = conn.as_mut() => result,
        () = shutdown.recv() => {
            conn.as_mut().graceful_shutdown();
            conn.await
        }
    };

    if let Err(e) = result {
        tracing::debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;

    #[tokio::test]
    async fn test_serve_and_shutdown() {
        let config = GatewayConfig::builder().metrics(false).build().unwrap();
        let gateway = Gateway::from_config(config).unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = ShutdownSignal::new();

        let server = GatewayServer::new(gateway.clone(), Duration::from_secs(1));
        let handle = tokio::spawn(server.serve(listener, shutdown.clone()));

        let body = reqwest::get(format!("http://{addr}/health"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, r#"{"status":"healthy"}"#);
        assert!(gateway.health().is_ready());

        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!gateway.health().is_ready());
    }
}
