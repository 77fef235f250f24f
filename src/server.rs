//! Router Endpoint Server
//!
//! Accepts WebSocket connections from peer routers on the configured path
//! and hands each one to the local router through its [`TopicPeer`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info};

use crate::cluster::{ClusterError, TopicPeer};
use crate::socket::WebSocket;

/// Time a peer has to finish the WebSocket handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket listener for peer routers
pub struct RouterServer {
    local_addr: SocketAddr,
    accept_loop: JoinHandle<()>,
}

impl RouterServer {
    /// Bind `addr` and start accepting connections on `path`
    pub async fn bind(
        addr: SocketAddr,
        path: impl Into<String>,
        peer: Arc<dyn TopicPeer>,
    ) -> Result<Self, ClusterError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let path = path.into();
        info!("Router endpoint listening on {} (path: {})", local_addr, path);

        let accept_loop = tokio::spawn(Self::accept_loop(listener, path, peer));
        Ok(Self {
            local_addr,
            accept_loop,
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections. Sockets already accepted stay open.
    pub fn shutdown(&self) {
        self.accept_loop.abort();
    }

    async fn accept_loop(listener: TcpListener, path: String, peer: Arc<dyn TopicPeer>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("New router connection from {}", addr);
                    let path = path.clone();
                    let peer = peer.clone();
                    tokio::spawn(async move {
                        match tokio::time::timeout(HANDSHAKE_TIMEOUT, Self::handshake(stream, path))
                            .await
                        {
                            Ok(Ok(ws)) => {
                                debug!("WebSocket handshake complete for {}", addr);
                                WebSocket::serve(ws, addr.to_string(), |socket| {
                                    peer.accept_websocket(socket)
                                });
                            }
                            Ok(Err(e)) => debug!("WebSocket handshake failed for {}: {}", addr, e),
                            Err(_) => debug!("WebSocket handshake timed out for {}", addr),
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept router connection: {}", e);
                }
            }
        }
    }

    /// Complete the WebSocket handshake, rejecting requests for other paths
    async fn handshake(
        stream: TcpStream,
        expected_path: String,
    ) -> Result<WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
        tokio_tungstenite::accept_hdr_async(stream, move |req: &Request, response: Response| {
            let request_path = req.uri().path();
            if request_path != expected_path {
                let mut rejection = ErrorResponse::new(Some(format!(
                    "Invalid path: expected '{}', got '{}'",
                    expected_path, request_path
                )));
                *rejection.status_mut() = StatusCode::NOT_FOUND;
                return Err(rejection);
            }
            Ok(response)
        })
        .await
    }
}

impl Drop for RouterServer {
    fn drop(&mut self) {
        self.accept_loop.abort();
    }
}
