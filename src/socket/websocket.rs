//! WebSocket Transport
//!
//! Implements [`Socket`] on top of tokio-tungstenite. Every socket is backed
//! by a pump task that owns the stream: outbound frames are queued on an
//! unbounded channel and inbound frames are handed to the socket's listener.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

use super::{
    Socket, SocketError, SocketId, SocketListener, SocketRef, ABNORMAL_CLOSURE, NORMAL_CLOSURE,
};

/// Commands sent to the pump task
#[derive(Debug)]
enum Outbound {
    Text(String),
    Close { code: u16, reason: String },
}

/// A text WebSocket to another node
pub struct WebSocket {
    id: SocketId,
    /// Remote URL or address, for logging
    peer: String,
    outbound: mpsc::UnboundedSender<Outbound>,
    cancelled: Notify,
    closed: AtomicBool,
}

impl WebSocket {
    fn new(peer: String) -> (Arc<Self>, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let socket = Arc::new(Self {
            id: SocketId::next(),
            peer,
            outbound: tx,
            cancelled: Notify::new(),
            closed: AtomicBool::new(false),
        });
        (socket, rx)
    }

    /// Remote URL or address of this socket
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Open an outbound connection to `url`.
    ///
    /// Returns immediately; frames sent before the handshake completes are
    /// queued. A failed connect is reported through `listener.on_failure`.
    pub fn connect(
        url: String,
        listener: Arc<dyn SocketListener>,
        connect_timeout: Duration,
    ) -> SocketRef {
        let (socket, outbound) = Self::new(url.clone());
        let handle = socket.clone();

        tokio::spawn(async move {
            debug!("WebSocket {}: connecting to {}", handle.id, url);
            let connect = tokio_tungstenite::connect_async(url.as_str());
            match tokio::time::timeout(connect_timeout, connect).await {
                Ok(Ok((stream, _response))) => {
                    debug!("WebSocket {}: connected to {}", handle.id, url);
                    handle.run(stream, outbound, listener).await;
                }
                Ok(Err(e)) => handle.fail(&listener, SocketError::Connect(e.to_string())),
                Err(_) => handle.fail(
                    &listener,
                    SocketError::Connect(format!("timed out after {:?}", connect_timeout)),
                ),
            }
        });

        socket
    }

    /// A socket to a peer that cannot be reached at all.
    ///
    /// The failure is delivered asynchronously, the same way a refused
    /// connection would be.
    pub fn unreachable(peer: String, listener: Arc<dyn SocketListener>, reason: String) -> SocketRef {
        let (socket, _outbound) = Self::new(peer);
        socket.closed.store(true, Ordering::SeqCst);
        let handle = socket.clone();
        tokio::spawn(async move {
            handle.fail(&listener, SocketError::Connect(reason));
        });
        socket
    }

    /// Serve an accepted connection.
    ///
    /// `listener_for` receives the new socket and returns the listener that
    /// handles its inbound traffic.
    pub fn serve<S, F>(stream: WebSocketStream<S>, peer: String, listener_for: F) -> SocketRef
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: FnOnce(SocketRef) -> Arc<dyn SocketListener>,
    {
        let (socket, outbound) = Self::new(peer);
        let listener = listener_for(socket.clone());
        let handle = socket.clone();
        tokio::spawn(async move {
            handle.run(stream, outbound, listener).await;
        });
        socket
    }

    fn fail(self: &Arc<Self>, listener: &Arc<dyn SocketListener>, error: SocketError) {
        debug!("WebSocket {} ({}): {}", self.id, self.peer, error);
        self.closed.store(true, Ordering::SeqCst);
        let socket: SocketRef = self.clone();
        listener.on_failure(&socket, &error);
    }

    /// Pump frames between the stream, the outbound queue and the listener
    async fn run<S>(
        self: Arc<Self>,
        stream: WebSocketStream<S>,
        mut outbound: mpsc::UnboundedReceiver<Outbound>,
        listener: Arc<dyn SocketListener>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let socket: SocketRef = self.clone();
        let (mut sink, mut source) = stream.split();

        loop {
            tokio::select! {
                _ = self.cancelled.notified() => {
                    self.fail(&listener, SocketError::Cancelled);
                    return;
                }

                Some(command) = outbound.recv() => match command {
                    Outbound::Text(text) => {
                        if let Err(e) = sink.send(Message::Text(text)).await {
                            self.fail(&listener, SocketError::Transport(e.to_string()));
                            return;
                        }
                    }
                    Outbound::Close { code, reason } => {
                        let frame = CloseFrame {
                            code: CloseCode::from(code),
                            reason: reason.clone().into(),
                        };
                        let _ = sink.send(Message::Close(Some(frame))).await;
                        debug!("WebSocket {}: closed ({} {})", self.id, code, reason);
                        listener.on_closed(&socket, code, &reason);
                        return;
                    }
                },

                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => listener.on_message(&socket, &text),
                    Some(Ok(Message::Close(frame))) => {
                        self.closed.store(true, Ordering::SeqCst);
                        let (code, reason) = frame
                            .map(|f| (u16::from(f.code), f.reason.into_owned()))
                            .unwrap_or((NORMAL_CLOSURE, String::new()));
                        debug!("WebSocket {}: peer closing ({} {})", self.id, code, reason);
                        listener.on_closing(&socket, code, &reason);
                        // Flushes the close reply queued by tungstenite
                        let _ = sink.close().await;
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.fail(&listener, SocketError::Transport(e.to_string()));
                        return;
                    }
                    None => {
                        self.closed.store(true, Ordering::SeqCst);
                        listener.on_closed(&socket, ABNORMAL_CLOSURE, "connection ended");
                        return;
                    }
                },
            }
        }
    }
}

impl Socket for WebSocket {
    fn id(&self) -> SocketId {
        self.id
    }

    fn send(&self, text: &str) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.outbound.send(Outbound::Text(text.to_string())).is_ok()
    }

    fn close(&self, code: u16, reason: &str) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.outbound
            .send(Outbound::Close {
                code,
                reason: reason.to_string(),
            })
            .is_ok()
    }

    fn cancel(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.cancelled.notify_one();
    }
}
