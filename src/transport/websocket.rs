//! WebSocket transport for [`WebSocket`] / [`ServerWebSocket`].
//!
//! # Connection Flow
//!
//! 1. `WebSocketServer::bind` binds to `ip:port` (port 0 for random)
//! 2. Each TCP connection is upgraded with `accept_hdr_async`
//! 3. Inside the handshake callback the connect handler runs with the new
//!    socket's context marked current; calling `reject()` there answers the
//!    upgrade with `404 Not Found`
//! 4. Accepted sockets are driven by one task until either side closes
//!
//! Inbound tungstenite messages arrive whole and become single final frames.
//! Outbound frames go on the wire one for one, so fragmentation by
//! `max_frame_size` is what the peer sees.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::Frame as WireFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::{Data, OpCode};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Buffer;
use crate::context::Context;
use crate::endpoint::{ServerWebSocket, WebSocket, WebSocketOptions};
use crate::error::{Error, Result};
use crate::eventbus::EventBus;
use crate::frame::{Frame, FrameKind, FrameSequencer};
use crate::identifiers::HandlerId;
use crate::multimap::MultiMap;
use crate::stream::StreamState;

// ============================================================================
// Constants
// ============================================================================

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connect handler for servers.
type ConnectHandler = Arc<dyn Fn(ServerWebSocket) + Send + Sync>;

// ============================================================================
// WebSocketServer
// ============================================================================

/// WebSocket server handing each upgraded connection to a handler.
///
/// # Example
///
/// ```ignore
/// let server = WebSocketServer::bind(DEFAULT_BIND_IP, 0, &bus, |ws| {
///     if ws.path() != "/chat" {
///         let _ = ws.reject();
///         return;
///     }
///     let echo = ws.as_websocket().clone();
///     ws.message_handler(move |msg| { let _ = echo.write_text_message(&msg.text_data()); });
/// })
/// .await?;
/// println!("WebSocket URL: {}", server.ws_url());
/// ```
pub struct WebSocketServer {
    /// Bound address.
    local_address: SocketAddr,

    /// Bus the sockets register their handler ids on.
    bus: EventBus,

    /// Per-socket configuration.
    options: WebSocketOptions,

    /// User connect handler.
    handler: ConnectHandler,

    /// Open sockets by binary handler id.
    connections: RwLock<FxHashMap<HandlerId, WebSocket>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

impl WebSocketServer {
    /// Binds and starts accepting with default socket options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind<F>(ip: IpAddr, port: u16, bus: &EventBus, handler: F) -> Result<Arc<Self>>
    where
        F: Fn(ServerWebSocket) + Send + Sync + 'static,
    {
        Self::bind_with_options(ip, port, bus, WebSocketOptions::new(), handler).await
    }

    /// Binds and starts accepting.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind_with_options<F>(
        ip: IpAddr,
        port: u16,
        bus: &EventBus,
        options: WebSocketOptions,
        handler: F,
    ) -> Result<Arc<Self>>
    where
        F: Fn(ServerWebSocket) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_address = listener.local_addr()?;

        debug!(%local_address, "WebSocket server bound");

        let server = Arc::new(Self {
            local_address,
            bus: bus.clone(),
            options,
            handler: Arc::new(handler),
            connections: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));

        info!(%local_address, "WebSocket server started");

        Ok(server)
    }

    /// Returns the WebSocket URL for this server.
    ///
    /// Format: `ws://{ip}:{port}`
    #[inline]
    #[must_use]
    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.local_address)
    }

    /// Bound address.
    #[inline]
    #[must_use]
    pub fn local_address(&self) -> SocketAddr {
        self.local_address
    }

    /// Bound port.
    #[inline]
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_address.port()
    }

    /// Number of open connections.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Stops accepting and closes every open socket.
    pub fn close(&self) {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(local_address = %self.local_address, "WebSocket server shutting down");

        let connections: Vec<_> = self.connections.write().drain().collect();
        for (handler_id, socket) in connections {
            socket.close();
            debug!(%handler_id, "Connection closed during shutdown");
        }
    }

    /// Background task that accepts new connections.
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        debug!("Accept loop started");

        loop {
            if self.shutdown.load(Ordering::SeqCst) {
                debug!("Accept loop shutting down");
                break;
            }

            match timeout(ACCEPT_POLL_INTERVAL, listener.accept()).await {
                Ok(Ok((stream, addr))) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_connection(stream, addr).await {
                            warn!(error = %e, ?addr, "Connection handling failed");
                        }
                    });
                }
                Ok(Err(e)) => error!(error = %e, "Accept failed"),
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Upgrades one connection and drives it until it closes.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(?addr, "New TCP connection");

        let context = Context::new();
        let socket = WebSocket::new(
            &self.bus,
            context.clone(),
            &self.options,
            stream.local_addr().ok(),
            Some(addr),
        );

        let mut handshake: Option<ServerWebSocket> = None;
        let upgraded = tokio_tungstenite::accept_hdr_async(
            stream,
            |request: &Request, response: Response| -> std::result::Result<Response, ErrorResponse> {
                let server_socket = ServerWebSocket::new(
                    socket.clone(),
                    request.uri().to_string(),
                    request_headers(request),
                );
                context.enter(|| (self.handler)(server_socket.clone()));

                let accepted = server_socket.accept_handshake();
                handshake = Some(server_socket);
                if accepted {
                    Ok(response)
                } else {
                    let mut refusal = ErrorResponse::new(None);
                    *refusal.status_mut() = StatusCode::NOT_FOUND;
                    Err(refusal)
                }
            },
        )
        .await;

        let ws_stream = match (upgraded, handshake) {
            (Ok(ws_stream), Some(_)) => ws_stream,
            (Err(_), Some(server_socket)) if server_socket.is_rejected() => {
                debug!(?addr, uri = %server_socket.uri(), "WebSocket upgrade refused");
                socket.close();
                socket.handle_closed();
                return Ok(());
            }
            (result, _) => {
                socket.close();
                socket.handle_closed();
                let reason = result.err().map_or_else(
                    || "handshake callback not invoked".to_string(),
                    |e| e.to_string(),
                );
                return Err(Error::connection(format!("WebSocket upgrade failed: {reason}")));
            }
        };

        info!(?addr, "WebSocket connection established");

        let handler_id = socket.binary_handler_id().clone();
        self.connections
            .write()
            .insert(handler_id.clone(), socket.clone());

        run_connection(socket, ws_stream).await;

        self.connections.write().remove(&handler_id);
        debug!(?addr, "WebSocket connection finished");
        Ok(())
    }
}

/// Copies handshake headers that are valid strings.
fn request_headers(request: &Request) -> MultiMap {
    request
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}

// ============================================================================
// Client
// ============================================================================

/// Opens a client WebSocket to `url`.
///
/// `handler` runs on the socket's context before any frame is delivered.
///
/// # Errors
///
/// Returns [`Error::Connection`] if the connection or upgrade fails.
pub async fn connect<F>(
    url: &str,
    bus: &EventBus,
    options: &WebSocketOptions,
    handler: F,
) -> Result<WebSocket>
where
    F: FnOnce(WebSocket) + Send + 'static,
{
    let (ws_stream, _response) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| Error::connection(format!("WebSocket connect to {url} failed: {e}")))?;

    let (local_address, remote_address) = match ws_stream.get_ref() {
        MaybeTlsStream::Plain(tcp) => (tcp.local_addr().ok(), tcp.peer_addr().ok()),
        _ => (None, None),
    };

    let context = Context::new();
    let socket = WebSocket::new(bus, context.clone(), options, local_address, remote_address);

    let connected = socket.clone();
    context.execute(move || handler(connected));

    tokio::spawn(run_connection(socket.clone(), ws_stream));

    info!(url, "WebSocket connection established");
    Ok(socket)
}

// ============================================================================
// Connection Driver
// ============================================================================

/// Moves messages between `ws_stream` and `socket` until either side closes.
async fn run_connection<S>(socket: WebSocket, ws_stream: WebSocketStream<S>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_write, mut ws_read) = ws_stream.split();
    let mut sequencer = FrameSequencer::new();
    let mut reading = true;

    loop {
        let flowing = reading && socket.state() == StreamState::Flowing;

        tokio::select! {
            message = ws_read.next(), if flowing => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        socket.handle_frame(Frame::text(text.as_str(), true));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        socket.handle_frame(Frame::binary(Buffer::from(data.to_vec()), true));
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("WebSocket closed by remote");
                        socket.handle_end();
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket read failed");
                        socket.handle_error(e.into());
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        socket.handle_end();
                        break;
                    }
                }
            }

            demand = socket.wait_for_demand(), if reading && !flowing => {
                if !demand {
                    reading = false;
                }
            }

            outbound = socket.next_outbound() => {
                let Some(frame) = outbound else {
                    trace!("Outbound queue closed");
                    break;
                };
                if let Err(e) = sequencer.check(&frame) {
                    warn!(error = %e, "Invalid outbound frame sequence");
                    socket.handle_error(e);
                    break;
                }
                if let Err(e) = ws_write.send(Message::Frame(wire_frame(frame))).await {
                    warn!(error = %e, "WebSocket write failed");
                    socket.handle_error(e.into());
                    break;
                }
            }
        }
    }

    if let Err(e) = ws_write.close().await {
        trace!(error = %e, "WebSocket close failed");
    }
    socket.handle_closed();
}

/// Converts an endpoint frame into a tungstenite data frame.
fn wire_frame(frame: Frame) -> WireFrame {
    let opcode = match frame.kind() {
        FrameKind::Text => OpCode::Data(Data::Text),
        FrameKind::Binary => OpCode::Data(Data::Binary),
        FrameKind::Continuation => OpCode::Data(Data::Continue),
    };
    let is_final = frame.is_final();
    WireFrame::message(frame.into_payload().to_vec(), opcode, is_final)
}

// ============================================================================
// Tests
// ============================================================================
