//! TCP transport for [`NetSocket`].
//!
//! Each accepted or dialled connection gets its own [`Context`] and one
//! driver task:
//!
//! ```text
//! ┌───────────────── driver task ─────────────────┐
//! │ select!                                        │
//! │   read (only while flowing) ─► handle_data     │
//! │   wait_for_demand (while paused)               │
//! │   next_outbound ─► write_all / shutdown        │
//! └────────────────────────────────────────────────┘
//! ```
//!
//! The connect handler is queued on the context before the driver starts,
//! so it always runs before the first `handle_data`.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::Buffer;
use crate::context::Context;
use crate::endpoint::{NetSocket, NetSocketOptions};
use crate::error::{Error, Result};
use crate::eventbus::EventBus;
use crate::identifiers::HandlerId;
use crate::stream::StreamState;

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
pub const DEFAULT_BIND_IP: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// How often the accept loop checks the shutdown flag.
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Connect handler for servers.
type ConnectHandler = Arc<dyn Fn(NetSocket) + Send + Sync>;

// ============================================================================
// NetServer
// ============================================================================

/// TCP server handing each connection to a handler as a [`NetSocket`].
///
/// # Example
///
/// ```ignore
/// let server = NetServer::bind(DEFAULT_BIND_IP, 0, &bus, |socket| {
///     let echo = socket.clone();
///     socket.handler(move |data| { let _ = echo.write(data); });
/// })
/// .await?;
/// println!("listening on {}", server.local_address());
/// ```
pub struct NetServer {
    /// Bound address.
    local_address: SocketAddr,

    /// Bus the sockets register their write handlers on.
    bus: EventBus,

    /// Per-socket configuration.
    options: NetSocketOptions,

    /// User connect handler.
    handler: ConnectHandler,

    /// Open sockets by write handler id.
    connections: RwLock<FxHashMap<HandlerId, NetSocket>>,

    /// Shutdown flag.
    shutdown: AtomicBool,
}

impl NetServer {
    /// Binds and starts accepting with default socket options.
    ///
    /// Use port 0 to let the OS pick a free port.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if binding fails.
    pub async fn bind<F>(ip: IpAddr, port: u16, bus: &EventBus, handler: F) -> Result<Arc<Self>>
    where
        F: Fn(NetSocket) + Send + Sync + 'static,
    {
        Self::bind_with_options(ip, port, bus, NetSocketOptions::new(), handler).await
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
        options: NetSocketOptions,
        handler: F,
    ) -> Result<Arc<Self>>
    where
        F: Fn(NetSocket) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind(SocketAddr::new(ip, port)).await?;
        let local_address = listener.local_addr()?;

        debug!(%local_address, "NetServer bound");

        let server = Arc::new(Self {
            local_address,
            bus: bus.clone(),
            options,
            handler: Arc::new(handler),
            connections: RwLock::new(FxHashMap::default()),
            shutdown: AtomicBool::new(false),
        });

        tokio::spawn(Arc::clone(&server).accept_loop(listener));

        info!(%local_address, "NetServer started");

        Ok(server)
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
        info!(local_address = %self.local_address, "NetServer shutting down");

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
                Ok(Ok((stream, addr))) => self.handle_connection(stream, addr),
                Ok(Err(e)) => error!(error = %e, "Accept failed"),
                Err(_) => continue,
            }
        }

        debug!("Accept loop terminated");
    }

    /// Wraps one accepted stream and starts its driver.
    fn handle_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        debug!(?addr, "New TCP connection");

        let context = Context::new();
        let socket = NetSocket::new(
            &self.bus,
            context.clone(),
            &self.options,
            stream.local_addr().ok(),
            Some(addr),
        );
        let handler_id = socket.write_handler_id().clone();
        self.connections
            .write()
            .insert(handler_id.clone(), socket.clone());

        let handler = Arc::clone(&self.handler);
        let accepted = socket.clone();
        context.execute(move || handler(accepted));

        let server = Arc::clone(self);
        let read_buffer_size = self.options.read_buffer_size;
        tokio::spawn(async move {
            run_connection(socket, stream, read_buffer_size).await;
            server.connections.write().remove(&handler_id);
            debug!(?addr, "TCP connection finished");
        });
    }
}

// ============================================================================
// NetClient
// ============================================================================

/// Dials TCP connections and wraps them as [`NetSocket`]s.
#[derive(Debug, Clone)]
pub struct NetClient {
    bus: EventBus,
    options: NetSocketOptions,
}

impl NetClient {
    /// Creates a client with default socket options.
    #[must_use]
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            options: NetSocketOptions::new(),
        }
    }

    /// Sets the socket options for later connections.
    #[inline]
    #[must_use]
    pub fn with_options(mut self, options: NetSocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Connects to `address`.
    ///
    /// `handler` runs on the socket's context before any data is delivered,
    /// so it can install the data handler without losing bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] if the connection cannot be opened.
    pub async fn connect<F>(&self, address: SocketAddr, handler: F) -> Result<NetSocket>
    where
        F: FnOnce(NetSocket) + Send + 'static,
    {
        let stream = TcpStream::connect(address)
            .await
            .map_err(|e| Error::connection(format!("TCP connect to {address} failed: {e}")))?;

        let context = Context::new();
        let socket = NetSocket::new(
            &self.bus,
            context.clone(),
            &self.options,
            stream.local_addr().ok(),
            Some(address),
        );

        let connected = socket.clone();
        context.execute(move || handler(connected));

        tokio::spawn(run_connection(
            socket.clone(),
            stream,
            self.options.read_buffer_size,
        ));

        info!(%address, "TCP connection established");
        Ok(socket)
    }
}

// ============================================================================
// Connection Driver
// ============================================================================

/// Moves bytes between `stream` and `socket` until either side closes.
async fn run_connection(socket: NetSocket, stream: TcpStream, read_buffer_size: usize) {
    let (mut reader, mut writer) = stream.into_split();
    let mut chunk = vec![0u8; read_buffer_size.max(1)];
    let mut reading = true;

    loop {
        let flowing = reading && socket.state() == StreamState::Flowing;

        tokio::select! {
            read = reader.read(&mut chunk), if flowing => {
                match read {
                    Ok(0) => {
                        debug!("TCP connection closed by peer");
                        socket.handle_end();
                        break;
                    }
                    Ok(n) => {
                        trace!(bytes = n, "TCP read");
                        socket.handle_data(Buffer::from(&chunk[..n]));
                    }
                    Err(e) => {
                        warn!(error = %e, "TCP read failed");
                        socket.handle_error(e.into());
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
                match outbound {
                    Some(data) => {
                        if let Err(e) = writer.write_all(&data.to_vec()).await {
                            warn!(error = %e, "TCP write failed");
                            socket.handle_error(e.into());
                            break;
                        }
                    }
                    None => {
                        if let Err(e) = writer.shutdown().await {
                            trace!(error = %e, "TCP shutdown failed");
                        }
                        break;
                    }
                }
            }
        }
    }

    socket.handle_closed();
}

// ============================================================================
// Tests
// ============================================================================
