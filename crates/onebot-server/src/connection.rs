//! Listening endpoint and single-peer connection slot.
//!
//! The first WebSocket peer to connect owns the slot until it disconnects.
//! Any other attempt meanwhile is closed with a policy-violation frame before
//! a single application frame is read from it.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{close_code, CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use onebot_core::{EchoGenerator, OneBotError, PeerId, Result};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::correlator::CallCommand;
use crate::dispatcher::ListenerRegistry;
use crate::session::{Session, SessionChannels};

const SELF_ID_HEADER: &str = "x-self-id";
const CLIENT_ROLE_HEADER: &str = "x-client-role";
const SIGNAL_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Identity of the connected peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub addr: SocketAddr,
    /// Bot account id from the `X-Self-ID` header.
    pub self_id: Option<String>,
    /// Value of the `X-Client-Role` header (`Universal`, `API`, `Event`).
    pub role: Option<String>,
    pub connected_at: DateTime<Utc>,
}

impl PeerInfo {
    pub fn from_headers(addr: SocketAddr, headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_owned)
        };
        Self {
            id: PeerId::new(),
            addr,
            self_id: header(SELF_ID_HEADER),
            role: header(CLIENT_ROLE_HEADER),
            connected_at: Utc::now(),
        }
    }
}

/// Connection lifecycle signal.
#[derive(Clone, Debug)]
pub enum ConnectionEvent {
    Connected(PeerInfo),
    Disconnected(PeerInfo),
}

struct ActivePeer {
    info: PeerInfo,
    commands: mpsc::Sender<CallCommand>,
    cancel: CancellationToken,
}

/// The single-peer slot. `accepting` is true only between `start` and `stop`.
#[derive(Default)]
struct Slot {
    accepting: bool,
    peer: Option<ActivePeer>,
}

/// Outcome of an upgraded connection asking for the slot.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Claim {
    Accepted,
    Occupied,
    Closed,
}

/// When the peer last sent us anything, as millis since `origin`.
struct LastSeen {
    origin: Instant,
    millis: AtomicU64,
}

impl LastSeen {
    fn new() -> Self {
        Self {
            origin: Instant::now(),
            millis: AtomicU64::new(0),
        }
    }

    fn touch(&self) {
        let millis = u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.millis.store(millis, Ordering::Relaxed);
    }

    fn idle(&self) -> Duration {
        let seen = Duration::from_millis(self.millis.load(Ordering::Relaxed));
        self.origin.elapsed().saturating_sub(seen)
    }
}

/// Ping schedule and the silence after which the peer is dropped.
struct Heartbeat {
    interval: Duration,
    timeout: Duration,
    last_seen: Arc<LastSeen>,
}

struct RunningServer {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    config: ServerConfig,
    listeners: Arc<ListenerRegistry>,
    echoes: Arc<EchoGenerator>,
    slot: Mutex<Slot>,
    signals: broadcast::Sender<ConnectionEvent>,
    server: tokio::sync::Mutex<Option<RunningServer>>,
}

impl ConnectionManager {
    pub fn new(config: ServerConfig) -> Self {
        let (signals, _) = broadcast::channel(SIGNAL_CAPACITY);
        Self {
            config,
            listeners: Arc::new(ListenerRegistry::new()),
            echoes: Arc::new(EchoGenerator::new()),
            slot: Mutex::new(Slot::default()),
            signals,
            server: tokio::sync::Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        &self.listeners
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.signals.subscribe()
    }

    pub fn peer(&self) -> Option<PeerInfo> {
        self.slot.lock().peer.as_ref().map(|peer| peer.info.clone())
    }

    pub fn is_connected(&self) -> bool {
        self.slot.lock().peer.is_some()
    }

    /// Call queue of the active session, if any.
    pub fn command_sender(&self) -> Option<mpsc::Sender<CallCommand>> {
        self.slot.lock().peer.as_ref().map(|peer| peer.commands.clone())
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.server.lock().await.as_ref().map(|server| server.addr)
    }

    /// Bind and begin accepting connections.
    ///
    /// While already running this returns the bound address without rebinding.
    pub async fn start(self: &Arc<Self>) -> Result<SocketAddr> {
        let mut server = self.server.lock().await;
        if let Some(running) = server.as_ref() {
            if !running.handle.is_finished() {
                debug!(addr = %running.addr, "server already running");
                return Ok(running.addr);
            }
        }

        let addr = self.config.bind_addr();
        let bind_error = |source| OneBotError::Bind {
            addr: addr.clone(),
            source,
        };
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        self.open();

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let router = build_router(Arc::clone(self));
        let handle = tokio::spawn(async move {
            let service = router.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(error) = axum::serve(listener, service)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await
            {
                warn!(error = %error, "server loop failed");
            }
        });

        info!(addr = %local_addr, "OneBot reverse WebSocket server listening");
        *server = Some(RunningServer {
            addr: local_addr,
            cancel,
            handle,
        });
        Ok(local_addr)
    }

    /// Close the listening endpoint and the active connection. Idempotent.
    ///
    /// Connections still finishing their upgrade are refused from here on.
    pub async fn stop(&self) {
        let running = self.server.lock().await.take();

        if let Some(peer) = self.close() {
            info!(peer_id = %peer.info.id, "closing active connection");
            peer.cancel.cancel();
        }

        let Some(running) = running else {
            return;
        };
        running.cancel.cancel();

        match tokio::time::timeout(SHUTDOWN_GRACE, running.handle).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(error = %error, "server task panicked"),
            Err(_) => warn!("server did not shut down within grace period"),
        }
        info!(addr = %running.addr, "OneBot reverse WebSocket server stopped");
    }

    /// Let upgraded connections claim the slot.
    pub(crate) fn open(&self) {
        self.slot.lock().accepting = true;
    }

    /// Refuse further claims and hand back the current peer, if any.
    fn close(&self) -> Option<ActivePeer> {
        let mut slot = self.slot.lock();
        slot.accepting = false;
        slot.peer.take()
    }

    /// Claim the slot for `info`. Refused while another peer holds it or
    /// once the server has stopped.
    pub(crate) fn claim(
        &self,
        info: &PeerInfo,
        commands: mpsc::Sender<CallCommand>,
        cancel: CancellationToken,
    ) -> Claim {
        let mut slot = self.slot.lock();
        if !slot.accepting {
            return Claim::Closed;
        }
        if slot.peer.is_some() {
            return Claim::Occupied;
        }
        slot.peer = Some(ActivePeer {
            info: info.clone(),
            commands,
            cancel,
        });
        Claim::Accepted
    }

    /// Clear the slot if `peer_id` still holds it.
    fn release(&self, peer_id: &PeerId) {
        let mut slot = self.slot.lock();
        if slot.peer.as_ref().is_some_and(|peer| &peer.info.id == peer_id) {
            slot.peer = None;
        }
    }

    async fn handle_socket(self: Arc<Self>, mut socket: WebSocket, info: PeerInfo) {
        let capacity = self.config.queue_capacity();
        let (command_tx, command_rx) = mpsc::channel(capacity);
        let cancel = CancellationToken::new();

        let refusal = match self.claim(&info, command_tx, cancel.clone()) {
            Claim::Accepted => None,
            Claim::Occupied => {
                warn!(addr = %info.addr, self_id = ?info.self_id, "rejecting connection: a peer is already connected");
                Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: Utf8Bytes::from_static("another peer is already connected"),
                })
            }
            Claim::Closed => {
                debug!(addr = %info.addr, "rejecting connection: server is stopping");
                Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: Utf8Bytes::from_static("server is stopping"),
                })
            }
        };
        if let Some(frame) = refusal {
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }

        info!(
            peer_id = %info.id,
            addr = %info.addr,
            self_id = ?info.self_id,
            role = ?info.role,
            "peer connected"
        );
        let _ = self.signals.send(ConnectionEvent::Connected(info.clone()));

        let (sink, stream) = socket.split();
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);

        let last_seen = Arc::new(LastSeen::new());
        let heartbeat = Heartbeat {
            interval: self.config.heartbeat_interval(),
            timeout: self.config.peer_timeout(),
            last_seen: Arc::clone(&last_seen),
        };
        let writer = tokio::spawn(write_frames(
            sink,
            outbound_rx,
            heartbeat,
            cancel.clone(),
            info.id.clone(),
        ));
        let reader = tokio::spawn(read_frames(stream, inbound_tx, last_seen, info.id.clone()));

        let session = Session::new(
            info.id.clone(),
            Arc::clone(&self.listeners),
            Arc::clone(&self.echoes),
        );
        let channels = SessionChannels {
            inbound: inbound_rx,
            outbound: outbound_tx,
            commands: command_rx,
        };
        session.run(channels, cancel).await;

        // The session dropped the outbound queue, so a live writer sends Close and exits.
        reader.abort();
        if tokio::time::timeout(SHUTDOWN_GRACE, writer).await.is_err() {
            debug!(peer_id = %info.id, "writer did not finish in time");
        }

        self.release(&info.id);
        info!(peer_id = %info.id, addr = %info.addr, "peer disconnected");
        let _ = self.signals.send(ConnectionEvent::Disconnected(info));
    }
}

fn build_router(manager: Arc<ConnectionManager>) -> Router {
    Router::new()
        .fallback(ws_handler)
        .with_state(manager)
        .layer(TraceLayer::new_for_http())
}

/// Upgrade handler mounted on every path.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    State(manager): State<Arc<ConnectionManager>>,
) -> Response {
    let info = PeerInfo::from_headers(addr, &headers);
    let max_message_size = manager.config.max_message_size;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| manager.handle_socket(socket, info))
        .into_response()
}

/// Forward queued frames to the socket and ping every heartbeat interval.
///
/// Cancels the session when the socket fails or the peer has been silent
/// for longer than the heartbeat timeout.
async fn write_frames(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<String>,
    heartbeat: Heartbeat,
    session: CancellationToken,
    peer_id: PeerId,
) {
    let mut ping_interval = tokio::time::interval(heartbeat.interval);
    ping_interval.tick().await; // consume first immediate tick

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    let frame = CloseFrame {
                        code: close_code::NORMAL,
                        reason: Utf8Bytes::from_static("server closing"),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                let idle = heartbeat.last_seen.idle();
                if idle > heartbeat.timeout {
                    warn!(peer_id = %peer_id, idle_ms = idle.as_millis() as u64, "peer stopped answering pings");
                    break;
                }
                if sink.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
                tracing::trace!(peer_id = %peer_id, "sent ping");
            }
        }
    }
    session.cancel();
}

/// Forward text frames (and UTF-8 binary frames) to the session.
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    inbound: mpsc::Sender<String>,
    last_seen: Arc<LastSeen>,
    peer_id: PeerId,
) {
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(error) => {
                debug!(peer_id = %peer_id, error = %error, "socket read failed");
                break;
            }
        };
        last_seen.touch();
        let text = match message {
            Message::Text(text) => text.as_str().to_owned(),
            Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    warn!(peer_id = %peer_id, len = bytes.len(), "dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Message::Close(frame) => {
                debug!(peer_id = %peer_id, ?frame, "peer sent close");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => continue, // axum answers pings
        };
        if inbound.send(text).await.is_err() {
            break;
        }
    }
}
