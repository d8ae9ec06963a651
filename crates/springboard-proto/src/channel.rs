//! Realtime channel adapter.
//!
//! One Socket.IO connection per process, shared by every screen.  Consumers
//! never register callbacks: they hold a [`Subscription`] for the event names
//! they care about and read events from it in arrival order.  Dropping the
//! subscription detaches it, so teardown is deterministic.
//!
//! The connection task reconnects forever with a fixed delay.  Nothing is
//! replayed across reconnects; owners re-request state when they see
//! [`ChannelEvent::Connected`].

use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::{ChannelEvent, Frame, Outbound, ProtocolError};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Upper bound on connect + Engine.IO open before the attempt is abandoned.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ConnectionState {
    Connected,
    #[default]
    Disconnected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("invalid server URL '{0}'")]
    Url(String),
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("server rejected connection: {0}")]
    Rejected(Value),
    #[error("no traffic for {0:?}")]
    Silent(Duration),
    #[error("handshake timed out")]
    HandshakeTimeout,
}

/// `http://host:3000` → `ws://host:3000/socket.io/?EIO=4&transport=websocket`.
pub fn socket_endpoint(server_url: &str) -> Result<String, ChannelError> {
    let mut url = Url::parse(server_url).map_err(|_| ChannelError::Url(server_url.to_string()))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(ChannelError::Url(server_url.to_string())),
    };
    url.set_scheme(scheme)
        .map_err(|_| ChannelError::Url(server_url.to_string()))?;
    if url.path() == "/" || url.path().is_empty() {
        url.set_path("/socket.io/");
    }
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url.to_string())
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

type Handler = (u64, mpsc::UnboundedSender<ChannelEvent>);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<String, Vec<Handler>>,
}

struct Shared {
    endpoint: String,
    retry_delay: Duration,
    registry: Mutex<Registry>,
    /// Outgoing frame queue of the live session; `None` while disconnected.
    writer: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    state_tx: watch::Sender<ConnectionState>,
    started: AtomicBool,
    cancel: CancellationToken,
    loopback: Option<mpsc::UnboundedSender<Outbound>>,
}

impl Shared {
    fn dispatch(&self, event: ChannelEvent) {
        match event {
            ChannelEvent::Connected => {
                self.state_tx.send_replace(ConnectionState::Connected);
            }
            ChannelEvent::Disconnected => {
                let previous = self.state_tx.send_replace(ConnectionState::Disconnected);
                if previous == ConnectionState::Disconnected {
                    return;
                }
            }
            _ => {}
        }

        let mut registry = lock(&self.registry);
        if let Some(handlers) = registry.handlers.get_mut(event.name()) {
            handlers.retain(|(_, tx)| tx.send(event.clone()).is_ok());
        }
    }

    fn dispatch_wire(&self, name: &str, data: Value) {
        match ChannelEvent::from_wire(name, data) {
            Ok(event) => self.dispatch(event),
            Err(e) => warn!("dropping malformed '{}' event: {}", name, e),
        }
    }
}

/// Process-wide channel handle.  Clones share one connection.
#[derive(Clone)]
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    pub fn new(server_url: &str, retry_delay: Duration) -> Result<Self, ChannelError> {
        let endpoint = socket_endpoint(server_url)?;
        Ok(Self::build(endpoint, retry_delay, None))
    }

    /// Transport-less channel: emits land on the returned receiver and inbound
    /// events are injected with [`Channel::dispatch`].  Emits still respect the
    /// connection state.
    pub fn loopback() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self::build("loopback".to_string(), DEFAULT_RETRY_DELAY, Some(tx)),
            rx,
        )
    }

    fn build(
        endpoint: String,
        retry_delay: Duration,
        loopback: Option<mpsc::UnboundedSender<Outbound>>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(Shared {
                endpoint,
                retry_delay,
                registry: Mutex::new(Registry::default()),
                writer: Mutex::new(None),
                state_tx,
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                loopback,
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// Starts the connection task.  Calling it again is a no-op.
    pub fn connect(&self) {
        if self.shared.loopback.is_some() || self.shared.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let shared = Arc::clone(&self.shared);
        tokio::spawn(run_connection(shared));
    }

    /// Stops reconnecting, closes the socket and marks the channel disconnected.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
        *lock(&self.shared.writer) = None;
        self.shared.dispatch(ChannelEvent::Disconnected);
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Subscribes to every event named in `names`.
    pub fn subscribe(&self, names: &[&str]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = lock(&self.shared.registry);
        registry.next_id += 1;
        let id = registry.next_id;
        for name in names {
            registry
                .handlers
                .entry((*name).to_string())
                .or_default()
                .push((id, tx.clone()));
        }
        Subscription {
            id,
            names: names.iter().map(|n| n.to_string()).collect(),
            rx,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Detaches every subscription from `name`.
    pub fn off(&self, name: &str) {
        lock(&self.shared.registry).handlers.remove(name);
    }

    pub fn handler_count(&self, name: &str) -> usize {
        lock(&self.shared.registry)
            .handlers
            .get(name)
            .map_or(0, Vec::len)
    }

    /// Fire-and-forget.  Dropped, not queued, while disconnected.
    pub fn emit(&self, outbound: Outbound) {
        if !self.state().is_connected() {
            debug!("dropping '{}': channel disconnected", outbound.event_name());
            return;
        }
        if let Some(loopback) = &self.shared.loopback {
            let _ = loopback.send(outbound);
            return;
        }
        let name = outbound.event_name();
        let sent = lock(&self.shared.writer)
            .as_ref()
            .map(|tx| tx.send(outbound.into_frame()).is_ok())
            .unwrap_or(false);
        if !sent {
            debug!("dropping '{}': no live session", name);
        }
    }

    /// Delivers an inbound event to subscribers as if it came off the wire.
    /// Lifecycle events also update the connection state.
    pub fn dispatch(&self, event: ChannelEvent) {
        self.shared.dispatch(event);
    }
}

/// Scoped registration on one or more event names.
pub struct Subscription {
    id: u64,
    names: Vec<String>,
    rx: mpsc::UnboundedReceiver<ChannelEvent>,
    shared: Arc<Shared>,
}

impl Subscription {
    /// Next event; `None` once every name this subscription covers was detached.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<ChannelEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut registry = lock(&self.shared.registry);
        for name in &self.names {
            if let Some(handlers) = registry.handlers.get_mut(name) {
                handlers.retain(|(id, _)| *id != self.id);
                if handlers.is_empty() {
                    registry.handlers.remove(name);
                }
            }
        }
    }
}

// ── Connection task ───────────────────────────────────────────────────────────

async fn run_connection(shared: Arc<Shared>) {
    info!("channel: connecting to {}", shared.endpoint);
    let mut failures: u64 = 0;
    loop {
        match session(&shared).await {
            Ok(()) => {
                failures = 0;
                info!("channel: session closed");
            }
            Err(e) => {
                failures += 1;
                if failures == 1 {
                    warn!("channel: {}; retrying every {:?}", e, shared.retry_delay);
                } else {
                    debug!("channel: attempt {} failed: {}", failures, e);
                }
            }
        }
        *lock(&shared.writer) = None;
        shared.dispatch(ChannelEvent::Disconnected);

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(shared.retry_delay) => {}
        }
    }
    debug!("channel: connection task stopped");
}

/// `None` when the window is too large to represent: never silent.
fn silence_deadline(last_inbound: Instant, silence: Duration) -> Option<Instant> {
    last_inbound.checked_add(silence)
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn session(shared: &Shared) -> Result<(), ChannelError> {
    let connecting = tokio::time::timeout(HANDSHAKE_TIMEOUT, connect_async(shared.endpoint.as_str()));
    let (ws, _) = tokio::select! {
        _ = shared.cancel.cancelled() => return Ok(()),
        r = connecting => r.map_err(|_| ChannelError::HandshakeTimeout)??,
    };
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();
    // Replaced by pingInterval + pingTimeout once the open packet arrives.
    let mut silence = HANDSHAKE_TIMEOUT;
    // Only inbound traffic proves the server is alive.
    let mut last_inbound = Instant::now();

    loop {
        tokio::select! {
            _ = shared.cancel.cancelled() => {
                let _ = sink.send(Message::Text(Frame::Disconnect.encode())).await;
                let _ = sink.close().await;
                return Ok(());
            }
            Some(frame) = out_rx.recv() => {
                sink.send(Message::Text(frame.encode())).await?;
            }
            _ = wait_until(silence_deadline(last_inbound, silence)) => {
                return Err(ChannelError::Silent(silence));
            }
            next = stream.next() => {
                let Some(msg) = next else {
                    return Ok(());
                };
                let msg = msg?;
                last_inbound = Instant::now();
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(_) => return Ok(()),
                    _ => continue,
                };
                let frame = match Frame::decode(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        warn!("channel: ignoring frame: {}", e);
                        continue;
                    }
                };
                match frame {
                    Frame::Open(handshake) => {
                        silence = handshake.liveness_window();
                        debug!("channel: engine open sid={} window={:?}", handshake.sid, silence);
                        sink.send(Message::Text(Frame::Connect(None).encode())).await?;
                    }
                    Frame::Ping => {
                        sink.send(Message::Text(Frame::Pong.encode())).await?;
                    }
                    Frame::Connect(_) => {
                        *lock(&shared.writer) = Some(out_tx.clone());
                        info!("channel: connected");
                        shared.dispatch(ChannelEvent::Connected);
                    }
                    Frame::ConnectError(data) => return Err(ChannelError::Rejected(data)),
                    Frame::Disconnect | Frame::Close => return Ok(()),
                    Frame::Event { name, args } => {
                        let data = args.into_iter().next().unwrap_or(Value::Null);
                        shared.dispatch_wire(&name, data);
                    }
                    Frame::Pong | Frame::Noop => {}
                }
            }
        }
    }
}
