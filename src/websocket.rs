//! WebSocket handler for real-time messaging

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::database;
use crate::presence::PresenceRegistry;
use crate::protocol::{ClientEvent, ServerEvent};
use crate::rooms::RoomMembership;
use crate::ConnId;
use sqlx::{Pool, Sqlite};

/// Outbound channel capacity per connection. Delivery is best-effort;
/// a connection that falls this far behind starts losing copies.
const OUTBOUND_BUFFER: usize = 50;

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

/// Simple token-bucket rate limiter (not shared across threads)
pub struct RateLimiter {
    tokens: f64,
    max_tokens: f64,
    refill_rate: f64,
    last_refill: std::time::Instant,
}

impl RateLimiter {
    pub fn new(max_tokens: f64, refill_rate: f64) -> Self {
        Self {
            tokens: max_tokens,
            max_tokens,
            refill_rate,
            last_refill: std::time::Instant::now(),
        }
    }

    /// Try to consume one token. Returns false if rate limit exceeded.
    pub fn try_consume(&mut self) -> bool {
        let now = std::time::Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.max_tokens);
        self.last_refill = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection state
// ---------------------------------------------------------------------------

/// Lifecycle: created unidentified on connect, username attached at most
/// once by a successful identify, destroyed on transport close.
pub struct Connection {
    pub id: ConnId,
    pub username: Option<String>,
    pub tx: mpsc::Sender<String>,
    /// Message event rate limiter (30 burst, 10/s refill)
    pub rate_limiter: RateLimiter,
}

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

/// Server state shared across connections
pub struct ServerState {
    pub db_pool: Pool<Sqlite>,
    pub config: ServerConfig,
    /// Username → addressable connection (direct delivery targets)
    pub presence: PresenceRegistry,
    /// Room id → member connections (broadcast fan-out)
    pub rooms: RoomMembership,
    /// Connection id → outbound channel, for every open socket. Room
    /// members that never identified are reachable through this table.
    pub sockets: dashmap::DashMap<ConnId, mpsc::Sender<String>>,
    /// Current total connection count (for enforcing max_connections)
    connection_count: AtomicUsize,
    /// Per-IP connection counts (for enforcing max_connections_per_ip)
    ip_connections: dashmap::DashMap<std::net::IpAddr, AtomicUsize>,
    next_conn_id: AtomicU64,
}

impl ServerState {
    pub fn new(db_pool: Pool<Sqlite>, config: ServerConfig) -> Self {
        Self {
            db_pool,
            config,
            presence: PresenceRegistry::new(),
            rooms: RoomMembership::new(),
            sockets: dashmap::DashMap::new(),
            connection_count: AtomicUsize::new(0),
            ip_connections: dashmap::DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    pub fn alloc_conn_id(&self) -> ConnId {
        self.next_conn_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Try to acquire a connection slot. Returns false if limits are exceeded.
    fn try_acquire_connection(&self, ip: std::net::IpAddr) -> bool {
        let max_global = self.config.max_connections;
        let max_per_ip = self.config.max_connections_per_ip;

        // Check global limit (0 = unlimited)
        if max_global > 0 && self.connection_count.load(Ordering::Relaxed) >= max_global {
            return false;
        }

        // Check per-IP limit (0 = unlimited)
        if max_per_ip > 0 {
            let entry = self.ip_connections.entry(ip).or_insert_with(|| AtomicUsize::new(0));
            if entry.value().load(Ordering::Relaxed) >= max_per_ip {
                return false;
            }
            entry.value().fetch_add(1, Ordering::Relaxed);
        }

        self.connection_count.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release a connection slot.
    fn release_connection(&self, ip: std::net::IpAddr) {
        self.connection_count.fetch_sub(1, Ordering::Relaxed);
        if let Some(entry) = self.ip_connections.get(&ip) {
            let prev = entry.value().fetch_sub(1, Ordering::Relaxed);
            if prev <= 1 {
                drop(entry);
                self.ip_connections.remove(&ip);
            }
        }
    }

    /// Transport-close cleanup: sweep room membership, release the
    /// presence binding, drop the socket table entry. The unbind is
    /// guarded: a binding already superseded by a newer identify stays
    /// put, and only an actual unbind flips the identity offline.
    pub async fn cleanup_connection(&self, conn: &Connection) {
        self.rooms.remove_all(conn.id);
        self.sockets.remove(&conn.id);

        if let Some(ref username) = conn.username {
            if self.presence.unbind(username, conn.id) {
                if let Err(e) = database::mark_offline(&self.db_pool, username).await {
                    warn!("Failed to mark {} offline: {}", username, e);
                }
                info!("{} is offline", username);
            } else {
                debug!(
                    "Skipping unbind for {}: binding already superseded",
                    username
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// WebSocket upgrade handler
// ---------------------------------------------------------------------------

/// Handle WebSocket upgrade — enforces connection limits before accepting
pub async fn handle_websocket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    let ip = addr.ip();

    if !state.try_acquire_connection(ip) {
        warn!("Connection rejected for {}: limit exceeded", ip);
        return axum::http::StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state, addr))
        .into_response()
}

// ---------------------------------------------------------------------------
// Socket lifecycle
// ---------------------------------------------------------------------------

async fn handle_socket(socket: WebSocket, state: Arc<ServerState>, addr: SocketAddr) {
    let ip = addr.ip();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);

    let conn_id = state.alloc_conn_id();
    state.sockets.insert(conn_id, tx.clone());

    let mut conn = Connection {
        id: conn_id,
        username: None,
        tx,
        rate_limiter: RateLimiter::new(30.0, 10.0),
    };

    info!("New WebSocket connection from {} (conn {})", addr, conn_id);

    // Forward outbound frames + send periodic pings
    let ping_interval_secs = state.config.ws_ping_interval;
    let forward_task = tokio::spawn(async move {
        let mut ping_ticker =
            tokio::time::interval(std::time::Duration::from_secs(ping_interval_secs));
        ping_ticker.tick().await; // skip first immediate tick

        loop {
            tokio::select! {
                frame = rx.recv() => {
                    match frame {
                        Some(data) => {
                            if ws_sender.send(Message::Text(data.into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = ping_ticker.tick() => {
                    if ws_sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Main receive loop
    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(msg) => match msg {
                Message::Text(text) => {
                    // Fire-and-forget protocol: failures are logged
                    // server-side, never surfaced to the sender.
                    if let Err(e) = handle_event(text.as_str(), &mut conn, &state).await {
                        warn!("Dropped event from {} (conn {}): {}", addr, conn_id, e);
                    }
                }
                Message::Binary(_) => { /* ignore binary frames */ }
                Message::Close(_) => break,
                Message::Ping(_) | Message::Pong(_) => { /* axum auto-responds to pings */ }
            },
            Err(e) => {
                debug!("WebSocket error from {}: {}", addr, e);
                break;
            }
        }
    }

    // Cleanup
    state.cleanup_connection(&conn).await;
    state.release_connection(ip);
    forward_task.abort();
    info!("Connection {} closed ({})", conn_id, addr);
}

// ---------------------------------------------------------------------------
// Protocol handler
// ---------------------------------------------------------------------------

pub async fn handle_event(
    data: &str,
    conn: &mut Connection,
    state: &Arc<ServerState>,
) -> anyhow::Result<()> {
    let event: ClientEvent = serde_json::from_str(data)?;

    // Rate limit message traffic; identify and join are exempt
    if matches!(
        event,
        ClientEvent::DirectMessage { .. } | ClientEvent::GroupMessage { .. }
    ) && !conn.rate_limiter.try_consume()
    {
        anyhow::bail!("Rate limit exceeded");
    }

    match event {
        ClientEvent::Identify { username } => handle_identify(username, conn, state).await,
        ClientEvent::JoinRoom { room_id } => handle_join_room(room_id, conn, state),
        ClientEvent::DirectMessage {
            sender,
            receiver,
            body,
        } => handle_direct_message(sender, receiver, body, conn, state).await,
        ClientEvent::GroupMessage {
            room_id,
            sender,
            body,
        } => handle_group_message(room_id, sender, body, conn, state).await,
    }
}

/// Require the connection to be identified, returning the bound username.
fn require_identified(conn: &Connection) -> anyhow::Result<&str> {
    conn.username
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("Not identified"))
}

/// The bound username is authoritative for outgoing messages; the
/// client-supplied sender field is accepted for wire compatibility but
/// never trusted.
fn authoritative_sender<'a>(conn: &'a Connection, claimed: &str) -> anyhow::Result<&'a str> {
    let bound = require_identified(conn)?;
    if claimed != bound {
        warn!(
            "Conn {} claimed sender '{}' but is bound to '{}'",
            conn.id, claimed, bound
        );
    }
    Ok(bound)
}

// ---------------------------------------------------------------------------
// Identify
// ---------------------------------------------------------------------------

async fn handle_identify(
    username: String,
    conn: &mut Connection,
    state: &Arc<ServerState>,
) -> anyhow::Result<()> {
    if username.is_empty() {
        anyhow::bail!("Empty username");
    }
    if let Some(ref bound) = conn.username {
        if *bound != username {
            anyhow::bail!("Already identified as {}", bound);
        }
        // Re-identify with the same username: rebind below (a stolen
        // binding is reclaimed, last writer wins).
    }

    if !database::user_exists(&state.db_pool, &username).await? {
        warn!("Identify rejected for unknown username '{}'", username);
        return Ok(());
    }

    if let Some(superseded) = state.presence.bind(&username, conn.id, conn.tx.clone()) {
        debug!(
            "Binding for {} moved from conn {} to conn {}",
            username, superseded, conn.id
        );
    }
    conn.username = Some(username.clone());

    database::mark_online(&state.db_pool, &username).await?;
    info!("{} identified on conn {}", username, conn.id);
    Ok(())
}

// ---------------------------------------------------------------------------
// Join room
// ---------------------------------------------------------------------------

/// Joining is allowed before identify; such a member receives room
/// broadcasts but stays unaddressable for direct messages.
fn handle_join_room(
    room_id: String,
    conn: &Connection,
    state: &Arc<ServerState>,
) -> anyhow::Result<()> {
    if room_id.is_empty() {
        anyhow::bail!("Empty room id");
    }

    if state.rooms.join(&room_id, conn.id) {
        info!("Conn {} joined room {}", conn.id, room_id);
    } else {
        debug!("Conn {} already in room {}", conn.id, room_id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Direct message
// ---------------------------------------------------------------------------

async fn handle_direct_message(
    sender: String,
    receiver: String,
    body: String,
    conn: &Connection,
    state: &Arc<ServerState>,
) -> anyhow::Result<()> {
    let sender = authoritative_sender(conn, &sender)?;
    if receiver.is_empty() {
        anyhow::bail!("Empty receiver");
    }
    if body.is_empty() {
        anyhow::bail!("Empty body");
    }
    if body.len() > state.config.max_message_size {
        anyhow::bail!("Message too large");
    }

    // Persist before any delivery attempt; the log is the source of
    // truth even when nobody is there to receive the copy.
    let stored = database::append_message(&state.db_pool, sender, Some(&receiver), None, &body).await?;
    debug!("Message {} logged ({} → {})", stored.id, sender, receiver);

    if let Some(handle) = state.presence.lookup(&receiver) {
        let frame = ServerEvent::DirectMessage {
            sender: sender.to_string(),
            body,
        }
        .to_frame();
        let _ = handle.tx.send(frame).await;
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Group message
// ---------------------------------------------------------------------------

async fn handle_group_message(
    room_id: String,
    sender: String,
    body: String,
    conn: &Connection,
    state: &Arc<ServerState>,
) -> anyhow::Result<()> {
    let sender = authoritative_sender(conn, &sender)?;
    if room_id.is_empty() {
        anyhow::bail!("Empty room id");
    }
    if body.is_empty() {
        anyhow::bail!("Empty body");
    }
    if body.len() > state.config.max_message_size {
        anyhow::bail!("Message too large");
    }

    let stored =
        database::append_message(&state.db_pool, sender, None, Some(&room_id), &body).await?;
    debug!("Message {} logged ({} → room {})", stored.id, sender, room_id);

    // Serialize once, forward to every live member. Broadcast semantics:
    // the sender's own connection receives a copy when it is a member.
    let frame = ServerEvent::GroupMessage {
        sender: sender.to_string(),
        body,
        room_id: room_id.clone(),
    }
    .to_frame();

    for member in state.rooms.members_of(&room_id) {
        let tx = state.sockets.get(&member).map(|entry| entry.value().clone());
        if let Some(tx) = tx {
            let _ = tx.send(frame.clone()).await;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limiter_exhausts_and_refills() {
        let mut limiter = RateLimiter::new(2.0, 1000.0);

        assert!(limiter.try_consume());
        assert!(limiter.try_consume());
        assert!(!limiter.try_consume());

        // 1000 tokens/s refill makes the bucket usable again almost
        // immediately.
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(limiter.try_consume());
    }
}
