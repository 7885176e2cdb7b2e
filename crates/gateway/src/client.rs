//! Client state, outbound queues and broadcast groups.
//!
//! Uses lock-free DashMap for high-throughput concurrent access.
//!
//! Each client owns an [`Outbox`]: an unbounded queue plus a depth counter.
//! Reliable frames are always queued, so a slow client never blocks the
//! fan-out loop or other clients. Best-effort frames are dropped once the
//! queue depth reaches the client's buffer size.

use crate::error::{GatewayError, Result};
use crate::protocol::ServerMessage;
use chrono::Utc;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Unique client identifier.
pub type ClientId = Uuid;

/// Default outbound buffer size, in frames, used for best-effort delivery.
pub const CLIENT_CHANNEL_BUFFER_SIZE: usize = 256;

/// Named multicast groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Group {
    /// Every joined connection.
    Audience,
    /// Joined connections whose session is a moderator or admin.
    Moderators,
}

impl Group {
    /// Group name as used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Audience => "joined",
            Group::Moderators => "moderators",
        }
    }
}

/// How a frame is delivered to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Always queued.
    Reliable,
    /// Dropped if the client's buffer is full.
    BestEffort,
}

/// Item in a client's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Pre-serialized JSON text frame.
    Frame(Arc<str>),
    /// Flush what is queued, then close the socket.
    Close,
}

/// Sending half of a client's outbound queue.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<Outbound>,
    depth: Arc<AtomicUsize>,
    capacity: usize,
}

/// Receiving half of a client's outbound queue, owned by the socket writer.
#[derive(Debug)]
pub struct OutboxReceiver {
    rx: mpsc::UnboundedReceiver<Outbound>,
    depth: Arc<AtomicUsize>,
}

impl Outbox {
    /// Create a queue whose best-effort capacity is `capacity` frames.
    pub fn channel(capacity: usize) -> (Outbox, OutboxReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Outbox {
                tx,
                depth: Arc::clone(&depth),
                capacity,
            },
            OutboxReceiver { rx, depth },
        )
    }

    /// Serialize and queue a message for this client only.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        if self.push(Arc::from(json), Delivery::Reliable) {
            Ok(())
        } else {
            Err(GatewayError::ChannelSend)
        }
    }

    /// Queue a pre-serialized frame.
    ///
    /// Returns false if the frame was dropped: the queue is closed, or the
    /// delivery is best-effort and the buffer is full.
    pub fn push(&self, frame: Arc<str>, delivery: Delivery) -> bool {
        if delivery == Delivery::BestEffort && self.depth.load(Ordering::Acquire) >= self.capacity {
            return false;
        }
        self.depth.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(Outbound::Frame(frame)).is_err() {
            self.depth.fetch_sub(1, Ordering::AcqRel);
            return false;
        }
        true
    }

    /// Ask the writer to close the socket after flushing queued frames.
    pub fn close(&self) {
        let _ = self.tx.send(Outbound::Close);
    }

    /// Frames queued but not yet taken by the writer.
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }
}

impl OutboxReceiver {
    /// Wait for the next outbound item.
    pub async fn recv(&mut self) -> Option<Outbound> {
        let item = self.rx.recv().await?;
        if matches!(item, Outbound::Frame(_)) {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        Some(item)
    }

    /// Take the next item if one is ready.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        let item = self.rx.try_recv().ok()?;
        if matches!(item, Outbound::Frame(_)) {
            self.depth.fetch_sub(1, Ordering::AcqRel);
        }
        Some(item)
    }
}

/// State for a single connected client.
#[derive(Debug)]
pub struct ClientState {
    /// Unique client identifier.
    pub id: ClientId,
    /// Address the client was admitted under.
    pub address: String,
    /// Outbound queue to the client's WebSocket.
    pub outbox: Outbox,
    /// Timestamp when client connected.
    pub connected_at: i64,
}

impl ClientState {
    /// Create a new client state.
    pub fn new(address: impl Into<String>, outbox: Outbox) -> Self {
        Self {
            id: Uuid::new_v4(),
            address: address.into(),
            outbox,
            connected_at: Utc::now().timestamp_millis(),
        }
    }

    /// Send a message to this client.
    pub fn send(&self, msg: &ServerMessage) -> Result<()> {
        self.outbox.send(msg)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: usize,
    pub dropped: usize,
}

/// Registry of connected clients and their group memberships.
///
/// Maintains:
/// - Client ID → Client State mapping
/// - Group → Client IDs for fan-out
pub struct ClientRegistry {
    /// Client ID → Client State.
    clients: DashMap<ClientId, Arc<ClientState>>,
    /// Group → members. Members are only added while registered and only
    /// removed on unregister.
    groups: DashMap<Group, DashSet<ClientId>>,
}

impl ClientRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
            groups: DashMap::new(),
        }
    }

    /// Register a new client.
    pub fn register(&self, client: Arc<ClientState>) -> ClientId {
        let id = client.id;
        self.clients.insert(id, client);
        debug!("Client {} registered", id);
        id
    }

    /// Unregister a client and drop it from every group.
    ///
    /// Returns false if the client was already gone.
    pub fn unregister(&self, client_id: &ClientId) -> bool {
        if self.clients.remove(client_id).is_none() {
            return false;
        }
        for group in self.groups.iter() {
            group.value().remove(client_id);
        }
        debug!("Client {} unregistered", client_id);
        true
    }

    /// Add a registered client to a group.
    pub fn join_group(&self, client_id: &ClientId, group: Group) -> Result<()> {
        if !self.clients.contains_key(client_id) {
            return Err(GatewayError::ClientNotFound(client_id.to_string()));
        }
        self.groups.entry(group).or_default().insert(*client_id);
        info!("Client {} joined group {}", client_id, group.as_str());
        Ok(())
    }

    /// Check whether a client is in a group.
    pub fn is_member(&self, client_id: &ClientId, group: Group) -> bool {
        self.groups
            .get(&group)
            .map(|members| members.contains(client_id))
            .unwrap_or(false)
    }

    /// Current members of a group.
    pub fn members(&self, group: Group) -> Vec<Arc<ClientState>> {
        let Some(ids) = self.groups.get(&group) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.clients.get(&*id).map(|c| c.clone()))
            .collect()
    }

    /// Number of members in a group.
    pub fn group_size(&self, group: Group) -> usize {
        self.groups.get(&group).map(|m| m.len()).unwrap_or(0)
    }

    /// Get the total number of connected clients.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Send a pre-serialized frame to every member of a group.
    ///
    /// Never waits on a client.
    pub fn broadcast(&self, group: Group, frame: &Arc<str>, delivery: Delivery) -> BroadcastStats {
        let mut stats = BroadcastStats::default();
        for client in self.members(group) {
            if client.outbox.push(Arc::clone(frame), delivery) {
                stats.delivered += 1;
            } else {
                stats.dropped += 1;
                if delivery == Delivery::Reliable {
                    warn!("Failed to queue frame for closed client {}", client.id);
                }
            }
        }
        stats
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
