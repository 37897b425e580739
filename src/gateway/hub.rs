//! Connection registry.
//!
//! The [`Hub`] is the only owner of gateway-wide state: live connections,
//! per-channel subscriber sets and the online-user index. Every operation
//! takes the registry lock exactly once and never awaits while holding it,
//! so mutations are serialized and snapshot reads see all three maps at the
//! same instant.
//!
//! Delivery never blocks. Each connection owns a bounded outbound queue; if
//! an enqueue would have to wait, the connection is torn down instead.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::events::{CodecError, Event, EventType, Frame, ReadyData};
use crate::auth::Identity;

/// Channels a single connection may hold at once. Channel ids are not
/// checked against membership here, so this bounds what one client can pin.
pub const MAX_SUBSCRIPTIONS_PER_CONNECTION: usize = 1024;

/// Process-unique identifier of one gateway connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HubError {
    #[error("connection is not registered")]
    UnknownConnection,
    #[error("connection is already identified")]
    AlreadyIdentified,
    #[error("outbound queue rejected the frame")]
    Undeliverable,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Emitted when a user's first session identifies or last session closes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceChange {
    Online(Identity),
    Offline(Identity),
}

/// Result of a successful `identify`.
#[derive(Debug, Clone)]
pub struct Identified {
    /// Online users at the moment of promotion, including the caller.
    pub online_user_ids: Vec<String>,
    /// Oldest session of the same user, closed to respect the per-user cap.
    pub evicted: Option<ConnectionId>,
}

/// What a teardown removed.
#[derive(Debug, Clone)]
pub struct Departure {
    pub identity: Option<Identity>,
    pub went_offline: bool,
}

/// Hub-side handle on a connection's outbound path.
///
/// Dropping it (which only the hub does, on teardown) closes the frame
/// queue and fires the connection's shutdown signal.
#[derive(Debug)]
pub struct Outbound {
    frames: mpsc::Sender<Frame>,
    _alive: watch::Sender<()>,
}

/// Connection-side end of the outbound path, drained by the writer task.
#[derive(Debug)]
pub struct OutboundReceiver {
    frames: mpsc::Receiver<Frame>,
    alive: watch::Receiver<()>,
}

impl OutboundReceiver {
    /// Next frame to write, or `None` once the hub has torn the connection
    /// down. Frames still queued at teardown are discarded.
    pub async fn recv(&mut self) -> Option<Frame> {
        tokio::select! {
            biased;
            _ = self.alive.changed() => None,
            frame = self.frames.recv() => frame,
        }
    }

    /// A frame that is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Frame> {
        self.frames.try_recv().ok()
    }

    /// Resolves (with `Err`) when the hub tears the connection down.
    pub fn shutdown_signal(&self) -> watch::Receiver<()> {
        self.alive.clone()
    }
}

/// Create a bounded outbound queue. `capacity` is clamped to at least 1.
pub fn outbound(capacity: usize) -> (Outbound, OutboundReceiver) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
    let (alive_tx, alive_rx) = watch::channel(());
    (
        Outbound {
            frames: frames_tx,
            _alive: alive_tx,
        },
        OutboundReceiver {
            frames: frames_rx,
            alive: alive_rx,
        },
    )
}

struct Connection {
    outbound: Outbound,
    identity: Option<Identity>,
    channels: HashSet<String>,
    last_heartbeat: Instant,
}

struct Registry {
    connections: HashMap<ConnectionId, Connection>,
    subscribers: HashMap<String, HashSet<ConnectionId>>,
    /// user id -> that user's authenticated connections, oldest first.
    online: HashMap<String, Vec<ConnectionId>>,
    max_connections_per_user: usize,
    presence_tx: mpsc::UnboundedSender<PresenceChange>,
}

impl Registry {
    fn enqueue(&self, id: ConnectionId, frame: &Frame) -> Result<(), HubError> {
        let conn = self
            .connections
            .get(&id)
            .ok_or(HubError::UnknownConnection)?;
        match conn.outbound.frames.try_send(frame.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %id, "outbound queue full, dropping connection");
                Err(HubError::Undeliverable)
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %id, "outbound queue closed, dropping connection");
                Err(HubError::Undeliverable)
            }
        }
    }

    /// Enqueue on every target, tearing down the ones that refuse.
    fn deliver(&mut self, targets: Vec<ConnectionId>, frame: &Frame) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        for id in targets {
            match self.enqueue(id, frame) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(id),
            }
        }
        for id in dead {
            self.teardown(id);
        }
        delivered
    }

    fn teardown(&mut self, id: ConnectionId) -> Option<Departure> {
        let conn = self.connections.remove(&id)?;

        for channel_id in &conn.channels {
            if let Some(subs) = self.subscribers.get_mut(channel_id) {
                subs.remove(&id);
                if subs.is_empty() {
                    self.subscribers.remove(channel_id);
                }
            }
        }

        let mut went_offline = false;
        if let Some(ref identity) = conn.identity {
            if let Some(sessions) = self.online.get_mut(&identity.user_id) {
                sessions.retain(|c| *c != id);
                if sessions.is_empty() {
                    self.online.remove(&identity.user_id);
                    went_offline = true;
                    let _ = self
                        .presence_tx
                        .send(PresenceChange::Offline(identity.clone()));
                }
            }
        }

        self.check_invariants();
        Some(Departure {
            identity: conn.identity,
            went_offline,
        })
    }

    fn online_user_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.online.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[cfg(debug_assertions)]
    fn check_invariants(&self) {
        for (channel_id, subs) in &self.subscribers {
            assert!(!subs.is_empty(), "empty subscriber set kept for {channel_id}");
            for id in subs {
                let conn = self
                    .connections
                    .get(id)
                    .unwrap_or_else(|| panic!("{id} subscribed to {channel_id} but not registered"));
                assert!(
                    conn.channels.contains(channel_id),
                    "{id} in subscriber set of {channel_id} without holding the subscription"
                );
            }
        }
        for (user_id, sessions) in &self.online {
            assert!(!sessions.is_empty(), "empty session list kept for {user_id}");
            for id in sessions {
                let identity = self
                    .connections
                    .get(id)
                    .and_then(|c| c.identity.as_ref())
                    .unwrap_or_else(|| panic!("{id} listed online for {user_id} but not identified"));
                assert_eq!(&identity.user_id, user_id);
            }
        }
        for (id, conn) in &self.connections {
            match conn.identity {
                Some(ref identity) => assert!(
                    self.online
                        .get(&identity.user_id)
                        .is_some_and(|s| s.contains(id)),
                    "{id} identified but missing from the online index"
                ),
                None => assert!(
                    conn.channels.is_empty(),
                    "{id} holds subscriptions before identifying"
                ),
            }
            for channel_id in &conn.channels {
                assert!(
                    self.subscribers
                        .get(channel_id)
                        .is_some_and(|s| s.contains(id)),
                    "{id} holds {channel_id} but is not in its subscriber set"
                );
            }
        }
    }

    #[cfg(not(debug_assertions))]
    fn check_invariants(&self) {}
}

/// Single authority over gateway connection state.
pub struct Hub {
    registry: Mutex<Registry>,
}

impl Hub {
    /// Build a hub. The receiver yields presence transitions and should be
    /// drained by the presence fan-out task.
    pub fn new(max_connections_per_user: usize) -> (Self, mpsc::UnboundedReceiver<PresenceChange>) {
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let hub = Self {
            registry: Mutex::new(Registry {
                connections: HashMap::new(),
                subscribers: HashMap::new(),
                online: HashMap::new(),
                max_connections_per_user: max_connections_per_user.max(1),
                presence_tx,
            }),
        };
        (hub, presence_rx)
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Registry methods only panic on invariant violations, which are
        // already loud; keep serving whatever state is left.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new, unauthenticated connection.
    pub fn register(&self, outbound: Outbound) -> ConnectionId {
        let id = ConnectionId::next();
        let mut reg = self.registry();
        reg.connections.insert(
            id,
            Connection {
                outbound,
                identity: None,
                channels: HashSet::new(),
                last_heartbeat: Instant::now(),
            },
        );
        tracing::debug!(connection_id = %id, connections = reg.connections.len(), "connection registered");
        id
    }

    /// Promote a connection to authenticated and enqueue its READY event.
    ///
    /// The online snapshot in READY and the promotion happen under the same
    /// lock, and READY is the first frame the connection can receive.
    pub fn identify(&self, id: ConnectionId, identity: Identity) -> Result<Identified, HubError> {
        let mut reg = self.registry();
        let conn = reg
            .connections
            .get_mut(&id)
            .ok_or(HubError::UnknownConnection)?;
        if conn.identity.is_some() {
            return Err(HubError::AlreadyIdentified);
        }
        conn.identity = Some(identity.clone());
        conn.last_heartbeat = Instant::now();

        let max = reg.max_connections_per_user;
        let sessions = reg.online.entry(identity.user_id.clone()).or_default();
        let came_online = sessions.is_empty();
        sessions.push(id);
        let evicted = (sessions.len() > max).then(|| sessions[0]);

        // The new session is already listed, so evicting the oldest can
        // never take the user offline.
        if let Some(old) = evicted {
            tracing::info!(
                connection_id = %old,
                user_id = %identity.user_id,
                "evicting oldest session, per-user connection limit reached"
            );
            reg.teardown(old);
        }
        if came_online {
            let _ = reg.presence_tx.send(PresenceChange::Online(identity.clone()));
        }

        let online_user_ids = reg.online_user_ids();
        let ready = Event::new(
            EventType::Ready,
            &ReadyData {
                user_id: identity.user_id.clone(),
                username: identity.username.clone(),
                online_user_ids: online_user_ids.clone(),
            },
        );
        let delivered = ready
            .map_err(HubError::from)
            .and_then(|ready| reg.enqueue(id, ready.frame()));
        if let Err(e) = delivered {
            reg.teardown(id);
            return Err(e);
        }

        reg.check_invariants();
        Ok(Identified {
            online_user_ids,
            evicted,
        })
    }

    /// Subscribe an identified connection to a channel. Returns `true` if the
    /// subscription is new; repeats, unknown or pre-handshake connections and
    /// connections already at `MAX_SUBSCRIPTIONS_PER_CONNECTION` are no-ops.
    ///
    /// Whether the user may read `channel_id` is the caller's concern.
    pub fn subscribe(&self, id: ConnectionId, channel_id: &str) -> bool {
        let mut reg = self.registry();
        let Some(conn) = reg.connections.get_mut(&id) else {
            return false;
        };
        if conn.identity.is_none()
            || conn.channels.contains(channel_id)
            || conn.channels.len() >= MAX_SUBSCRIPTIONS_PER_CONNECTION
        {
            return false;
        }
        conn.channels.insert(channel_id.to_string());
        reg.subscribers
            .entry(channel_id.to_string())
            .or_default()
            .insert(id);
        reg.check_invariants();
        true
    }

    /// Returns `true` if a subscription was removed.
    pub fn unsubscribe(&self, id: ConnectionId, channel_id: &str) -> bool {
        let mut reg = self.registry();
        let Some(conn) = reg.connections.get_mut(&id) else {
            return false;
        };
        if !conn.channels.remove(channel_id) {
            return false;
        }
        if let Some(subs) = reg.subscribers.get_mut(channel_id) {
            subs.remove(&id);
            if subs.is_empty() {
                reg.subscribers.remove(channel_id);
            }
        }
        reg.check_invariants();
        true
    }

    /// Deliver `event` to every current subscriber of `channel_id` except
    /// `exclude`. Returns the number of connections it was enqueued on.
    pub fn broadcast(&self, channel_id: &str, event: &Event, exclude: Option<ConnectionId>) -> usize {
        let mut reg = self.registry();
        let targets: Vec<ConnectionId> = match reg.subscribers.get(channel_id) {
            Some(subs) => subs
                .iter()
                .copied()
                .filter(|id| Some(*id) != exclude)
                .collect(),
            None => return 0,
        };
        let delivered = reg.deliver(targets, event.frame());
        tracing::trace!(
            channel_id,
            event_type = %event.event_type(),
            delivered,
            "broadcast"
        );
        delivered
    }

    /// Deliver `event` to a single connection.
    pub fn send_to(&self, id: ConnectionId, event: &Event) -> bool {
        let mut reg = self.registry();
        if !reg.connections.contains_key(&id) {
            return false;
        }
        reg.deliver(vec![id], event.frame()) == 1
    }

    /// Deliver `event` to every authenticated session of `user_id`.
    pub fn send_to_user(&self, user_id: &str, event: &Event) -> usize {
        let mut reg = self.registry();
        let targets = match reg.online.get(user_id) {
            Some(sessions) => sessions.clone(),
            None => return 0,
        };
        reg.deliver(targets, event.frame())
    }

    /// Refresh a connection's liveness. Returns `false` if it is gone.
    pub fn heartbeat(&self, id: ConnectionId) -> bool {
        let mut reg = self.registry();
        match reg.connections.get_mut(&id) {
            Some(conn) => {
                conn.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Remove a connection and everything that references it.
    pub fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        let departure = self.registry().teardown(id);
        if let Some(ref d) = departure {
            tracing::debug!(
                connection_id = %id,
                user_id = d.identity.as_ref().map(|i| i.user_id.as_str()),
                went_offline = d.went_offline,
                "connection unregistered"
            );
        }
        departure
    }

    /// Tear down every connection whose last heartbeat is older than `timeout`.
    pub fn reap_expired(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.reap_expired_at(Instant::now(), timeout)
    }

    pub fn reap_expired_at(&self, now: Instant, timeout: Duration) -> Vec<ConnectionId> {
        let mut reg = self.registry();
        let expired: Vec<ConnectionId> = reg
            .connections
            .iter()
            .filter(|(_, c)| now.saturating_duration_since(c.last_heartbeat) > timeout)
            .map(|(id, _)| *id)
            .collect();
        for id in &expired {
            reg.teardown(*id);
        }
        expired
    }

    /// Tear down every connection. Used on server shutdown.
    pub fn close_all(&self) -> usize {
        let mut reg = self.registry();
        let ids: Vec<ConnectionId> = reg.connections.keys().copied().collect();
        for id in &ids {
            reg.teardown(*id);
        }
        ids.len()
    }

    /// Run the liveness sweep every `timeout / 2` until the hub is dropped.
    /// A dead session is therefore detected at most about 1.5 x `timeout`
    /// after its last heartbeat.
    pub fn spawn_liveness_sweep(self: &Arc<Self>, timeout: Duration) -> JoinHandle<()> {
        let hub: Weak<Hub> = Arc::downgrade(self);
        let period = (timeout / 2).max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let Some(hub) = hub.upgrade() else { break };
                let reaped = hub.reap_expired(timeout);
                if !reaped.is_empty() {
                    tracing::info!(count = reaped.len(), "closed sessions with expired heartbeats");
                }
            }
        })
    }

    // Snapshot reads.

    pub fn online_user_ids(&self) -> Vec<String> {
        self.registry().online_user_ids()
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.registry().online.contains_key(user_id)
    }

    pub fn online_count(&self) -> usize {
        self.registry().online.len()
    }

    /// Number of open authenticated sessions for one user.
    pub fn session_count(&self, user_id: &str) -> usize {
        self.registry().online.get(user_id).map_or(0, Vec::len)
    }

    pub fn connection_count(&self) -> usize {
        self.registry().connections.len()
    }

    pub fn is_identified(&self, id: ConnectionId) -> bool {
        self.registry()
            .connections
            .get(&id)
            .is_some_and(|c| c.identity.is_some())
    }

    pub fn is_subscribed(&self, id: ConnectionId, channel_id: &str) -> bool {
        self.registry()
            .subscribers
            .get(channel_id)
            .is_some_and(|s| s.contains(&id))
    }

    pub fn subscriber_count(&self, channel_id: &str) -> usize {
        self.registry().subscribers.get(channel_id).map_or(0, HashSet::len)
    }
}
