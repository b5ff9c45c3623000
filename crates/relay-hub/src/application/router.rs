//! Router: decides who receives each inbound message.
//!
//! # Routing rules
//!
//! | Inbound            | From     | Goes to                                       |
//! |--------------------|----------|-----------------------------------------------|
//! | `register`         | producer | `registry-changed` to **every** observer      |
//! | `frame`, `layout`  | producer | watchers of the device (verbatim text)        |
//! | binary frame       | producer | watchers of the bound device, as `screen`     |
//! | `heartbeat`, ping  | producer | nobody; refreshes liveness only               |
//! | `control`          | observer | the device's current connection only          |
//! | `watch`, `unwatch` | observer | nobody; updates the subscription index        |
//! | `list`             | observer | a `sessions` reply to the sender              |
//!
//! # Shared state and locking
//!
//! The router owns three independent structures, each behind its own
//! [`Guarded`] mutex: the session registry, the subscription index, and the
//! connection table.  A method holds at most two locks at once, and then
//! always `sessions` before `connections`; the subscription lock is never
//! held together with another.  Apart from acquiring a lock nothing is
//! awaited while one is held; outbound sends are `try_send`.
//!
//! A session list that goes out to observers (`registry-changed` or a
//! `sessions` reply) is taken and queued while the `sessions` lock is still
//! held.  Observers therefore see the lists in the order the registry
//! changed, and the last one they receive is always current.
//!
//! # Ordering
//!
//! Each connection's messages are dispatched one at a time by its transport
//! task, so a producer's frames reach a given observer's queue in the order
//! the producer sent them.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info};

use relay_core::protocol::wrap_binary_frame;
use relay_core::{
    decode_client_message, encode_hub_message, ClientMessage, ConnectionId, DeviceId, HubMessage,
    Metadata, OfflineReason, ProtocolError, RegisterOutcome, RegistryChange, RegistryEvent, Role,
    SessionRegistry, SessionSnapshot, SubscriptionIndex,
};

use super::clock::{Clock, SystemClock};
use super::connection::{ConnectionHandle, ConnectionTable, Outbound, SendOutcome};
use super::guarded::Guarded;
use super::stats::{RouterStats, StatsSnapshot};
use crate::domain::{FanoutPolicy, HubConfig};

/// Errors returned by router operations.
///
/// None of these close a connection: the transport logs them and reads the
/// next message.
#[derive(Debug, Error)]
pub enum RouteError {
    /// A shared structure stayed locked past the configured timeout.
    #[error("timed out after {waited:?} waiting for the {lock} lock")]
    LockTimeout {
        lock: &'static str,
        waited: Duration,
    },

    /// A message arrived on a connection of the wrong role.
    #[error("{message} is only accepted from a {expected} connection, not a {actual}")]
    RoleMismatch {
        message: &'static str,
        expected: Role,
        actual: Role,
    },

    /// A binary frame arrived before the connection said which device it is.
    #[error("connection {0} sent a binary frame without a registered device")]
    NoBoundDevice(ConnectionId),

    /// The message could not be decoded, or a reply could not be encoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The session-aware message router.
///
/// Cheap to share: wrap it in an `Arc` and hand a clone to every connection
/// task and to the liveness monitor.
pub struct Router {
    sessions: Guarded<SessionRegistry>,
    subscriptions: Guarded<SubscriptionIndex>,
    connections: Guarded<ConnectionTable>,
    fanout: FanoutPolicy,
    queue_capacity: usize,
    clock: Arc<dyn Clock>,
    stats: Arc<RouterStats>,
}

impl Router {
    /// Creates a router that reads time from `clock`.
    pub fn new(config: &HubConfig, clock: Arc<dyn Clock>) -> Self {
        let stats = Arc::new(RouterStats::new());
        let wait = config.lock_timeout;
        Self {
            sessions: Guarded::new("sessions", SessionRegistry::new(), wait, Arc::clone(&stats)),
            subscriptions: Guarded::new(
                "subscriptions",
                SubscriptionIndex::new(),
                wait,
                Arc::clone(&stats),
            ),
            connections: Guarded::new("connections", ConnectionTable::new(), wait, Arc::clone(&stats)),
            fanout: config.fanout,
            queue_capacity: config.outbound_queue,
            clock,
            stats,
        }
    }

    /// Creates a router backed by the real clock.
    pub fn with_system_clock(config: &HubConfig) -> Self {
        Self::new(config, Arc::new(SystemClock))
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    // ── Connection lifecycle ──────────────────────────────────────────────────

    /// Adds a freshly handshaken connection and returns the receiving end of
    /// its outbound queue.
    pub async fn on_connect(
        &self,
        connection: ConnectionId,
        role: Role,
    ) -> Result<mpsc::Receiver<Outbound>, RouteError> {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.connections
            .lock()
            .await?
            .insert(ConnectionHandle::new(connection, role, tx));
        if role == Role::Observer && self.fanout == FanoutPolicy::AllObservers {
            self.subscriptions.lock().await?.watch_everything(connection);
        }
        debug!(connection = %connection, role = %role, "connection added");
        Ok(rx)
    }

    /// Cleans up after a closed connection.
    ///
    /// A producer's sessions go Offline (one `registry-changed` each); an
    /// observer's watches are dropped.  Only the first call for a connection
    /// does anything: later calls find no handle and return immediately.
    pub async fn on_disconnect(&self, connection: ConnectionId) -> Result<(), RouteError> {
        let handle = self.connections.lock().await?.remove(connection);
        let Some(handle) = handle else {
            debug!(connection = %connection, "connection already cleaned up");
            return Ok(());
        };

        match handle.role {
            Role::Producer => {
                let now = self.clock.now();
                let mut registry = self.sessions.lock().await?;
                let events = registry.mark_offline(connection, now);
                if events.is_empty() {
                    return Ok(());
                }
                for event in &events {
                    info!(device = %event.device_id, connection = %connection, "device offline: disconnected");
                }
                let sessions = registry.list_all(now);
                let connections = self.connections.lock().await?;
                self.notify_observers(&connections, &events, &sessions)?;
            }
            Role::Observer => {
                let dropped = self.subscriptions.lock().await?.unwatch_all(connection);
                debug!(connection = %connection, watches = dropped.len(), "observer watches dropped");
            }
        }
        Ok(())
    }

    // ── Producer messages ─────────────────────────────────────────────────────

    /// Upserts the device's session and tells every observer.
    pub async fn on_register(
        &self,
        connection: ConnectionId,
        device_id: DeviceId,
        metadata: Metadata,
    ) -> Result<RegisterOutcome, RouteError> {
        let now = self.clock.now();
        let mut registry = self.sessions.lock().await?;
        let outcome = registry.register(device_id.clone(), connection, metadata, now);
        let sessions = registry.list_all(now);

        let mut connections = self.connections.lock().await?;
        connections.bind_device(connection, device_id.clone());

        match outcome.superseded {
            Some(old) => info!(
                device = %device_id,
                connection = %connection,
                superseded = %old,
                "device re-registered; previous connection superseded"
            ),
            None => info!(device = %device_id, connection = %connection, "device online"),
        }

        self.notify_observers(&connections, std::slice::from_ref(&outcome.event), &sessions)?;
        Ok(outcome)
    }

    /// Forwards a `frame` message verbatim to the device's watchers.
    ///
    /// Returns how many observer queues accepted it.  Frames from an unknown,
    /// Offline, or superseded sender are dropped and return `0`.
    pub async fn on_frame(
        &self,
        connection: ConnectionId,
        device_id: &DeviceId,
        raw: &str,
    ) -> Result<usize, RouteError> {
        self.forward_telemetry(connection, device_id, Arc::from(raw), "frame")
            .await
    }

    /// Same delivery path as [`Router::on_frame`].
    pub async fn on_layout(
        &self,
        connection: ConnectionId,
        device_id: &DeviceId,
        raw: &str,
    ) -> Result<usize, RouteError> {
        self.forward_telemetry(connection, device_id, Arc::from(raw), "layout")
            .await
    }

    /// Wraps a raw binary frame in a `screen` message and fans it out for the
    /// device this connection registered.
    pub async fn on_binary_frame(
        &self,
        connection: ConnectionId,
        data: &[u8],
    ) -> Result<usize, RouteError> {
        let device_id = self.bound_device(connection, "binary frame").await?;
        let text = encode_hub_message(&wrap_binary_frame(&device_id, data))?;
        self.forward_telemetry(connection, &device_id, Arc::from(text), "screen")
            .await
    }

    /// Refreshes liveness.  Returns `false` if the sender is not the device's
    /// current connection.
    pub async fn on_heartbeat(
        &self,
        connection: ConnectionId,
        device_id: &DeviceId,
    ) -> Result<bool, RouteError> {
        let now = self.clock.now();
        let accepted = self.sessions.lock().await?.touch(device_id, connection, now);
        if !accepted {
            debug!(device = %device_id, connection = %connection, "heartbeat ignored");
        }
        Ok(accepted)
    }

    /// A WebSocket ping from a producer counts as a heartbeat for its device.
    pub async fn on_producer_ping(&self, connection: ConnectionId) -> Result<bool, RouteError> {
        let device_id = self.bound_device(connection, "ping").await?;
        self.on_heartbeat(connection, &device_id).await
    }

    // ── Observer messages ─────────────────────────────────────────────────────

    /// Unicasts a control command to the device's current connection.
    ///
    /// Returns `true` if the command was queued.  Commands for unknown or
    /// Offline devices are dropped; the observer is not told.
    pub async fn on_control(
        &self,
        observer: ConnectionId,
        device_id: &DeviceId,
        raw: &str,
    ) -> Result<bool, RouteError> {
        let target = self.sessions.lock().await?.route_target(device_id);
        let Some(target) = target else {
            self.stats.record_control(false);
            debug!(device = %device_id, observer = %observer, "control dropped: device offline or unknown");
            return Ok(false);
        };

        let outcome = self
            .connections
            .lock()
            .await?
            .send(target, &Arc::from(raw));
        if outcome == SendOutcome::QueueFull {
            self.stats.record_queue_full(1);
        }
        let delivered = outcome == SendOutcome::Queued;
        self.stats.record_control(delivered);
        debug!(device = %device_id, observer = %observer, ?outcome, "control routed");
        Ok(delivered)
    }

    /// Starts delivering the device's frames to `observer`.
    pub async fn on_watch(
        &self,
        observer: ConnectionId,
        device_id: DeviceId,
    ) -> Result<bool, RouteError> {
        debug!(device = %device_id, observer = %observer, "watch");
        Ok(self.subscriptions.lock().await?.watch(observer, device_id))
    }

    pub async fn on_unwatch(
        &self,
        observer: ConnectionId,
        device_id: &DeviceId,
    ) -> Result<bool, RouteError> {
        debug!(device = %device_id, observer = %observer, "unwatch");
        Ok(self.subscriptions.lock().await?.unwatch(observer, device_id))
    }

    /// Replies to `observer` with the current session list.
    pub async fn on_list(&self, observer: ConnectionId) -> Result<(), RouteError> {
        let now = self.clock.now();
        let registry = self.sessions.lock().await?;
        let sessions = registry.list_all(now);
        let text: Outbound = Arc::from(encode_hub_message(&HubMessage::Sessions { sessions })?);
        if self.connections.lock().await?.send(observer, &text) == SendOutcome::QueueFull {
            self.stats.record_queue_full(1);
        }
        Ok(())
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Decodes one text message from `connection` and routes it.
    ///
    /// # Errors
    ///
    /// - [`RouteError::Protocol`] if the text does not decode.
    /// - [`RouteError::RoleMismatch`] if the message belongs to the other role.
    /// - [`RouteError::LockTimeout`] if shared state could not be locked.
    pub async fn dispatch(
        &self,
        connection: ConnectionId,
        role: Role,
        text: &str,
    ) -> Result<(), RouteError> {
        let msg = decode_client_message(text).map_err(|e| {
            self.stats.record_malformed();
            RouteError::from(e)
        })?;

        let expected = msg.sender_role();
        if expected != role {
            self.stats.record_malformed();
            return Err(RouteError::RoleMismatch {
                message: msg.type_name(),
                expected,
                actual: role,
            });
        }

        debug!(
            connection = %connection,
            kind = msg.type_name(),
            device = msg.device_id().map(DeviceId::as_str).unwrap_or("-"),
            "routing message"
        );

        match msg {
            ClientMessage::Register {
                device_id,
                metadata,
            } => {
                self.on_register(connection, device_id, metadata).await?;
            }
            ClientMessage::Frame { device_id, .. } => {
                self.on_frame(connection, &device_id, text).await?;
            }
            ClientMessage::Layout { device_id, .. } => {
                self.on_layout(connection, &device_id, text).await?;
            }
            ClientMessage::Heartbeat { device_id } => {
                self.on_heartbeat(connection, &device_id).await?;
            }
            ClientMessage::Control { device_id, .. } => {
                self.on_control(connection, &device_id, text).await?;
            }
            ClientMessage::Watch { device_id } => {
                self.on_watch(connection, device_id).await?;
            }
            ClientMessage::Unwatch { device_id } => {
                self.on_unwatch(connection, &device_id).await?;
            }
            ClientMessage::List => self.on_list(connection).await?,
        }
        Ok(())
    }

    // ── Liveness ──────────────────────────────────────────────────────────────

    /// Marks Online devices idle for longer than `threshold` Offline and
    /// notifies every observer once per device.
    pub async fn sweep_expired(&self, threshold: Duration) -> Result<Vec<DeviceId>, RouteError> {
        let now = self.clock.now();
        let mut registry = self.sessions.lock().await?;
        let expired = registry.sweep_expired(threshold, now);
        if expired.is_empty() {
            return Ok(expired);
        }

        let events: Vec<RegistryEvent> = expired
            .iter()
            .map(|device_id| {
                info!(device = %device_id, "device offline: no activity within threshold");
                RegistryEvent {
                    device_id: device_id.clone(),
                    change: RegistryChange::Offline(OfflineReason::Expired),
                }
            })
            .collect();
        let sessions = registry.list_all(now);
        let connections = self.connections.lock().await?;
        self.notify_observers(&connections, &events, &sessions)?;
        Ok(expired)
    }

    /// Forgets Offline devices that nobody watches once they have been
    /// Offline for longer than `grace`.
    pub async fn collect_garbage(&self, grace: Duration) -> Result<Vec<DeviceId>, RouteError> {
        let watched = self.subscriptions.lock().await?.watched_devices();
        let now = self.clock.now();
        let mut registry = self.sessions.lock().await?;
        let removed = registry.collect_garbage(grace, now, |id| watched.contains(id));
        if removed.is_empty() {
            return Ok(removed);
        }

        let events: Vec<RegistryEvent> = removed
            .iter()
            .map(|device_id| {
                info!(device = %device_id, "offline session collected");
                RegistryEvent {
                    device_id: device_id.clone(),
                    change: RegistryChange::Removed,
                }
            })
            .collect();
        let sessions = registry.list_all(now);
        let connections = self.connections.lock().await?;
        self.notify_observers(&connections, &events, &sessions)?;
        Ok(removed)
    }

    /// Point-in-time copy of every session, sorted by device id.
    pub async fn list_sessions(&self) -> Result<Vec<SessionSnapshot>, RouteError> {
        let now = self.clock.now();
        Ok(self.sessions.lock().await?.list_all(now))
    }

    // ── Internals ─────────────────────────────────────────────────────────────

    async fn forward_telemetry(
        &self,
        connection: ConnectionId,
        device_id: &DeviceId,
        text: Outbound,
        kind: &'static str,
    ) -> Result<usize, RouteError> {
        let now = self.clock.now();
        let accepted = self.sessions.lock().await?.touch(device_id, connection, now);
        if !accepted {
            debug!(device = %device_id, connection = %connection, kind, "dropped from non-authoritative sender");
            return Ok(0);
        }

        let targets = self.subscriptions.lock().await?.watchers_of(device_id);
        let report = self.connections.lock().await?.send_many(&targets, &text);

        self.stats.record_fanout(report.queued);
        self.stats.record_queue_full(report.queue_full);
        debug!(device = %device_id, kind, deliveries = report.queued, "fanned out");
        Ok(report.queued)
    }

    async fn bound_device(
        &self,
        connection: ConnectionId,
        message: &'static str,
    ) -> Result<DeviceId, RouteError> {
        let connections = self.connections.lock().await?;
        let handle = connections
            .get(connection)
            .ok_or(RouteError::NoBoundDevice(connection))?;
        if handle.role != Role::Producer {
            self.stats.record_malformed();
            return Err(RouteError::RoleMismatch {
                message,
                expected: Role::Producer,
                actual: handle.role,
            });
        }
        handle
            .device
            .clone()
            .ok_or(RouteError::NoBoundDevice(connection))
    }

    /// Holds the session registry lock so a test can make an operation wait.
    #[cfg(test)]
    pub(crate) async fn lock_sessions(
        &self,
    ) -> Result<tokio::sync::MutexGuard<'_, SessionRegistry>, RouteError> {
        self.sessions.lock().await
    }

    /// Queues one `registry-changed` per event for every observer.
    ///
    /// Called with the `sessions` lock held so `sessions` is still current
    /// when it is queued.
    fn notify_observers(
        &self,
        connections: &ConnectionTable,
        events: &[RegistryEvent],
        sessions: &[SessionSnapshot],
    ) -> Result<(), RouteError> {
        let messages = events
            .iter()
            .map(|event| {
                let msg = HubMessage::registry_changed(event, sessions.to_vec());
                encode_hub_message(&msg).map(Outbound::from)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let observers = connections.observers();
        for text in &messages {
            let report = connections.send_many(&observers, text);
            self.stats.record_queue_full(report.queue_full);
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Instant;

    use serde_json::Value;

    use super::*;
    use crate::application::clock::MockClock;

    /// A mock clock whose time the test can move forward.
    fn movable_clock() -> (Arc<MockClock>, Arc<Mutex<Instant>>) {
        let now = Arc::new(Mutex::new(Instant::now()));
        let shared = Arc::clone(&now);
        let mut clock = MockClock::new();
        clock
            .expect_now()
            .returning(move || *shared.lock().unwrap());
        (Arc::new(clock), now)
    }

    fn advance(now: &Arc<Mutex<Instant>>, by: Duration) {
        let mut t = now.lock().unwrap();
        *t += by;
    }

    fn router_with(fanout: FanoutPolicy) -> (Router, Arc<Mutex<Instant>>) {
        let (clock, now) = movable_clock();
        let config = HubConfig {
            fanout,
            outbound_queue: 8,
            lock_timeout: Duration::from_millis(200),
            ..HubConfig::default()
        };
        (Router::new(&config, clock), now)
    }

    fn dev(id: &str) -> DeviceId {
        DeviceId::new(id).unwrap()
    }

    fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.to_string());
        }
        out
    }

    fn json(text: &str) -> Value {
        serde_json::from_str(text).unwrap()
    }

    async fn connect(router: &Router, role: Role) -> (ConnectionId, mpsc::Receiver<Outbound>) {
        let id = ConnectionId::new_v4();
        let rx = router.on_connect(id, role).await.unwrap();
        (id, rx)
    }

    #[tokio::test]
    async fn test_register_notifies_every_observer_not_just_watchers() {
        // Arrange
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (_o1, mut rx1) = connect(&router, Role::Observer).await;
        let (_o2, mut rx2) = connect(&router, Role::Observer).await;
        let (phone, mut phone_rx) = connect(&router, Role::Producer).await;

        // Act
        router
            .dispatch(phone, Role::Producer, r#"{"type":"register","deviceId":"dev-1","metadata":{"model":"Pixel"}}"#)
            .await
            .unwrap();

        // Assert
        for rx in [&mut rx1, &mut rx2] {
            let msgs = drain(rx);
            assert_eq!(msgs.len(), 1);
            let msg = json(&msgs[0]);
            assert_eq!(msg["type"], "registry-changed");
            assert_eq!(msg["change"], "online");
            assert_eq!(msg["sessions"][0]["metadata"]["model"], "Pixel");
        }
        assert!(drain(&mut phone_rx).is_empty());
    }

    #[tokio::test]
    async fn test_frame_reaches_watchers_only_and_verbatim() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (watcher, mut wrx) = connect(&router, Role::Observer).await;
        let (_idle, mut irx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_watch(watcher, dev("dev-1")).await.unwrap();
        drain(&mut wrx);
        drain(&mut irx);

        let frame = r#"{"type":"frame","deviceId":"dev-1","payload":"AAAA","width":100,"height":200,"timestamp":1}"#;
        router.dispatch(phone, Role::Producer, frame).await.unwrap();

        assert_eq!(drain(&mut wrx), vec![frame.to_string()]);
        assert!(drain(&mut irx).is_empty());
        assert_eq!(router.stats().deliveries, 1);
    }

    #[tokio::test]
    async fn test_all_observers_policy_ignores_watches() {
        let (router, _now) = router_with(FanoutPolicy::AllObservers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (_o1, mut rx1) = connect(&router, Role::Observer).await;
        let (_o2, mut rx2) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        drain(&mut rx1);
        drain(&mut rx2);

        let delivered = router
            .on_layout(phone, &dev("dev-1"), r#"{"type":"layout","deviceId":"dev-1","payload":{}}"#)
            .await
            .unwrap();

        assert_eq!(delivered, 2);
        assert_eq!(drain(&mut rx1).len(), 1);
        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[tokio::test]
    async fn test_all_observers_policy_forgets_disconnected_observer() {
        // Arrange
        let (router, _now) = router_with(FanoutPolicy::AllObservers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (gone, _gone_rx) = connect(&router, Role::Observer).await;
        let (_stays, mut stays_rx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        drain(&mut stays_rx);

        // Act
        router.on_disconnect(gone).await.unwrap();
        let delivered = router.on_frame(phone, &dev("dev-1"), "f").await.unwrap();

        // Assert
        assert_eq!(delivered, 1);
        assert_eq!(drain(&mut stays_rx), vec!["f".to_string()]);
    }

    #[tokio::test]
    async fn test_watchers_policy_does_not_broadcast() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (_obs, mut orx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        drain(&mut orx);

        let delivered = router.on_frame(phone, &dev("dev-1"), "f").await.unwrap();

        assert_eq!(delivered, 0);
        assert!(drain(&mut orx).is_empty());
    }

    #[tokio::test]
    async fn test_frame_without_timestamp_reaches_watcher() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (watcher, mut wrx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_watch(watcher, dev("dev-1")).await.unwrap();
        drain(&mut wrx);

        let frame = r#"{"type":"frame","deviceId":"dev-1","w":100,"h":200,"data":"..."}"#;
        router.dispatch(phone, Role::Producer, frame).await.unwrap();

        assert_eq!(drain(&mut wrx), vec![frame.to_string()]);
        assert_eq!(router.stats().malformed, 0);
    }

    #[tokio::test]
    async fn test_frame_from_superseded_connection_is_dropped() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (old, _r1) = connect(&router, Role::Producer).await;
        let (new, _r2) = connect(&router, Role::Producer).await;
        let (watcher, mut wrx) = connect(&router, Role::Observer).await;
        router.on_register(old, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_register(new, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_watch(watcher, dev("dev-1")).await.unwrap();
        drain(&mut wrx);

        let delivered = router.on_frame(old, &dev("dev-1"), "stale").await.unwrap();

        assert_eq!(delivered, 0);
        assert!(drain(&mut wrx).is_empty());
    }

    #[tokio::test]
    async fn test_control_is_unicast_to_target_device() {
        // Arrange: two online devices, one observer watching both
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (a, mut a_rx) = connect(&router, Role::Producer).await;
        let (b, mut b_rx) = connect(&router, Role::Producer).await;
        let (obs, _orx) = connect(&router, Role::Observer).await;
        router.on_register(a, dev("a"), Metadata::new()).await.unwrap();
        router.on_register(b, dev("b"), Metadata::new()).await.unwrap();
        router.on_watch(obs, dev("a")).await.unwrap();
        router.on_watch(obs, dev("b")).await.unwrap();

        // Act
        let control = r#"{"type":"control","deviceId":"a","action":"tap","x":10,"y":20}"#;
        router.dispatch(obs, Role::Observer, control).await.unwrap();

        // Assert
        assert_eq!(drain(&mut a_rx), vec![control.to_string()]);
        assert!(drain(&mut b_rx).is_empty());
        assert_eq!(router.stats().controls_delivered, 1);
    }

    #[tokio::test]
    async fn test_control_for_offline_device_is_dropped() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, mut phone_rx) = connect(&router, Role::Producer).await;
        let (obs, _orx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_disconnect(phone).await.unwrap();

        let delivered = router.on_control(obs, &dev("dev-1"), "{}").await.unwrap();

        assert!(!delivered);
        assert!(drain(&mut phone_rx).is_empty());
        assert_eq!(router.stats().controls_dropped, 1);
    }

    #[tokio::test]
    async fn test_disconnect_cleanup_is_idempotent() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (_obs, mut orx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        drain(&mut orx);

        router.on_disconnect(phone).await.unwrap();
        router.on_disconnect(phone).await.unwrap();

        let msgs = drain(&mut orx);
        assert_eq!(msgs.len(), 1);
        let msg = json(&msgs[0]);
        assert_eq!(msg["change"], "offline");
        assert_eq!(msg["reason"], "disconnected");
        assert_eq!(msg["sessions"][0]["status"], "offline");
    }

    #[tokio::test]
    async fn test_observer_disconnect_drops_its_watches() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (obs, _orx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_watch(obs, dev("dev-1")).await.unwrap();

        router.on_disconnect(obs).await.unwrap();

        // The watch is gone, so a re-watch reports a new subscription.
        assert!(router.on_watch(obs, dev("dev-1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_sweep_fires_once_per_transition() {
        // Arrange
        let (router, now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (_obs, mut orx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        drain(&mut orx);

        // Act
        advance(&now, Duration::from_secs(61));
        let first = router.sweep_expired(Duration::from_secs(60)).await.unwrap();
        let second = router.sweep_expired(Duration::from_secs(60)).await.unwrap();

        // Assert
        assert_eq!(first, vec![dev("dev-1")]);
        assert!(second.is_empty());
        let msgs = drain(&mut orx);
        assert_eq!(msgs.len(), 1);
        assert_eq!(json(&msgs[0])["reason"], "expired");
    }

    #[tokio::test]
    async fn test_heartbeat_keeps_device_online() {
        let (router, now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();

        advance(&now, Duration::from_secs(45));
        router
            .dispatch(phone, Role::Producer, r#"{"type":"heartbeat","deviceId":"dev-1"}"#)
            .await
            .unwrap();
        advance(&now, Duration::from_secs(45));

        assert!(router.sweep_expired(Duration::from_secs(60)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_producer_ping_counts_as_heartbeat() {
        let (router, now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();

        advance(&now, Duration::from_secs(45));
        assert!(router.on_producer_ping(phone).await.unwrap());
        advance(&now, Duration::from_secs(45));

        assert!(router.sweep_expired(Duration::from_secs(60)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_garbage_collection_spares_watched_devices() {
        let (router, now) = router_with(FanoutPolicy::Watchers);
        let (p1, _r1) = connect(&router, Role::Producer).await;
        let (p2, _r2) = connect(&router, Role::Producer).await;
        let (obs, mut orx) = connect(&router, Role::Observer).await;
        router.on_register(p1, dev("kept"), Metadata::new()).await.unwrap();
        router.on_register(p2, dev("gone"), Metadata::new()).await.unwrap();
        router.on_watch(obs, dev("kept")).await.unwrap();
        router.on_disconnect(p1).await.unwrap();
        router.on_disconnect(p2).await.unwrap();
        drain(&mut orx);

        advance(&now, Duration::from_secs(601));
        let removed = router.collect_garbage(Duration::from_secs(600)).await.unwrap();

        assert_eq!(removed, vec![dev("gone")]);
        let msgs = drain(&mut orx);
        assert_eq!(msgs.len(), 1);
        let msg = json(&msgs[0]);
        assert_eq!(msg["change"], "removed");
        assert_eq!(msg["reason"], "collected");
        assert_eq!(msg["sessions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_replies_to_sender_only() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (asker, mut arx) = connect(&router, Role::Observer).await;
        let (_other, mut other_rx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        drain(&mut arx);
        drain(&mut other_rx);

        router.dispatch(asker, Role::Observer, r#"{"type":"list"}"#).await.unwrap();

        let msgs = drain(&mut arx);
        assert_eq!(msgs.len(), 1);
        let msg = json(&msgs[0]);
        assert_eq!(msg["type"], "sessions");
        assert_eq!(msg["sessions"][0]["deviceId"], "dev-1");
        assert!(drain(&mut other_rx).is_empty());
    }

    #[tokio::test]
    async fn test_wrong_role_is_rejected_and_counted() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (obs, _orx) = connect(&router, Role::Observer).await;

        let result = router
            .dispatch(obs, Role::Observer, r#"{"type":"register","deviceId":"dev-1"}"#)
            .await;

        assert!(matches!(
            result,
            Err(RouteError::RoleMismatch { message: "register", expected: Role::Producer, .. })
        ));
        assert!(router.list_sessions().await.unwrap().is_empty());
        assert_eq!(router.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_malformed_message_is_counted() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (obs, _orx) = connect(&router, Role::Observer).await;

        let result = router.dispatch(obs, Role::Observer, "not json").await;

        assert!(matches!(result, Err(RouteError::Protocol(_))));
        assert_eq!(router.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_binary_frame_is_wrapped_for_bound_device() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;
        let (obs, mut orx) = connect(&router, Role::Observer).await;
        router.on_register(phone, dev("dev-1"), Metadata::new()).await.unwrap();
        router.on_watch(obs, dev("dev-1")).await.unwrap();
        drain(&mut orx);

        let delivered = router.on_binary_frame(phone, b"hi").await.unwrap();

        assert_eq!(delivered, 1);
        assert_eq!(
            drain(&mut orx),
            vec![r#"{"type":"screen","deviceId":"dev-1","data":"aGk="}"#.to_string()]
        );
    }

    #[tokio::test]
    async fn test_binary_frame_before_register_is_rejected() {
        let (router, _now) = router_with(FanoutPolicy::Watchers);
        let (phone, _prx) = connect(&router, Role::Producer).await;

        let result = router.on_binary_frame(phone, b"hi").await;

        assert!(matches!(result, Err(RouteError::NoBoundDevice(id)) if id == phone));
    }
}
