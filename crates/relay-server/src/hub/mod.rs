//! Connection registry, admission, and room-scoped fan-out.

pub mod connection;
pub mod session;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::Message;
use futures::future::join_all;
use futures::{Sink, Stream};
use metrics::{counter, gauge, histogram};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::{ServerConfig, ping_interval_for};
use crate::errors::{AuthError, EventError};
use crate::metrics::{
    WS_BROADCAST_DELIVERIES_TOTAL, WS_BROADCAST_DROPS_TOTAL, WS_CONNECTION_DURATION_SECONDS,
    WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::protocol::{Event, EventRegistry};
use crate::token_store::TokenStore;

use self::connection::{Connection, ConnectionState};
use self::session::PumpHandles;

/// Liveness and queueing knobs applied to every admitted connection.
#[derive(Clone, Copy, Debug)]
pub struct HubConfig {
    /// Silence allowed on pongs before the inbound pump gives up.
    pub pong_wait: Duration,
    /// Ping cadence of the outbound pump.
    pub ping_interval: Duration,
    /// Outbound queue capacity per connection.
    pub outbound_capacity: usize,
}

impl HubConfig {
    /// Derive from server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            pong_wait: config.pong_wait(),
            ping_interval: config.ping_interval(),
            outbound_capacity: config.outbound_queue_capacity,
        }
    }

    /// Config with the given pong window and its derived ping interval.
    pub fn with_pong_wait(pong_wait: Duration) -> Self {
        Self {
            pong_wait,
            ping_interval: ping_interval_for(pong_wait),
            ..Self::default()
        }
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::from_config(&ServerConfig::default())
    }
}

/// A connection admitted into the hub, with its running pumps.
pub struct Admitted {
    /// The registered connection.
    pub connection: Arc<Connection>,
    /// Join handles for the inbound and outbound pumps.
    pub pumps: PumpHandles,
}

/// Central registry of live connections.
///
/// Owns the event registry and the one-time token store. Connections are
/// keyed by ID; a connection is in the map from [`register`](Self::register)
/// until the first pump to exit calls [`release`](Self::release).
pub struct Hub {
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    registry: EventRegistry,
    tokens: Arc<TokenStore>,
    config: HubConfig,
    closing: AtomicBool,
}

impl Hub {
    /// Create a hub.
    pub fn new(registry: EventRegistry, tokens: Arc<TokenStore>, config: HubConfig) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            registry,
            tokens,
            config,
            closing: AtomicBool::new(false),
        }
    }

    /// Per-connection settings.
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// The one-time token store.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// The event handler registry.
    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Add a connection to the registry.
    pub async fn register(&self, connection: Arc<Connection>) {
        connection.advance(ConnectionState::Registered);
        let id = connection.id.clone();
        let total = {
            let mut conns = self.connections.write().await;
            let _ = conns.insert(id.clone(), connection);
            conns.len()
        };
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
        debug!(conn_id = %id, total, "connection registered");
    }

    /// Remove a connection by ID. Returns whether it was present.
    pub async fn unregister(&self, id: &str) -> bool {
        let (removed, total) = {
            let mut conns = self.connections.write().await;
            let removed = conns.remove(id).is_some();
            (removed, conns.len())
        };
        if removed {
            counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
            gauge!(WS_CONNECTIONS_ACTIVE).set(total as f64);
            debug!(conn_id = %id, total, "connection unregistered");
        }
        removed
    }

    /// Tear down a connection: unregister it and close it exactly once.
    ///
    /// Called by both pumps on exit; only the first call has any effect.
    pub async fn release(&self, connection: &Connection) {
        if !connection.begin_teardown() {
            return;
        }
        let _ = self.unregister(&connection.id).await;
        connection.close();
        connection.finish_teardown();
        histogram!(WS_CONNECTION_DURATION_SECONDS)
            .record(connection.age().as_secs_f64());
        info!(conn_id = %connection.id, "client disconnected");
    }

    /// Consume a one-time token presented on upgrade.
    pub fn authorize(&self, otp: Option<&str>) -> Result<(), AuthError> {
        let otp = otp.filter(|k| !k.is_empty()).ok_or(AuthError::MissingToken)?;
        if self.tokens.validate(otp) {
            Ok(())
        } else {
            Err(AuthError::InvalidToken)
        }
    }

    /// Register a connection over the given transport halves and start its
    /// inbound and outbound pumps.
    ///
    /// After [`close_all`](Self::close_all) the connection is closed as soon
    /// as it is registered, so its pumps send a close frame and release it.
    pub async fn admit<R, W, E>(self: &Arc<Self>, reader: R, writer: W) -> Admitted
    where
        R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
        E: Display + Send + 'static,
        W: Sink<Message> + Unpin + Send + 'static,
        W::Error: Display + Send,
    {
        let (connection, queue) = Connection::channel(self.config.outbound_capacity);
        let connection = Arc::new(connection);
        self.register(Arc::clone(&connection)).await;
        // Checked after registering: close_all raises the flag before it
        // snapshots, so every connection is seen by one of the two.
        if self.is_closing() {
            debug!(conn_id = %connection.id, "hub closing, refusing connection");
            connection.close();
        }
        let pumps = session::spawn_pumps(reader, writer, Arc::clone(&connection), queue, self);
        connection.advance(ConnectionState::Active);
        info!(conn_id = %connection.id, "client connected");
        Admitted { connection, pumps }
    }

    /// Route an inbound event to its handler.
    pub async fn dispatch(&self, event: &Event, origin: &Arc<Connection>) -> Result<(), EventError> {
        self.registry.dispatch(event, origin, self).await
    }

    /// Enqueue `event` to every connection matching `predicate`.
    ///
    /// Recipients are snapshotted under the read lock and sent to after it
    /// is released. Returns how many enqueues succeeded.
    pub async fn broadcast<P>(&self, event: &Event, predicate: P) -> usize
    where
        P: Fn(&Connection) -> bool,
    {
        let recipients: Vec<Arc<Connection>> = {
            let conns = self.connections.read().await;
            conns
                .values()
                .filter(|c| predicate(c))
                .cloned()
                .collect()
        };
        let results = join_all(recipients.iter().map(|c| c.send(event.clone()))).await;
        let delivered = results.iter().filter(|ok| **ok).count();
        let dropped = recipients.len() - delivered;
        counter!(WS_BROADCAST_DELIVERIES_TOTAL).increment(delivered as u64);
        if dropped > 0 {
            counter!(WS_BROADCAST_DROPS_TOTAL).increment(dropped as u64);
        }
        debug!(
            event_type = %event.event_type,
            recipients = recipients.len(),
            delivered,
            "broadcast event"
        );
        delivered
    }

    /// Enqueue `event` to every connection currently in `room`.
    pub async fn broadcast_to_room(&self, room: &str, event: &Event) -> usize {
        self.broadcast(event, |c| c.in_room(room)).await
    }

    /// Number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether a connection with `id` is registered.
    pub async fn contains(&self, id: &str) -> bool {
        self.connections.read().await.contains_key(id)
    }

    /// Snapshot of all registered connections.
    pub async fn connections(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Whether [`close_all`](Self::close_all) has run.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Close every registered connection and any admitted later; their
    /// pumps release them.
    pub async fn close_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let conns = self.connections().await;
        for conn in &conns {
            conn.close();
        }
        if !conns.is_empty() {
            info!(count = conns.len(), "closing all connections");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::default_registry;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tokio::sync::mpsc;

    fn make_hub() -> Arc<Hub> {
        Arc::new(Hub::new(
            default_registry(),
            Arc::new(TokenStore::default()),
            HubConfig::default(),
        ))
    }

    async fn join(hub: &Hub, room: &str) -> (Arc<Connection>, mpsc::Receiver<Event>) {
        let (conn, rx) = Connection::channel(8);
        let conn = Arc::new(conn);
        let _ = conn.set_room(room);
        hub.register(Arc::clone(&conn)).await;
        (conn, rx)
    }

    fn event() -> Event {
        Event {
            event_type: "new_message".into(),
            payload: json!({"message": "m"}),
        }
    }

    #[test]
    fn hub_config_derives_ping_interval() {
        let cfg = HubConfig::with_pong_wait(Duration::from_millis(500));
        assert_eq!(cfg.ping_interval, Duration::from_millis(450));
        let cfg = HubConfig::default();
        assert_eq!(cfg.pong_wait, Duration::from_secs(10));
        assert_eq!(cfg.outbound_capacity, 64);
    }

    #[tokio::test]
    async fn register_and_unregister() {
        let hub = make_hub();
        let (conn, _rx) = join(&hub, "").await;
        assert_eq!(hub.connection_count().await, 1);
        assert!(hub.contains(&conn.id).await);
        assert_eq!(conn.state(), ConnectionState::Registered);

        assert!(hub.unregister(&conn.id).await);
        assert!(!hub.unregister(&conn.id).await);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let hub = make_hub();
        let (conn, _rx) = join(&hub, "").await;

        hub.release(&conn).await;
        hub.release(&conn).await;

        assert!(conn.is_closed());
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(hub.connection_count().await, 0);
    }

    #[tokio::test]
    async fn authorize_consumes_token() {
        let hub = make_hub();
        let token = hub.tokens().issue();
        assert_eq!(hub.authorize(Some(&token.key)), Ok(()));
        assert_eq!(hub.authorize(Some(&token.key)), Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn authorize_missing_or_empty() {
        let hub = make_hub();
        assert_matches!(hub.authorize(None), Err(AuthError::MissingToken));
        assert_matches!(hub.authorize(Some("")), Err(AuthError::MissingToken));
        assert_matches!(hub.authorize(Some("nope")), Err(AuthError::InvalidToken));
    }

    #[tokio::test]
    async fn broadcast_to_room_filters() {
        let hub = make_hub();
        let (_a, mut a_rx) = join(&hub, "x").await;
        let (_b, mut b_rx) = join(&hub, "x").await;
        let (_c, mut c_rx) = join(&hub, "y").await;

        assert_eq!(hub.broadcast_to_room("x", &event()).await, 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
        assert!(c_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_to_empty_room_is_noop() {
        let hub = make_hub();
        assert_eq!(hub.broadcast_to_room("nobody", &event()).await, 0);
        let (_a, mut a_rx) = join(&hub, "x").await;
        assert_eq!(hub.broadcast_to_room("nobody", &event()).await, 0);
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn default_room_is_shared() {
        let hub = make_hub();
        let (_a, mut a_rx) = join(&hub, "").await;
        let (_b, mut b_rx) = join(&hub, "").await;

        assert_eq!(hub.broadcast_to_room("", &event()).await, 2);
        assert!(a_rx.try_recv().is_ok());
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_skips_closed_connections() {
        let hub = make_hub();
        let (a, _a_rx) = join(&hub, "x").await;
        let (_b, mut b_rx) = join(&hub, "x").await;
        a.close();

        assert_eq!(hub.broadcast_to_room("x", &event()).await, 1);
        assert!(b_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn broadcast_after_room_change() {
        let hub = make_hub();
        let (a, mut a_rx) = join(&hub, "x").await;

        let _ = a.set_room("y");
        assert_eq!(hub.broadcast_to_room("x", &event()).await, 0);
        assert_eq!(hub.broadcast_to_room("y", &event()).await, 1);
        assert!(a_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn close_all_closes_every_connection() {
        let hub = make_hub();
        let (a, _a_rx) = join(&hub, "").await;
        let (b, _b_rx) = join(&hub, "z").await;

        hub.close_all().await;
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_register_unregister_leaves_empty() {
        let hub = make_hub();
        let mut handles = Vec::new();
        for _ in 0..64 {
            let hub = Arc::clone(&hub);
            handles.push(tokio::spawn(async move {
                let (conn, rx) = Connection::channel(1);
                drop(rx);
                let conn = Arc::new(conn);
                hub.register(Arc::clone(&conn)).await;
                let _ = hub.broadcast_to_room("", &event()).await;
                hub.release(&conn).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(hub.connection_count().await, 0);
    }
}
