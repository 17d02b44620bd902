//! Per-client connection state.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::protocol::Event;

/// Lifecycle of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Created but not yet in the registry.
    Connecting,
    /// In the registry, pumps not started.
    Registered,
    /// Both pumps running.
    Active,
    /// Teardown claimed by one pump.
    Unregistering,
    /// Removed and closed.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Registered => "registered",
            Self::Active => "active",
            Self::Unregistering => "unregistering",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// One connected client.
pub struct Connection {
    /// Unique connection ID.
    pub id: String,
    /// Current room; `""` until the client picks one.
    room: RwLock<String>,
    /// Outbound queue drained by the outbound pump.
    tx: mpsc::Sender<Event>,
    /// Fired once when the connection is closed.
    closed: CancellationToken,
    state: Mutex<ConnectionState>,
    /// When this connection was created.
    pub connected_at: Instant,
    /// Enqueues refused because the connection was closed.
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection with a fresh ID around an existing queue sender.
    pub fn new(id: String, tx: mpsc::Sender<Event>) -> Self {
        Self {
            id,
            room: RwLock::new(String::new()),
            tx,
            closed: CancellationToken::new(),
            state: Mutex::new(ConnectionState::Connecting),
            connected_at: Instant::now(),
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Create a connection and the receiving half of its outbound queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let id = uuid::Uuid::new_v4().to_string();
        (Self::new(id, tx), rx)
    }

    /// Current room.
    pub fn room(&self) -> String {
        self.room.read().clone()
    }

    /// Whether the connection is currently in `room`.
    pub fn in_room(&self, room: &str) -> bool {
        *self.room.read() == room
    }

    /// Switch rooms, returning the previous one.
    pub fn set_room(&self, room: impl Into<String>) -> String {
        std::mem::replace(&mut *self.room.write(), room.into())
    }

    /// Enqueue an event for the outbound pump.
    ///
    /// Waits for queue space while the connection is open. Returns `false`
    /// without blocking once the connection is closed.
    pub async fn send(&self, event: Event) -> bool {
        if self.closed.is_cancelled() {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let sent = tokio::select! {
            biased;
            () = self.closed.cancelled() => false,
            res = self.tx.send(event) => res.is_ok(),
        };
        if !sent {
            let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
        }
        sent
    }

    /// Total enqueues refused.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Signal both pumps to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Move forward to `next` unless teardown has already begun.
    pub(crate) fn advance(&self, next: ConnectionState) {
        let mut state = self.state.lock();
        if !matches!(
            *state,
            ConnectionState::Unregistering | ConnectionState::Closed
        ) {
            *state = next;
        }
    }

    /// Claim teardown. Only the first caller gets `true`.
    pub(crate) fn begin_teardown(&self) -> bool {
        let mut state = self.state.lock();
        match *state {
            ConnectionState::Unregistering | ConnectionState::Closed => false,
            _ => {
                *state = ConnectionState::Unregistering;
                true
            }
        }
    }

    pub(crate) fn finish_teardown(&self) {
        *self.state.lock() = ConnectionState::Closed;
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("room", &*self.room.read())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u64) -> Event {
        Event {
            event_type: "new_message".into(),
            payload: json!({ "n": n }),
        }
    }

    #[test]
    fn new_connection_defaults() {
        let (conn, _rx) = Connection::channel(4);
        assert_eq!(conn.room(), "");
        assert!(conn.in_room(""));
        assert!(!conn.is_closed());
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(conn.drop_count(), 0);
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ra) = Connection::channel(1);
        let (b, _rb) = Connection::channel(1);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn set_room_returns_previous() {
        let (conn, _rx) = Connection::channel(1);
        assert_eq!(conn.set_room("x"), "");
        assert_eq!(conn.set_room("y"), "x");
        assert!(conn.in_room("y"));
        assert!(!conn.in_room("x"));
    }

    #[tokio::test]
    async fn send_preserves_order() {
        let (conn, mut rx) = Connection::channel(8);
        for n in 0..5 {
            assert!(conn.send(event(n)).await);
        }
        for n in 0..5 {
            assert_eq!(rx.recv().await.unwrap().payload["n"], n);
        }
    }

    #[tokio::test]
    async fn send_after_close_fails_fast() {
        let (conn, _rx) = Connection::channel(1);
        conn.close();
        assert!(!conn.send(event(1)).await);
        assert_eq!(conn.drop_count(), 1);
    }

    #[tokio::test]
    async fn close_unblocks_pending_send() {
        let (conn, _rx) = Connection::channel(1);
        let conn = std::sync::Arc::new(conn);
        assert!(conn.send(event(0)).await);

        let sender = std::sync::Arc::clone(&conn);
        let pending = tokio::spawn(async move { sender.send(event(1)).await });
        tokio::task::yield_now().await;
        conn.close();

        let sent = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("send stayed blocked after close")
            .unwrap();
        assert!(!sent);
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (conn, rx) = Connection::channel(1);
        drop(rx);
        assert!(!conn.send(event(0)).await);
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, _rx) = Connection::channel(1);
        conn.close();
        conn.close();
        assert!(conn.is_closed());
    }

    #[test]
    fn teardown_claimed_once() {
        let (conn, _rx) = Connection::channel(1);
        conn.advance(ConnectionState::Registered);
        conn.advance(ConnectionState::Active);
        assert!(conn.begin_teardown());
        assert!(!conn.begin_teardown());
        conn.advance(ConnectionState::Active);
        assert_eq!(conn.state(), ConnectionState::Unregistering);
        conn.finish_teardown();
        assert_eq!(conn.state(), ConnectionState::Closed);
        assert_eq!(conn.state().to_string(), "closed");
    }
}
