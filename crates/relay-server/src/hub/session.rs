//! Inbound and outbound pumps for one admitted connection.
//!
//! The inbound pump reads frames, enforces the pong deadline, and dispatches
//! events. The outbound pump drains the connection's queue onto the socket
//! and sends pings. Whichever exits first releases the connection, which
//! closes it and stops the other.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, instrument, trace, warn};

use super::Hub;
use super::connection::Connection;
use crate::metrics::{EVENT_ERRORS_TOTAL, WS_WRITE_ERRORS_TOTAL};
use crate::protocol::Event;

/// Join handles for a connection's pumps.
pub struct PumpHandles {
    /// Reader task.
    pub inbound: JoinHandle<()>,
    /// Writer task.
    pub outbound: JoinHandle<()>,
}

impl PumpHandles {
    /// Wait for both pumps to finish.
    pub async fn join(self) {
        let _ = self.inbound.await;
        let _ = self.outbound.await;
    }
}

/// Spawn both pumps for `connection`.
pub fn spawn_pumps<R, W, E>(
    reader: R,
    writer: W,
    connection: Arc<Connection>,
    queue: mpsc::Receiver<Event>,
    hub: &Arc<Hub>,
) -> PumpHandles
where
    R: Stream<Item = Result<Message, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: Display + Send,
{
    let config = *hub.config();
    let inbound = tokio::spawn(inbound_pump(
        reader,
        Arc::clone(&connection),
        Arc::clone(hub),
        config.pong_wait,
    ));
    let outbound = tokio::spawn(outbound_pump(
        writer,
        connection,
        queue,
        Arc::clone(hub),
        config.ping_interval,
    ));
    PumpHandles { inbound, outbound }
}

/// Read frames until the peer goes away, the pong deadline passes, or the
/// connection is closed.
///
/// Text (and UTF-8 binary) frames are parsed and dispatched inline, so a
/// single connection's events are handled in arrival order. Malformed or
/// unhandled events are logged and skipped.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn inbound_pump<R, E>(
    mut reader: R,
    connection: Arc<Connection>,
    hub: Arc<Hub>,
    pong_wait: Duration,
) where
    R: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;
    let reason = loop {
        tokio::select! {
            biased;
            () = connection.closed() => break "closed",
            () = time::sleep_until(deadline) => {
                warn!(?pong_wait, "no pong within deadline");
                break "idle timeout";
            }
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    handle_frame(text.as_str(), &connection, &hub).await;
                }
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_frame(text, &connection, &hub).await,
                    Err(_) => debug!(len = data.len(), "ignoring non-UTF8 binary frame"),
                },
                Some(Ok(Message::Pong(_))) => {
                    deadline = Instant::now() + pong_wait;
                    trace!("pong received");
                }
                Some(Ok(Message::Ping(_))) => {}
                Some(Ok(Message::Close(_))) => break "client close",
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read error");
                    break "read error";
                }
                None => break "stream ended",
            }
        }
    };
    debug!(reason, "inbound pump stopped");
    hub.release(&connection).await;
}

async fn handle_frame(text: &str, connection: &Arc<Connection>, hub: &Hub) {
    let event = match Event::parse(text) {
        Ok(event) => event,
        Err(e) => {
            counter!(EVENT_ERRORS_TOTAL, "type" => "", "error" => e.code()).increment(1);
            warn!(error = %e, "dropping malformed event");
            return;
        }
    };
    if let Err(e) = hub.dispatch(&event, connection).await {
        warn!(
            event_type = %event.event_type,
            code = e.code(),
            error = %e,
            "event not handled"
        );
    }
}

/// Drain the outbound queue onto `writer` and ping every `ping_interval`.
///
/// A failed event write is logged and the pump moves on to the next event.
/// A failed ping ends the pump, as does the connection closing, in which
/// case a close frame is written first.
#[instrument(skip_all, fields(conn_id = %connection.id))]
pub async fn outbound_pump<W>(
    mut writer: W,
    connection: Arc<Connection>,
    mut queue: mpsc::Receiver<Event>,
    hub: Arc<Hub>,
    ping_interval: Duration,
) where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = time::interval_at(Instant::now() + ping_interval, ping_interval);
    ping.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            () = connection.closed() => {
                write_close(&mut writer).await;
                break "closed";
            }
            maybe = queue.recv() => match maybe {
                Some(event) => write_event(&mut writer, &event).await,
                None => {
                    write_close(&mut writer).await;
                    break "queue closed";
                }
            },
            _ = ping.tick() => {
                if let Err(e) = writer.send(Message::Ping(Bytes::new())).await {
                    info!(error = %e, "ping failed");
                    break "ping failed";
                }
                trace!("ping sent");
            }
        }
    };
    debug!(reason, "outbound pump stopped");
    hub.release(&connection).await;
}

async fn write_event<W>(writer: &mut W, event: &Event)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let json = match event.to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!(event_type = %event.event_type, error = %e, "failed to serialize event");
            return;
        }
    };
    if let Err(e) = writer.send(Message::Text(json.into())).await {
        counter!(WS_WRITE_ERRORS_TOTAL).increment(1);
        warn!(event_type = %event.event_type, error = %e, "failed to write event");
    }
}

async fn write_close<W>(writer: &mut W)
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    if let Err(e) = writer.send(Message::Close(None)).await {
        trace!(error = %e, "close frame not written");
    }
}
