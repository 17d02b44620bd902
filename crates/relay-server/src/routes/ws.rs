//! `GET /ws?otp=`: authenticated WebSocket upgrade.

use std::sync::Arc;

use axum::extract::rejection::QueryRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::AuthError;
use crate::metrics::WS_UPGRADES_REJECTED_TOTAL;
use crate::server::AppState;

/// Query string of the upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    /// One-time token from `/login`.
    pub otp: Option<String>,
}

/// GET /ws
///
/// Checks the origin before the token so a refused origin cannot burn one.
/// The token is consumed before the upgrade handshake is attempted. A
/// query string that does not yield a single `otp` is an invalid token.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WsQuery>, QueryRejection>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if let Err(e) = state.origins.check(&headers) {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => e.code()).increment(1);
        warn!(error = %e, "upgrade refused");
        return e.into_response();
    }

    let authorized = match query {
        Ok(Query(query)) => state.hub.authorize(query.otp.as_deref()),
        Err(rejection) => {
            debug!(error = %rejection, "unreadable upgrade query");
            Err(AuthError::InvalidToken)
        }
    };
    if let Err(e) = authorized {
        counter!(WS_UPGRADES_REJECTED_TOTAL, "reason" => e.code()).increment(1);
        debug!(error = %e, "upgrade unauthorized");
        return e.into_response();
    }

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => {
            debug!(error = %rejection, "not a websocket handshake");
            return rejection.into_response();
        }
    };

    let hub = Arc::clone(&state.hub);
    ws.max_message_size(state.config.max_message_size)
        .on_upgrade(move |socket| async move {
            let (writer, reader) = socket.split();
            let _ = hub.admit(reader, writer).await;
        })
}
