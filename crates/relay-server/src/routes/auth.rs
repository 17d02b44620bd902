//! `POST /login`: exchange credentials for a one-time token.

use axum::body::Bytes;
use axum::extract::State;
use axum::response::Json;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::errors::AuthError;
use crate::metrics::LOGINS_TOTAL;
use crate::server::AppState;

/// Login request body. Missing fields read as empty strings.
#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    /// Username.
    #[serde(default)]
    pub username: String,
    /// Password.
    #[serde(default)]
    pub password: String,
}

/// Login response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    /// One-time token for `/ws?otp=`.
    pub otp: String,
}

/// Whether the request carries the configured credentials.
pub fn credentials_match(config: &ServerConfig, request: &LoginRequest) -> bool {
    request.username == config.username && request.password == config.password
}

/// POST /login
pub async fn login(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<LoginResponse>, AuthError> {
    let request: LoginRequest = serde_json::from_slice(&body).map_err(|e| {
        debug!(error = %e, "malformed login body");
        counter!(LOGINS_TOTAL, "outcome" => "malformed").increment(1);
        AuthError::MalformedRequest
    })?;

    if !credentials_match(&state.config, &request) {
        counter!(LOGINS_TOTAL, "outcome" => "rejected").increment(1);
        warn!(username = %request.username, "login rejected");
        return Err(AuthError::BadCredentials);
    }

    let token = state.hub.tokens().issue();
    counter!(LOGINS_TOTAL, "outcome" => "accepted").increment(1);
    info!(username = %request.username, "login accepted");
    Ok(Json(LoginResponse { otp: token.key }))
}
