//! Time-bounded one-time token store.
//!
//! Tokens are minted after a successful login and consumed by the first
//! `/ws` upgrade that presents them. A background sweeper drops entries whose
//! lifetime ran out without being used.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::metrics::{TOKENS_ISSUED_TOTAL, TOKENS_SWEPT_TOTAL, TOKENS_VALIDATED_TOTAL};

/// Default token lifetime.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

/// Default sweep tick.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(400);

/// A freshly issued one-time token.
#[derive(Clone, Debug)]
pub struct Token {
    /// Opaque key handed to the client.
    pub key: String,
    /// Instant after which the key no longer validates.
    pub expires_at: Instant,
}

/// Map of outstanding token keys to their expiry.
///
/// Invariant: a key present in the map has been neither validated nor swept.
pub struct TokenStore {
    entries: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl TokenStore {
    /// Create a store whose tokens live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Token lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Mint a new random token.
    pub fn issue(&self) -> Token {
        let key = uuid::Uuid::new_v4().to_string();
        let expires_at = Instant::now() + self.ttl;
        let _ = self.entries.lock().insert(key.clone(), expires_at);
        counter!(TOKENS_ISSUED_TOTAL).increment(1);
        debug!(ttl_secs = self.ttl.as_secs(), "one-time token issued");
        Token { key, expires_at }
    }

    /// Consume `key`, returning whether it was valid.
    ///
    /// The entry is removed whether it was live or expired, so a key can
    /// succeed at most once.
    pub fn validate(&self, key: &str) -> bool {
        let removed = self.entries.lock().remove(key);
        let valid = matches!(removed, Some(expires_at) if Instant::now() < expires_at);
        let outcome = match (removed, valid) {
            (None, _) => "unknown",
            (Some(_), true) => "accepted",
            (Some(_), false) => "expired",
        };
        counter!(TOKENS_VALIDATED_TOTAL, "outcome" => outcome).increment(1);
        debug!(outcome, "one-time token validation");
        valid
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| now < *expires_at);
        let swept = before - entries.len();
        drop(entries);
        if swept > 0 {
            counter!(TOKENS_SWEPT_TOTAL).increment(swept as u64);
            trace!(swept, "expired tokens swept");
        }
        swept
    }

    /// Number of outstanding tokens.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no tokens are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Run [`sweep`](Self::sweep) every `interval` until `cancel` fires.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = store.sweep();
                    }
                    () = cancel.cancelled() => {
                        debug!("token sweeper stopped");
                        return;
                    }
                }
            }
        })
    }
}

impl Default for TokenStore {
    fn default() -> Self {
        Self::new(DEFAULT_TOKEN_TTL)
    }
}
