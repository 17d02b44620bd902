//! Origin allow-list for WebSocket upgrades.

use axum::http::HeaderMap;
use axum::http::header::ORIGIN;

use crate::errors::AuthError;

/// Exact-match allow-list of request origins.
#[derive(Clone, Debug, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
}

impl OriginPolicy {
    /// Build a policy from configured origins.
    ///
    /// Trailing slashes are ignored on both sides of the comparison.
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|o| normalize(o.as_ref()).to_owned())
                .filter(|o| !o.is_empty())
                .collect(),
        }
    }

    /// Allowed origins.
    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Whether `origin` is allow-listed. A missing origin never is.
    pub fn is_allowed(&self, origin: Option<&str>) -> bool {
        origin
            .map(normalize)
            .is_some_and(|o| self.allowed.iter().any(|a| a == o))
    }

    /// Check the `Origin` header of an upgrade request.
    pub fn check(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
        if self.is_allowed(origin) {
            Ok(())
        } else {
            Err(AuthError::OriginNotAllowed(origin.map(str::to_owned)))
        }
    }
}

fn normalize(origin: &str) -> &str {
    origin.trim().trim_end_matches('/')
}
