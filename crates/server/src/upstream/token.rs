//! Bearer token cache for challenge-driven upstream auth.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Process-wide token cache keyed by `(upstream_id, scope)`.
pub struct TokenCache {
    ttl_cap: Duration,
    inner: Mutex<HashMap<(i64, String), CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl TokenCache {
    pub fn new(ttl_cap: Duration) -> Self {
        Self {
            ttl_cap,
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch a live token, dropping it if expired.
    pub fn get(&self, upstream_id: i64, scope: &str) -> Option<String> {
        let mut cache = self.inner.lock().expect("token cache lock");
        let key = (upstream_id, scope.to_string());
        match cache.get(&key) {
            Some(cached) if cached.expires_at > Instant::now() => Some(cached.token.clone()),
            Some(_) => {
                cache.remove(&key);
                None
            }
            None => None,
        }
    }

    /// Cache a token with TTL `min(expires_in, cap)`.
    pub fn put(&self, upstream_id: i64, scope: &str, token: String, expires_in: Option<u64>) {
        let ttl = expires_in
            .map(Duration::from_secs)
            .map(|d| d.min(self.ttl_cap))
            .unwrap_or(self.ttl_cap);
        let mut cache = self.inner.lock().expect("token cache lock");
        cache.insert(
            (upstream_id, scope.to_string()),
            CachedToken {
                token,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

/// Parsed `Www-Authenticate: Bearer` challenge.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: String,
    pub service: Option<String>,
    pub scope: Option<String>,
}

/// Parse a bearer challenge header value. Returns None for other schemes.
pub fn parse_bearer_challenge(header: &str) -> Option<BearerChallenge> {
    let rest = header.strip_prefix("Bearer ").or_else(|| {
        header
            .len()
            .checked_sub(7)
            .and_then(|_| header[..7].eq_ignore_ascii_case("bearer ").then(|| &header[7..]))
    })?;

    let mut challenge = BearerChallenge::default();
    for part in rest.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        let value = value.trim().trim_matches('"');
        match key.trim() {
            "realm" => challenge.realm = value.to_string(),
            "service" => challenge.service = Some(value.to_string()),
            "scope" => challenge.scope = Some(value.to_string()),
            _ => {}
        }
    }

    if challenge.realm.is_empty() {
        None
    } else {
        Some(challenge)
    }
}
