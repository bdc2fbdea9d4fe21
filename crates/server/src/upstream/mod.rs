//! Upstream proxy client.
//!
//! Fetches manifests and blobs from remote registries on cache miss, with
//! credentialed auth (basic or challenge-driven bearer), bounded retries
//! with exponential backoff and jitter, and a per-upstream circuit breaker.

pub mod breaker;
pub mod token;

use crate::error::{OciError, OciResult};
use crate::metrics;
use breaker::CircuitBreaker;
use bytes::Bytes;
use reqwest::{Method, StatusCode};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use token::{BearerChallenge, TokenCache, parse_bearer_challenge};
use wharf_core::config::UpstreamConfig;
use wharf_core::digest::Digest;
use wharf_core::manifest;
use wharf_core::registry::UpstreamAuthMode;
use wharf_metadata::models::UpstreamConfigRow;

/// Accept header covering all manifest kinds, sent on manifest fetches.
const MANIFEST_ACCEPT: &str = concat!(
    "application/vnd.docker.distribution.manifest.v2+json, ",
    "application/vnd.oci.image.manifest.v1+json, ",
    "application/vnd.docker.distribution.manifest.list.v2+json, ",
    "application/vnd.oci.image.index.v1+json",
);

/// A manifest fetched from a remote registry.
#[derive(Clone, Debug)]
pub struct RemoteManifest {
    pub payload: Bytes,
    pub media_type: String,
    pub digest: Digest,
}

/// Upstream proxy client. One per process; holds the token cache and the
/// per-upstream circuit breakers.
pub struct UpstreamClient {
    tuning: UpstreamConfig,
    client: reqwest::Client,
    insecure_client: reqwest::Client,
    tokens: TokenCache,
    breakers: Mutex<HashMap<i64, std::sync::Arc<CircuitBreaker>>>,
}

impl UpstreamClient {
    pub fn new(tuning: UpstreamConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client");
        let insecure_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .danger_accept_invalid_certs(true)
            .build()
            .expect("reqwest client");
        let tokens = TokenCache::new(tuning.token_cache_ttl());
        Self {
            tuning,
            client,
            insecure_client,
            tokens,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Tuning parameters (grace period, freshness window).
    pub fn tuning(&self) -> &UpstreamConfig {
        &self.tuning
    }

    fn http(&self, config: &UpstreamConfigRow) -> &reqwest::Client {
        if config.insecure_tls {
            &self.insecure_client
        } else {
            &self.client
        }
    }

    fn breaker(&self, upstream_id: i64) -> std::sync::Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map lock");
        breakers
            .entry(upstream_id)
            .or_insert_with(|| std::sync::Arc::new(CircuitBreaker::new(&self.tuning.circuit)))
            .clone()
    }

    /// Remote path: `<url>/v2/<namespace><image>/<verb>/<reference>`. The
    /// configured namespace is prefixed verbatim; the image is never
    /// rewritten.
    fn remote_url(config: &UpstreamConfigRow, image: &str, verb: &str, reference: &str) -> String {
        let base = config.url.trim_end_matches('/');
        let namespace = config
            .namespace
            .as_deref()
            .map(|ns| format!("{}/", ns.trim_matches('/')))
            .unwrap_or_default();
        format!("{base}/v2/{namespace}{image}/{verb}/{reference}")
    }

    fn pull_scope(config: &UpstreamConfigRow, image: &str) -> String {
        let namespace = config
            .namespace
            .as_deref()
            .map(|ns| format!("{}/", ns.trim_matches('/')))
            .unwrap_or_default();
        format!("repository:{namespace}{image}:pull")
    }

    /// Backoff delay for the given attempt, with +/- jitter derived from
    /// the clock's sub-second noise.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let retry = &self.tuning.retry;
        let base = retry.base_ms as f64 * retry.factor.powi(attempt as i32);
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos();
        let unit = (nanos % 1000) as f64 / 1000.0 * 2.0 - 1.0; // [-1, 1)
        let jittered = base * (1.0 + retry.jitter * unit);
        Duration::from_millis(jittered.max(0.0) as u64)
    }

    async fn attach_auth(
        &self,
        config: &UpstreamConfigRow,
        request: reqwest::RequestBuilder,
        scope: &str,
    ) -> reqwest::RequestBuilder {
        match config.auth_mode() {
            UpstreamAuthMode::Anonymous => request,
            UpstreamAuthMode::Basic => match (&config.username, &config.password) {
                (Some(user), password) => request.basic_auth(user, password.as_deref()),
                _ => request,
            },
            UpstreamAuthMode::Token => match self.tokens.get(config.id, scope) {
                Some(token) => request.bearer_auth(token),
                None => request,
            },
        }
    }

    /// Challenge-driven OAuth2 exchange: GET the realm with service+scope,
    /// optionally under basic credentials, and cache the returned token.
    async fn exchange_token(
        &self,
        config: &UpstreamConfigRow,
        challenge: &BearerChallenge,
        scope: &str,
    ) -> Option<String> {
        #[derive(serde::Deserialize)]
        struct TokenResponse {
            token: Option<String>,
            access_token: Option<String>,
            expires_in: Option<u64>,
        }

        let effective_scope = challenge.scope.as_deref().unwrap_or(scope);
        let mut request = self.http(config).get(&challenge.realm);
        if let Some(service) = &challenge.service {
            request = request.query(&[("service", service.as_str())]);
        }
        request = request.query(&[("scope", effective_scope)]);
        if let (Some(user), password) = (&config.username, &config.password) {
            request = request.basic_auth(user, password.as_deref());
        }

        let response = match request.send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::warn!(status = %r.status(), realm = %challenge.realm, "token exchange failed");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, realm = %challenge.realm, "token exchange failed");
                return None;
            }
        };

        let body: TokenResponse = response.json().await.ok()?;
        let token = body.token.or(body.access_token)?;
        self.tokens
            .put(config.id, scope, token.clone(), body.expires_in);
        Some(token)
    }

    /// One authenticated request, following at most one bearer challenge.
    async fn send_once(
        &self,
        config: &UpstreamConfigRow,
        method: Method,
        url: &str,
        accept: Option<&str>,
        scope: &str,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let build = |client: &reqwest::Client| {
            let mut request = client.request(method.clone(), url);
            if let Some(accept) = accept {
                request = request.header(reqwest::header::ACCEPT, accept);
            }
            request
        };

        let request = self.attach_auth(config, build(self.http(config)), scope).await;
        let response = request.send().await?;

        if response.status() == StatusCode::UNAUTHORIZED
            && config.auth_mode() == UpstreamAuthMode::Token
        {
            let challenge = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_bearer_challenge);
            if let Some(challenge) = challenge
                && let Some(token) = self.exchange_token(config, &challenge, scope).await
            {
                let retried = build(self.http(config)).bearer_auth(token);
                return retried.send().await;
            }
        }

        Ok(response)
    }

    /// Execute with retry, backoff, and the circuit breaker. `Ok(None)`
    /// means a definitive remote 404.
    async fn execute(
        &self,
        config: &UpstreamConfigRow,
        method: Method,
        url: &str,
        accept: Option<&str>,
        scope: &str,
    ) -> OciResult<Option<reqwest::Response>> {
        let breaker = self.breaker(config.id);
        if !breaker.allow() {
            return Err(OciError::bad_gateway("upstream temporarily unavailable"));
        }

        let started = Instant::now();
        let attempts = self.tuning.retry.attempts.max(1);

        for attempt in 0..attempts {
            match self
                .send_once(config, method.clone(), url, accept, scope)
                .await
            {
                Ok(response) if response.status().is_success() => {
                    breaker.record_success();
                    metrics::UPSTREAM_FETCH_DURATION.observe(started.elapsed().as_secs_f64());
                    return Ok(Some(response));
                }
                Ok(response) if response.status() == StatusCode::NOT_FOUND => {
                    // A definitive answer, not an availability failure.
                    breaker.record_success();
                    return Ok(None);
                }
                Ok(response)
                    if response.status() == StatusCode::UNAUTHORIZED
                        || response.status() == StatusCode::FORBIDDEN =>
                {
                    // Credential problems don't improve with retries.
                    tracing::warn!(status = %response.status(), "upstream rejected credentials");
                    return Err(OciError::bad_gateway("upstream authentication failed"));
                }
                Ok(response) => {
                    tracing::warn!(
                        status = %response.status(),
                        attempt,
                        "upstream returned retryable status"
                    );
                    if breaker.record_failure() {
                        metrics::CIRCUIT_OPENED.inc();
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "upstream transport error");
                    if breaker.record_failure() {
                        metrics::CIRCUIT_OPENED.inc();
                    }
                }
            }

            if attempt + 1 < attempts {
                metrics::UPSTREAM_RETRIES.inc();
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        Err(OciError::bad_gateway("upstream retries exhausted"))
    }

    /// Fetch a manifest, buffering at most `max_bytes`. Returns `Ok(None)`
    /// when the remote answers 404.
    pub async fn fetch_manifest(
        &self,
        config: &UpstreamConfigRow,
        image: &str,
        reference: &str,
        max_bytes: u64,
    ) -> OciResult<Option<RemoteManifest>> {
        let url = Self::remote_url(config, image, "manifests", reference);
        let scope = Self::pull_scope(config, image);

        let Some(response) = self
            .execute(config, Method::GET, &url, Some(MANIFEST_ACCEPT), &scope)
            .await?
        else {
            metrics::UPSTREAM_FETCHES
                .with_label_values(&["manifest", "miss"])
                .inc();
            return Ok(None);
        };

        if let Some(length) = response.content_length()
            && length > max_bytes
        {
            return Err(OciError::bad_gateway("upstream manifest exceeds size cap"));
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(manifest::MEDIA_TYPE_DOCKER_MANIFEST)
            .to_string();

        let payload = response
            .bytes()
            .await
            .map_err(|e| OciError::bad_gateway(format!("upstream body read failed: {e}")))?;
        if payload.len() as u64 > max_bytes {
            return Err(OciError::bad_gateway("upstream manifest exceeds size cap"));
        }

        // The remote's digest header is advisory; the canonical identity is
        // recomputed from the payload.
        let digest = Digest::sha256(&payload);

        metrics::UPSTREAM_FETCHES
            .with_label_values(&["manifest", "hit"])
            .inc();
        Ok(Some(RemoteManifest {
            payload,
            media_type,
            digest,
        }))
    }

    /// HEAD a manifest and report the remote digest, for tag freshness
    /// revalidation. `Ok(None)` when missing or when the remote omits the
    /// digest header.
    pub async fn head_manifest(
        &self,
        config: &UpstreamConfigRow,
        image: &str,
        reference: &str,
    ) -> OciResult<Option<Digest>> {
        let url = Self::remote_url(config, image, "manifests", reference);
        let scope = Self::pull_scope(config, image);

        let Some(response) = self
            .execute(config, Method::HEAD, &url, Some(MANIFEST_ACCEPT), &scope)
            .await?
        else {
            return Ok(None);
        };

        Ok(response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| Digest::parse(v).ok()))
    }

    /// Open a streaming blob fetch. Returns `Ok(None)` on remote 404.
    pub async fn fetch_blob(
        &self,
        config: &UpstreamConfigRow,
        image: &str,
        digest: &Digest,
    ) -> OciResult<Option<reqwest::Response>> {
        let url = Self::remote_url(config, image, "blobs", &digest.to_string());
        let scope = Self::pull_scope(config, image);

        let response = self
            .execute(config, Method::GET, &url, None, &scope)
            .await?;
        let outcome = if response.is_some() { "hit" } else { "miss" };
        metrics::UPSTREAM_FETCHES
            .with_label_values(&["blob", outcome])
            .inc();
        Ok(response)
    }
}
