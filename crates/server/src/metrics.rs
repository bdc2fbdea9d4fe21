//! Prometheus metrics for the wharf server.
//!
//! The `/metrics` endpoint is unauthenticated for scraping; restrict it at
//! the network level in production deployments.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

pub static MANIFESTS_PUSHED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_manifests_pushed_total", "Manifests accepted via PUT")
        .expect("metric creation failed")
});

pub static MANIFESTS_PULLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_manifests_pulled_total", "Manifests served via GET")
        .expect("metric creation failed")
});

pub static BLOBS_PULLED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_blobs_pulled_total", "Blobs served via GET")
        .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_CREATED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_upload_sessions_created_total",
        "Upload sessions opened",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_COMMITTED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_upload_sessions_committed_total",
        "Upload sessions committed with a verified digest",
    )
    .expect("metric creation failed")
});

pub static UPLOAD_SESSIONS_EXPIRED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_upload_sessions_expired_total",
        "Upload sessions expired by the sweeper",
    )
    .expect("metric creation failed")
});

pub static CROSS_MOUNTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_blob_cross_mounts_total",
        "Blob uploads satisfied by cross-repository mounts",
    )
    .expect("metric creation failed")
});

pub static DIGEST_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_digest_mismatches_total",
        "Upload commits rejected for digest mismatch",
    )
    .expect("metric creation failed")
});

pub static UPSTREAM_FETCHES: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("wharf_upstream_fetches_total", "Upstream fetch outcomes"),
        &["kind", "outcome"],
    )
    .expect("metric creation failed")
});

pub static UPSTREAM_RETRIES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("wharf_upstream_retries_total", "Upstream fetch retries")
        .expect("metric creation failed")
});

pub static UPSTREAM_CACHE_HITS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_upstream_cache_hits_total",
        "Upstream requests served from the local cache",
    )
    .expect("metric creation failed")
});

pub static CIRCUIT_OPENED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_upstream_circuit_opened_total",
        "Circuit breaker open transitions",
    )
    .expect("metric creation failed")
});

/// Children silently skipped while persisting upstream manifest lists.
/// Operators watch this to detect upstream drift.
pub static MANIFEST_LIST_MISSING_CHILDREN: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "wharf_manifest_list_missing_children_total",
        "Unresolvable children tolerated in upstream manifest lists",
    )
    .expect("metric creation failed")
});

pub static UPSTREAM_FETCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "wharf_upstream_fetch_duration_seconds",
            "Wall time of upstream fetches including retries",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

/// Register all metrics with the global registry. Idempotent.
pub fn register_metrics() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let registry = &*REGISTRY;
        registry
            .register(Box::new(MANIFESTS_PUSHED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(MANIFESTS_PULLED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(BLOBS_PULLED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPLOAD_SESSIONS_CREATED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPLOAD_SESSIONS_COMMITTED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPLOAD_SESSIONS_EXPIRED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(CROSS_MOUNTS.clone()))
            .expect("register failed");
        registry
            .register(Box::new(DIGEST_MISMATCHES.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPSTREAM_FETCHES.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPSTREAM_RETRIES.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPSTREAM_CACHE_HITS.clone()))
            .expect("register failed");
        registry
            .register(Box::new(CIRCUIT_OPENED.clone()))
            .expect("register failed");
        registry
            .register(Box::new(MANIFEST_LIST_MISSING_CHILDREN.clone()))
            .expect("register failed");
        registry
            .register(Box::new(UPSTREAM_FETCH_DURATION.clone()))
            .expect("register failed");
    });
}

/// GET /metrics handler.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buffer) {
        tracing::error!(error = %e, "failed to encode metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (
        StatusCode::OK,
        String::from_utf8_lossy(&buffer).into_owned(),
    )
}
