//! Request helpers and payload builders.

use axum::Router;
use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use base64::Engine;
use serde_json::{Value, json};
use tower::ServiceExt;
use wharf_core::digest::Digest;
use wharf_core::manifest::{
    MEDIA_TYPE_DOCKER_CONFIG, MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_INDEX,
};

/// One-shot request against the router, returning status, headers, body.
#[allow(dead_code)]
pub async fn request(
    router: &Router,
    method: &str,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let response = router
        .clone()
        .oneshot(builder.body(body.into()).expect("request build"))
        .await
        .expect("request send");

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body read");
    (status, headers, body)
}

/// Request with no headers and no body.
#[allow(dead_code)]
pub async fn simple(router: &Router, method: &str, uri: &str) -> (StatusCode, HeaderMap, Bytes) {
    request(router, method, uri, &[], Body::empty()).await
}

/// Parse a response body as JSON.
#[allow(dead_code)]
pub fn body_json(body: &Bytes) -> Value {
    serde_json::from_slice(body).expect("json body")
}

/// First error code in a v2 error envelope.
#[allow(dead_code)]
pub fn error_code(body: &Bytes) -> String {
    body_json(body)["errors"][0]["code"]
        .as_str()
        .expect("error code")
        .to_string()
}

/// `Authorization: Basic` header value for the given credentials.
#[allow(dead_code)]
pub fn basic_auth(user: &str, password: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"))
    )
}

/// Upload a blob through the full POST/PATCH/PUT session flow. Returns the
/// digest.
#[allow(dead_code)]
pub async fn push_blob(router: &Router, base: &str, auth: &str, data: &[u8]) -> Digest {
    let digest = Digest::sha256(data);

    let (status, headers, body) = request(
        router,
        "POST",
        &format!("{base}/blobs/uploads"),
        &[("authorization", auth)],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "upload open failed: {body:?}");
    let location = headers
        .get("location")
        .expect("upload location")
        .to_str()
        .expect("location utf8")
        .to_string();

    let (status, _, body) = request(
        router,
        "PATCH",
        &location,
        &[("authorization", auth)],
        Body::from(data.to_vec()),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED, "upload patch failed: {body:?}");

    let separator = if location.contains('?') { '&' } else { '?' };
    let (status, _, body) = request(
        router,
        "PUT",
        &format!("{location}{separator}digest={digest}"),
        &[("authorization", auth)],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "upload close failed: {body:?}");

    digest
}

/// Schema2 manifest payload over a config and one layer.
#[allow(dead_code)]
pub fn schema2_manifest(config: (&Digest, usize), layer: (&Digest, usize)) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_DOCKER_MANIFEST,
        "config": {
            "mediaType": MEDIA_TYPE_DOCKER_CONFIG,
            "digest": config.0.to_string(),
            "size": config.1,
        },
        "layers": [{
            "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
            "digest": layer.0.to_string(),
            "size": layer.1,
        }],
    }))
    .expect("manifest json")
}

/// OCI index payload over platform children.
#[allow(dead_code)]
pub fn oci_index(children: &[(&Digest, usize, &str, &str)]) -> Vec<u8> {
    let manifests: Vec<Value> = children
        .iter()
        .map(|(digest, size, os, arch)| {
            json!({
                "mediaType": "application/vnd.oci.image.manifest.v1+json",
                "digest": digest.to_string(),
                "size": size,
                "platform": { "os": os, "architecture": arch },
            })
        })
        .collect();
    serde_json::to_vec(&json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_INDEX,
        "manifests": manifests,
    }))
    .expect("index json")
}

/// Push a config + layer + schema2 manifest under `reference`. Returns the
/// manifest digest.
#[allow(dead_code)]
pub async fn push_image(
    router: &Router,
    base: &str,
    auth: &str,
    reference: &str,
    layer_data: &[u8],
) -> Digest {
    let config_data = format!("{{\"arch\":\"amd64\",\"len\":{}}}", layer_data.len());
    let config_digest = push_blob(router, base, auth, config_data.as_bytes()).await;
    let layer_digest = push_blob(router, base, auth, layer_data).await;

    let manifest = schema2_manifest(
        (&config_digest, config_data.len()),
        (&layer_digest, layer_data.len()),
    );
    let digest = Digest::sha256(&manifest);

    let (status, _, body) = request(
        router,
        "PUT",
        &format!("{base}/manifests/{reference}"),
        &[
            ("authorization", auth),
            ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
        ],
        Body::from(manifest),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "manifest put failed: {body:?}");
    digest
}
