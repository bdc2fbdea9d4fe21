//! Integration tests for the OCI distribution endpoints.

mod common;

use axum::body::Body;
use axum::http::StatusCode;
use common::fixtures::{
    basic_auth, body_json, error_code, oci_index, push_blob, push_image, request, schema2_manifest,
    simple,
};
use common::server::{TEST_PASSWORD, TestServer};
use wharf_core::digest::Digest;
use wharf_core::manifest::{MEDIA_TYPE_DOCKER_MANIFEST, MEDIA_TYPE_OCI_INDEX};

fn auth() -> String {
    basic_auth("pusher", TEST_PASSWORD)
}

#[tokio::test]
async fn version_probe_returns_api_version() {
    let server = TestServer::new().await;
    let (status, headers, _) = simple(&server.router, "GET", "/v2/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers
            .get("docker-distribution-api-version")
            .unwrap()
            .to_str()
            .unwrap(),
        "registry/2.0"
    );
}

#[tokio::test]
async fn version_probe_challenges_when_anonymous_pull_disabled() {
    let server = TestServer::with_config(|config| {
        config.auth.anonymous_pull = false;
    })
    .await;

    let (status, headers, _) = simple(&server.router, "GET", "/v2/").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let challenge = headers.get("www-authenticate").unwrap().to_str().unwrap();
    assert!(challenge.starts_with("Bearer realm="));

    // Authenticated probe passes.
    let (status, _, _) = request(
        &server.router,
        "GET",
        "/v2/",
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn invalid_routes_yield_name_unknown() {
    let server = TestServer::new().await;
    for uri in ["/v2/acme/docker", "/v2/acme/docker/app/unknownverb/x"] {
        let (status, _, body) = simple(&server.router, "GET", uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "uri {uri}");
        assert_eq!(error_code(&body), "NAME_UNKNOWN", "uri {uri}");
    }
}

#[tokio::test]
async fn unknown_root_and_registry_are_404() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;

    let (status, _, body) =
        simple(&server.router, "GET", "/v2/ghost/docker/app/manifests/v1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NAME_UNKNOWN");

    let (status, _, _) = simple(&server.router, "GET", "/v2/acme/ghost/app/manifests/v1").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn root_space_lookup_is_case_insensitive() {
    let server = TestServer::new().await;
    server.seed_registry("Acme", "docker").await;
    push_image(
        &server.router,
        "/v2/acme/docker/app",
        &auth(),
        "v1",
        b"layer-ci",
    )
    .await;

    let (status, _, _) = simple(&server.router, "GET", "/v2/ACME/docker/app/manifests/v1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn push_then_pull_roundtrip() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    // Layer upload through the session flow.
    let layer_data = vec![7u8; 4096];
    let config_data = b"{\"arch\":\"amd64\"}".to_vec();
    let layer_digest = push_blob(&server.router, base, &auth(), &layer_data).await;
    let config_digest = push_blob(&server.router, base, &auth(), &config_data).await;

    let manifest = schema2_manifest(
        (&config_digest, config_data.len()),
        (&layer_digest, layer_data.len()),
    );
    let manifest_digest = Digest::sha256(&manifest);

    let (status, headers, body) = request(
        &server.router,
        "PUT",
        &format!("{base}/manifests/v1"),
        &[
            ("authorization", &auth()),
            ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
        ],
        Body::from(manifest.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body:?}");
    assert_eq!(
        headers.get("docker-content-digest").unwrap().to_str().unwrap(),
        manifest_digest.to_string()
    );

    // GET by tag returns the exact bytes and digest header.
    let (status, headers, body) =
        simple(&server.router, "GET", &format!("{base}/manifests/v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), manifest.as_slice());
    assert_eq!(
        headers.get("docker-content-digest").unwrap().to_str().unwrap(),
        manifest_digest.to_string()
    );
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        MEDIA_TYPE_DOCKER_MANIFEST
    );

    // GET by digest likewise; HEAD carries headers without a body.
    let (status, _, body) = simple(
        &server.router,
        "GET",
        &format!("{base}/manifests/{manifest_digest}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), manifest.as_slice());

    let (status, headers, body) = simple(
        &server.router,
        "HEAD",
        &format!("{base}/manifests/{manifest_digest}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert_eq!(
        headers.get("content-length").unwrap().to_str().unwrap(),
        manifest.len().to_string()
    );

    // Blob bytes round-trip under their digest.
    let (status, _, body) = simple(
        &server.router,
        "GET",
        &format!("{base}/blobs/{layer_digest}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), layer_data.as_slice());

    let (status, headers, _) = simple(
        &server.router,
        "HEAD",
        &format!("{base}/blobs/{layer_digest}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-length").unwrap().to_str().unwrap(),
        layer_data.len().to_string()
    );
}

#[tokio::test]
async fn manifest_put_is_idempotent() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let first = push_image(&server.router, base, &auth(), "v1", b"same-layer").await;
    let second = push_image(&server.router, base, &auth(), "v1", b"same-layer").await;
    // Identical payloads produce the same digest; the digest-unique
    // row constraint is covered by the metadata store tests.
    assert_eq!(first, second);

    let (status, headers, _) =
        simple(&server.router, "GET", &format!("{base}/manifests/v1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("docker-content-digest").unwrap().to_str().unwrap(),
        first.to_string()
    );
}

#[tokio::test]
async fn upload_digest_mismatch_rejected() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let (status, headers, _) = request(
        &server.router,
        "POST",
        &format!("{base}/blobs/uploads"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let location = headers.get("location").unwrap().to_str().unwrap().to_string();

    let (status, _, _) = request(
        &server.router,
        "PATCH",
        &location,
        &[("authorization", &auth())],
        Body::from("actual bytes"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let wrong = Digest::sha256(b"declared bytes");
    let (status, _, body) = request(
        &server.router,
        "PUT",
        &format!("{location}?digest={wrong}"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "DIGEST_INVALID");

    // The blob never became visible.
    let (status, _, _) = simple(&server.router, "HEAD", &format!("{base}/blobs/{wrong}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_status_and_cancel() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let (_, headers, _) = request(
        &server.router,
        "POST",
        &format!("{base}/blobs/uploads"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    let location = headers.get("location").unwrap().to_str().unwrap().to_string();

    let (status, _, _) = request(
        &server.router,
        "PATCH",
        &location,
        &[("authorization", &auth())],
        Body::from("0123456789"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (status, headers, _) = request(
        &server.router,
        "GET",
        &location,
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(headers.get("range").unwrap().to_str().unwrap(), "0-9");

    let (status, _, _) = request(
        &server.router,
        "DELETE",
        &location,
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    // Terminal: further PATCHes are rejected.
    let (status, _, body) = request(
        &server.router,
        "PATCH",
        &location,
        &[("authorization", &auth())],
        Body::from("more"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "BLOB_UPLOAD_INVALID");
}

#[tokio::test]
async fn content_range_must_match_offset() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let (_, headers, _) = request(
        &server.router,
        "POST",
        &format!("{base}/blobs/uploads"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    let location = headers.get("location").unwrap().to_str().unwrap().to_string();

    let (status, _, _) = request(
        &server.router,
        "PATCH",
        &location,
        &[("authorization", &auth()), ("content-range", "0-4")],
        Body::from("01234"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // A stale start offset is a range violation.
    let (status, _, _) = request(
        &server.router,
        "PATCH",
        &location,
        &[("authorization", &auth()), ("content-range", "0-4")],
        Body::from("01234"),
    )
    .await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);

    // The matching offset continues the upload.
    let (status, headers, _) = request(
        &server.router,
        "PATCH",
        &location,
        &[("authorization", &auth()), ("content-range", "5-9")],
        Body::from("56789"),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(headers.get("range").unwrap().to_str().unwrap(), "0-9");
}

#[tokio::test]
async fn cross_mount_reuses_blob_without_session() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;

    let digest = push_blob(&server.router, "/v2/acme/docker/app", &auth(), b"shared-layer").await;

    // Mount into a sibling repository: 201 with a blob Location, no session.
    let (status, headers, _) = request(
        &server.router,
        "POST",
        &format!("/v2/acme/docker/other/blobs/uploads?mount={digest}&from=app"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let location = headers.get("location").unwrap().to_str().unwrap();
    assert!(location.ends_with(&format!("/blobs/{digest}")));
    assert!(headers.get("docker-upload-uuid").is_none());

    let (status, _, body) = simple(
        &server.router,
        "GET",
        &format!("/v2/acme/docker/other/blobs/{digest}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"shared-layer");

    // Mounting an unknown digest falls back to a fresh session.
    let missing = Digest::sha256(b"not-uploaded");
    let (status, headers, _) = request(
        &server.router,
        "POST",
        &format!("/v2/acme/docker/other/blobs/uploads?mount={missing}&from=app"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert!(headers.get("docker-upload-uuid").is_some());
}

#[tokio::test]
async fn manifest_closure_enforced_for_virtual_registries() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    // A manifest referencing absent blobs is rejected.
    let ghost_config = Digest::sha256(b"ghost-config");
    let ghost_layer = Digest::sha256(b"ghost-layer");
    let manifest = schema2_manifest((&ghost_config, 12), (&ghost_layer, 34));

    let (status, _, body) = request(
        &server.router,
        "PUT",
        &format!("{base}/manifests/v1"),
        &[
            ("authorization", &auth()),
            ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
        ],
        Body::from(manifest),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "MANIFEST_BLOB_UNKNOWN");
}

#[tokio::test]
async fn manifest_size_declaration_must_match_blob() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let config_digest = push_blob(&server.router, base, &auth(), b"config").await;
    let layer_digest = push_blob(&server.router, base, &auth(), b"layer-bytes").await;

    // Declared layer size disagrees with the stored blob.
    let manifest = schema2_manifest((&config_digest, 6), (&layer_digest, 9999));
    let (status, _, body) = request(
        &server.router,
        "PUT",
        &format!("{base}/manifests/v1"),
        &[
            ("authorization", &auth()),
            ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
        ],
        Body::from(manifest),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "SIZE_INVALID");
}

#[tokio::test]
async fn garbage_manifest_is_invalid() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;

    let (status, _, body) = request(
        &server.router,
        "PUT",
        "/v2/acme/docker/app/manifests/v1",
        &[("authorization", &auth())],
        Body::from("{\"schemaVersion\": 2}"),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "MANIFEST_INVALID");
}

#[tokio::test]
async fn policy_blocks_denied_artifacts() {
    let server = TestServer::new().await;
    server
        .seed_registry_with_patterns("acme", "docker", &[], &["*:latest"])
        .await;
    let base = "/v2/acme/docker/foo";

    // Blocked tags deny reads and writes regardless of auth.
    let (status, _, body) = request(
        &server.router,
        "GET",
        &format!("{base}/manifests/latest"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), "DENIED");

    let (status, _, _) = request(
        &server.router,
        "PUT",
        &format!("{base}/manifests/latest"),
        &[("authorization", &auth())],
        Body::from("{}"),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // Non-blocked tags proceed to normal resolution (404 here).
    let (status, _, _) = simple(&server.router, "GET", &format!("{base}/manifests/1.0")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn anonymous_push_is_challenged() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;

    let (status, headers, body) = request(
        &server.router,
        "POST",
        "/v2/acme/docker/app/blobs/uploads",
        &[],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "UNAUTHORIZED");
    assert!(headers.get("www-authenticate").is_some());
}

#[tokio::test]
async fn concurrent_tag_writes_settle_on_one_winner() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    // Two distinct manifests over the same blobs.
    let config_data = b"{\"arch\":\"amd64\"}".to_vec();
    let config_digest = push_blob(&server.router, base, &auth(), &config_data).await;
    let layer_one = push_blob(&server.router, base, &auth(), b"layer-one").await;
    let layer_two = push_blob(&server.router, base, &auth(), b"layer-two").await;

    let manifest_one = schema2_manifest((&config_digest, config_data.len()), (&layer_one, 9));
    let manifest_two = schema2_manifest((&config_digest, config_data.len()), (&layer_two, 9));
    let digest_one = Digest::sha256(&manifest_one);
    let digest_two = Digest::sha256(&manifest_two);

    // Racing PUTs under one tag.
    let put_one_url = format!("{base}/manifests/v2");
    let put_one_auth = auth();
    let put_one_headers = [
        ("authorization", &put_one_auth[..]),
        ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
    ];
    let put_one = request(
        &server.router,
        "PUT",
        &put_one_url,
        &put_one_headers,
        Body::from(manifest_one.clone()),
    );
    let put_two_url = format!("{base}/manifests/v2");
    let put_two_auth = auth();
    let put_two_headers = [
        ("authorization", &put_two_auth[..]),
        ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
    ];
    let put_two = request(
        &server.router,
        "PUT",
        &put_two_url,
        &put_two_headers,
        Body::from(manifest_two.clone()),
    );
    let ((status_one, headers_one, _), (status_two, headers_two, _)) =
        tokio::join!(put_one, put_two);

    // Both writers succeed and see their own digest.
    assert_eq!(status_one, StatusCode::CREATED);
    assert_eq!(status_two, StatusCode::CREATED);
    assert_eq!(
        headers_one.get("docker-content-digest").unwrap().to_str().unwrap(),
        digest_one.to_string()
    );
    assert_eq!(
        headers_two.get("docker-content-digest").unwrap().to_str().unwrap(),
        digest_two.to_string()
    );

    // The tag settled on exactly one of them; both manifests exist.
    let (status, headers, _) =
        simple(&server.router, "GET", &format!("{base}/manifests/v2")).await;
    assert_eq!(status, StatusCode::OK);
    let winner = headers.get("docker-content-digest").unwrap().to_str().unwrap();
    assert!(winner == digest_one.to_string() || winner == digest_two.to_string());

    for digest in [&digest_one, &digest_two] {
        let (status, _, _) =
            simple(&server.router, "GET", &format!("{base}/manifests/{digest}")).await;
        assert_eq!(status, StatusCode::OK);
    }
}

#[tokio::test]
async fn tags_list_paginates_with_link_header() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    for tag in ["a1", "b2", "c3", "d4"] {
        push_image(&server.router, base, &auth(), tag, b"shared-layer").await;
    }

    let (status, headers, body) =
        simple(&server.router, "GET", &format!("{base}/tags/list?n=2")).await;
    assert_eq!(status, StatusCode::OK);
    let json = body_json(&body);
    assert_eq!(json["name"], "app");
    assert_eq!(json["tags"], serde_json::json!(["a1", "b2"]));
    let link = headers.get("link").unwrap().to_str().unwrap();
    assert!(link.contains("n=2&last=b2"));
    assert!(link.ends_with("rel=\"next\""));

    let (status, headers, body) = simple(
        &server.router,
        "GET",
        &format!("{base}/tags/list?n=2&last=b2"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body)["tags"], serde_json::json!(["c3", "d4"]));
    // Full page again: a Link is still emitted; the next page is empty.
    assert!(headers.get("link").is_some());

    let (status, _, body) = simple(
        &server.router,
        "GET",
        &format!("{base}/tags/list?n=2&last=d4"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body)["tags"], serde_json::json!([]));
}

#[tokio::test]
async fn tags_list_unknown_repository_is_404() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let (status, _, body) =
        simple(&server.router, "GET", "/v2/acme/docker/ghost/tags/list").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "NAME_UNKNOWN");
}

#[tokio::test]
async fn manifest_list_selects_child_by_platform() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/multi";

    let amd64_digest = push_image(&server.router, base, &auth(), "amd64-build", b"amd64").await;
    let arm64_digest = push_image(&server.router, base, &auth(), "arm64-build", b"arm64").await;

    // Child payload sizes for the index descriptors.
    let (_, amd64_headers, _) =
        simple(&server.router, "HEAD", &format!("{base}/manifests/{amd64_digest}")).await;
    let amd64_size: usize = amd64_headers
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    let (_, arm64_headers, _) =
        simple(&server.router, "HEAD", &format!("{base}/manifests/{arm64_digest}")).await;
    let arm64_size: usize = arm64_headers
        .get("content-length")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();

    let index = oci_index(&[
        (&amd64_digest, amd64_size, "linux", "amd64"),
        (&arm64_digest, arm64_size, "linux", "arm64"),
    ]);
    let (status, _, body) = request(
        &server.router,
        "PUT",
        &format!("{base}/manifests/multi"),
        &[
            ("authorization", &auth()),
            ("content-type", MEDIA_TYPE_OCI_INDEX),
        ],
        Body::from(index.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body:?}");

    // A non-list Accept plus an arm64 User-Agent returns the
    // arm64 child.
    let (status, headers, _) = request(
        &server.router,
        "GET",
        &format!("{base}/manifests/multi"),
        &[
            ("accept", MEDIA_TYPE_DOCKER_MANIFEST),
            ("user-agent", "docker/24.0.5 os/linux arch/arm64"),
        ],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("docker-content-digest").unwrap().to_str().unwrap(),
        arm64_digest.to_string()
    );

    // A list-accepting client gets the index itself.
    let (status, headers, body) = request(
        &server.router,
        "GET",
        &format!("{base}/manifests/multi"),
        &[("accept", MEDIA_TYPE_OCI_INDEX)],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), index.as_slice());
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        MEDIA_TYPE_OCI_INDEX
    );

    // An unmatched platform falls back to the list.
    let (status, headers, _) = request(
        &server.router,
        "GET",
        &format!("{base}/manifests/multi"),
        &[
            ("accept", MEDIA_TYPE_DOCKER_MANIFEST),
            ("user-agent", "docker/24.0.5 os/windows arch/s390x"),
        ],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        MEDIA_TYPE_OCI_INDEX
    );
}

#[tokio::test]
async fn index_with_missing_children_fails_on_virtual() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;

    let ghost = Digest::sha256(b"never-pushed");
    let index = oci_index(&[(&ghost, 42, "linux", "amd64")]);
    let (status, _, body) = request(
        &server.router,
        "PUT",
        "/v2/acme/docker/multi/manifests/broken",
        &[
            ("authorization", &auth()),
            ("content-type", MEDIA_TYPE_OCI_INDEX),
        ],
        Body::from(index),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(error_code(&body), "MANIFEST_BLOB_UNKNOWN");
}

#[tokio::test]
async fn referrers_lists_subject_manifests() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let subject_digest = push_image(&server.router, base, &auth(), "v1", b"subject-layer").await;

    // An SBOM-style referrer pointing at the subject.
    let config_digest = push_blob(&server.router, base, &auth(), b"{}").await;
    let referrer = serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": "application/vnd.oci.image.manifest.v1+json",
        "artifactType": "application/vnd.example.sbom",
        "config": {
            "mediaType": "application/vnd.oci.image.config.v1+json",
            "digest": config_digest.to_string(),
            "size": 2,
        },
        "layers": [],
        "subject": {
            "mediaType": MEDIA_TYPE_DOCKER_MANIFEST,
            "digest": subject_digest.to_string(),
            "size": 1,
        },
    }))
    .unwrap();
    let referrer_digest = Digest::sha256(&referrer);

    let (status, headers, body) = request(
        &server.router,
        "PUT",
        &format!("{base}/manifests/{referrer_digest}"),
        &[
            ("authorization", &auth()),
            ("content-type", "application/vnd.oci.image.manifest.v1+json"),
        ],
        Body::from(referrer),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body:?}");
    assert_eq!(
        headers.get("oci-subject").unwrap().to_str().unwrap(),
        subject_digest.to_string()
    );

    let (status, headers, body) = simple(
        &server.router,
        "GET",
        &format!("{base}/referrers/{subject_digest}"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("content-type").unwrap().to_str().unwrap(),
        MEDIA_TYPE_OCI_INDEX
    );
    let json = body_json(&body);
    assert_eq!(json["manifests"].as_array().unwrap().len(), 1);
    assert_eq!(json["manifests"][0]["digest"], referrer_digest.to_string());
    assert_eq!(
        json["manifests"][0]["artifactType"],
        "application/vnd.example.sbom"
    );

    // artifactType filter: no match yields an empty, filtered index.
    let (status, headers, body) = simple(
        &server.router,
        "GET",
        &format!("{base}/referrers/{subject_digest}?artifactType=application/vnd.other"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get("oci-filters-applied").unwrap().to_str().unwrap(),
        "artifactType"
    );
    assert_eq!(body_json(&body)["manifests"].as_array().unwrap().len(), 0);

    // Unknown subject digests still answer with an empty index.
    let ghost = Digest::sha256(b"ghost");
    let (status, _, body) =
        simple(&server.router, "GET", &format!("{base}/referrers/{ghost}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body_json(&body)["manifests"].as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn blob_delete_removes_reference_only() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let digest = push_blob(&server.router, "/v2/acme/docker/app", &auth(), b"to-delete").await;

    let (status, _, _) = request(
        &server.router,
        "DELETE",
        &format!("/v2/acme/docker/app/blobs/{digest}"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // The registry reference is gone...
    let (status, _, _) = request(
        &server.router,
        "DELETE",
        &format!("/v2/acme/docker/app/blobs/{digest}"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // ...but the CAS object is retained for other tenants' registries.
    let root = server
        .state
        .metadata
        .find_root_space("acme")
        .await
        .unwrap()
        .unwrap();
    assert!(
        server
            .state
            .cas
            .exists(&root.identifier, &digest)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn manifest_delete_by_digest_and_tag() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let base = "/v2/acme/docker/app";

    let digest = push_image(&server.router, base, &auth(), "v1", b"layer-a").await;
    push_image(&server.router, base, &auth(), "v2", b"layer-a").await;

    // Tag delete leaves the manifest reachable by digest.
    let (status, _, _) = request(
        &server.router,
        "DELETE",
        &format!("{base}/manifests/v2"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _, _) = simple(&server.router, "GET", &format!("{base}/manifests/v2")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) =
        simple(&server.router, "GET", &format!("{base}/manifests/{digest}")).await;
    assert_eq!(status, StatusCode::OK);

    // Digest delete removes the manifest and its tags.
    let (status, _, _) = request(
        &server.router,
        "DELETE",
        &format!("{base}/manifests/{digest}"),
        &[("authorization", &auth())],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let (status, _, _) =
        simple(&server.router, "GET", &format!("{base}/manifests/{digest}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = simple(&server.router, "GET", &format!("{base}/manifests/v1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn blob_range_requests_serve_partial_content() {
    let server = TestServer::new().await;
    server.seed_registry("acme", "docker").await;
    let digest = push_blob(&server.router, "/v2/acme/docker/app", &auth(), b"0123456789").await;

    let (status, headers, body) = request(
        &server.router,
        "GET",
        &format!("/v2/acme/docker/app/blobs/{digest}"),
        &[("range", "bytes=2-5")],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(body.as_ref(), b"2345");
    assert_eq!(
        headers.get("content-range").unwrap().to_str().unwrap(),
        "bytes 2-5/10"
    );

    let (status, _, _) = request(
        &server.router,
        "GET",
        &format!("/v2/acme/docker/app/blobs/{digest}"),
        &[("range", "bytes=50-60")],
        Body::empty(),
    )
    .await;
    assert_eq!(status, StatusCode::RANGE_NOT_SATISFIABLE);
}

#[tokio::test]
async fn oversized_manifest_is_rejected() {
    let server = TestServer::with_config(|config| {
        config.oci.max_manifest_payload_bytes = 256;
    })
    .await;
    server.seed_registry("acme", "docker").await;

    let huge = format!(
        "{{\"schemaVersion\":2,\"mediaType\":\"{MEDIA_TYPE_DOCKER_MANIFEST}\",\"padding\":\"{}\"}}",
        "x".repeat(512)
    );
    let (status, _, body) = request(
        &server.router,
        "PUT",
        "/v2/acme/docker/app/manifests/v1",
        &[
            ("authorization", &auth()),
            ("content-type", MEDIA_TYPE_DOCKER_MANIFEST),
        ],
        Body::from(huge),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(error_code(&body), "MANIFEST_PAYLOAD_EXCEEDS_LIMIT");
}
