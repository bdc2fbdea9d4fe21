//! Referrers API: GET `/{image}/referrers/{digest}?artifactType=`.
//!
//! Returns an OCI image index listing all stored manifests whose `subject`
//! points at the requested digest. Signatures are not validated here;
//! referrers are stored and listed as-is.

use crate::access;
use crate::auth::{Action, AuthSession};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::oci::RouteInfo;
use crate::state::AppState;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;
use std::collections::HashMap;
use wharf_core::manifest::MEDIA_TYPE_OCI_INDEX;

pub async fn list(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
    params: &HashMap<String, String>,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::View, &parts.headers).await?;

    let digest = route.digest.as_ref().ok_or_else(|| {
        OciError::new(
            ErrorCode::DigestInvalid,
            format!("malformed digest: {}", route.reference),
        )
    })?;

    // An unknown repository still answers with an empty index, per the
    // referrers API.
    let referrers = match state
        .metadata
        .find_image(ctx.registry.id, &route.image)
        .await?
    {
        Some(image) => {
            state
                .metadata
                .find_referrers(ctx.registry.id, image.id, &digest.to_string())
                .await?
        }
        None => Vec::new(),
    };

    let artifact_type_filter = params.get("artifactType");
    let filtered = artifact_type_filter.is_some();
    let descriptors: Vec<serde_json::Value> = referrers
        .iter()
        .filter(|row| match artifact_type_filter {
            Some(wanted) => row.artifact_type.as_deref() == Some(wanted.as_str()),
            None => true,
        })
        .map(|row| {
            let mut descriptor = json!({
                "mediaType": row.media_type,
                "digest": row.digest,
                "size": row.payload.len(),
            });
            if let Some(artifact_type) = &row.artifact_type {
                descriptor["artifactType"] = json!(artifact_type);
            }
            descriptor
        })
        .collect();

    let index = json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_OCI_INDEX,
        "manifests": descriptors,
    });

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        MEDIA_TYPE_OCI_INDEX.parse().expect("static media type"),
    );
    if filtered {
        headers.insert(
            "oci-filters-applied",
            "artifactType".parse().expect("static header"),
        );
    }
    Ok((StatusCode::OK, headers, index.to_string()).into_response())
}
