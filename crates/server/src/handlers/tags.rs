//! Tag listing: GET `/{image}/tags/list?n=&last=`.

use crate::access;
use crate::auth::{Action, AuthSession};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::oci::RouteInfo;
use crate::state::AppState;
use axum::Json;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::collections::HashMap;

/// Cap on a single page regardless of the requested `n`.
const MAX_PAGE: i64 = 1000;

#[derive(Serialize)]
struct TagList {
    name: String,
    tags: Vec<String>,
}

pub async fn list(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    parts: &Parts,
    params: &HashMap<String, String>,
) -> OciResult<Response> {
    let ctx = access::resolve(state, route, session, Action::View, &parts.headers).await?;

    let image = state
        .metadata
        .find_image(ctx.registry.id, &route.image)
        .await?
        .ok_or_else(|| {
            OciError::new(
                ErrorCode::NameUnknown,
                format!("repository {} unknown", route.image),
            )
        })?;

    let n: Option<i64> = match params.get("n") {
        Some(raw) => Some(raw.parse().map_err(|_| {
            OciError::new(ErrorCode::Unsupported, "malformed pagination parameter n")
        })?),
        None => None,
    };
    let limit = n.unwrap_or(MAX_PAGE).clamp(0, MAX_PAGE);
    let last = params.get("last").map(String::as_str);

    let tags = state
        .metadata
        .list_tags(ctx.registry.id, image.id, limit, last)
        .await?;

    let mut headers = HeaderMap::new();
    // RFC 5988 Link header drives pagination: present only when the page
    // is full, i.e. more results may exist.
    if !tags.is_empty() && tags.len() as i64 == limit {
        let next = ctx.urls.tags_url(
            &route.root,
            &route.registry,
            &route.image,
            limit,
            tags.last().expect("non-empty page"),
        );
        headers.insert(
            header::LINK,
            format!("<{next}>; rel=\"next\"").parse().expect("link header"),
        );
    }

    let body = TagList {
        name: route.image.clone(),
        tags,
    };
    Ok((StatusCode::OK, headers, Json(body)).into_response())
}
