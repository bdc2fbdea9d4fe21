//! Admin/metadata API under `/api/v1`.
//!
//! Space and registry management plus per-image download counters. The OCI
//! data plane never depends on these endpoints; they are the control plane
//! the UI and CLI talk to.

use crate::auth::{Action, AuthDecision, AuthSession, challenge};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use wharf_core::registry::{PackageType, RegistryType, UpstreamAuthMode};
use wharf_core::reference::validate_space_identifier;
use wharf_metadata::models::{NewRegistry, NewUpstreamConfig, RegistryRow, SpaceRow};

fn authorize(
    state: &AppState,
    session: &AuthSession,
    space_path: &str,
    action: Action,
) -> OciResult<()> {
    match state.authorizer.check(session, space_path, action) {
        AuthDecision::Allow => Ok(()),
        AuthDecision::Unauthorized => Err(OciError::new(
            ErrorCode::Unauthorized,
            "authentication required",
        )
        .with_challenge(challenge(&state.config.server.realm))),
        AuthDecision::Denied => Err(OciError::new(ErrorCode::Denied, "access denied")),
    }
}

fn session_from_parts(state: &AppState, parts: &Parts) -> OciResult<AuthSession> {
    crate::auth::session_from_headers(
        &parts.headers,
        &state.config.auth,
        &state.config.server.realm,
    )
}

// =============================================================================
// Spaces
// =============================================================================

#[derive(Deserialize)]
pub struct CreateSpaceRequest {
    pub identifier: String,
    /// Slash-separated parent path; absent for a new tenant root.
    #[serde(default)]
    pub parent_path: Option<String>,
}

#[derive(Serialize)]
pub struct SpaceResponse {
    pub id: i64,
    pub identifier: String,
    pub path: String,
}

/// Walk a slash-separated path down from a root space.
async fn resolve_space_path(state: &AppState, path: &str) -> OciResult<SpaceRow> {
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    let root_identifier = segments.next().ok_or_else(|| {
        OciError::new(ErrorCode::NameInvalid, "empty space path")
    })?;
    let mut current = state
        .metadata
        .find_root_space(root_identifier)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::RootUnknown, format!("root {root_identifier} not found"))
        })?;
    for segment in segments {
        current = state
            .metadata
            .find_child_space(current.id, segment)
            .await?
            .ok_or_else(|| {
                OciError::new(ErrorCode::NameUnknown, format!("space {segment} not found"))
            })?;
    }
    Ok(current)
}

pub async fn create_space(
    State(state): State<AppState>,
    parts: Parts,
    Json(request): Json<CreateSpaceRequest>,
) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    validate_space_identifier(&request.identifier)
        .map_err(|_| OciError::new(ErrorCode::NameInvalid, "invalid space identifier"))?;

    let parent = match &request.parent_path {
        Some(path) => Some(resolve_space_path(&state, path).await?),
        None => None,
    };
    let scope = request.parent_path.as_deref().unwrap_or(&request.identifier);
    authorize(&state, &session, scope, Action::Upload)?;

    let space = state
        .metadata
        .create_space(parent.map(|p| p.id), &request.identifier)
        .await
        .map_err(|e| match e {
            wharf_metadata::MetadataError::AlreadyExists(_) => OciError::new(
                ErrorCode::NameInvalid,
                format!("space {} already exists", request.identifier),
            ),
            other => other.into(),
        })?;
    let path = state.metadata.space_path(space.id).await?;

    tracing::info!(space = %path, "space created");
    Ok((
        StatusCode::CREATED,
        Json(SpaceResponse {
            id: space.id,
            identifier: space.identifier,
            path,
        }),
    )
        .into_response())
}

pub async fn list_spaces(State(state): State<AppState>, parts: Parts) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    authorize(&state, &session, "", Action::View)?;

    let roots = state.metadata.list_root_spaces().await?;
    let body: Vec<SpaceResponse> = roots
        .into_iter()
        .map(|space| SpaceResponse {
            id: space.id,
            path: space.identifier.clone(),
            identifier: space.identifier,
        })
        .collect();
    Ok(Json(body).into_response())
}

// =============================================================================
// Registries
// =============================================================================

#[derive(Deserialize)]
pub struct UpstreamRequest {
    pub url: String,
    #[serde(default = "default_auth_mode")]
    pub auth_mode: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub insecure_tls: bool,
}

fn default_auth_mode() -> String {
    "anonymous".to_string()
}

#[derive(Deserialize)]
pub struct CreateRegistryRequest {
    /// Slash-separated space path, first segment is the tenant root.
    pub space_path: String,
    pub name: String,
    #[serde(default = "default_registry_type")]
    pub registry_type: String,
    #[serde(default = "default_package_type")]
    pub package_type: String,
    #[serde(default)]
    pub allowed_patterns: Vec<String>,
    #[serde(default)]
    pub blocked_patterns: Vec<String>,
    #[serde(default)]
    pub upstream: Option<UpstreamRequest>,
}

fn default_registry_type() -> String {
    "virtual".to_string()
}

fn default_package_type() -> String {
    "docker".to_string()
}

#[derive(Serialize)]
pub struct RegistryResponse {
    pub id: i64,
    pub name: String,
    pub registry_type: String,
    pub package_type: String,
    pub allowed_patterns: Vec<String>,
    pub blocked_patterns: Vec<String>,
    pub upstream_url: Option<String>,
}

impl RegistryResponse {
    fn from_row(row: &RegistryRow, upstream_url: Option<String>) -> Self {
        Self {
            id: row.id,
            name: row.name.clone(),
            registry_type: row.registry_type.clone(),
            package_type: row.package_type.clone(),
            allowed_patterns: row.allowed(),
            blocked_patterns: row.blocked(),
            upstream_url,
        }
    }
}

pub async fn create_registry(
    State(state): State<AppState>,
    parts: Parts,
    Json(request): Json<CreateRegistryRequest>,
) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    authorize(&state, &session, &request.space_path, Action::Upload)?;

    validate_space_identifier(&request.name)
        .map_err(|_| OciError::new(ErrorCode::NameInvalid, "invalid registry name"))?;
    let registry_type = RegistryType::from_str(&request.registry_type)
        .map_err(|_| OciError::new(ErrorCode::Unsupported, "unknown registry type"))?;
    let package_type = PackageType::from_str(&request.package_type)
        .map_err(|_| OciError::new(ErrorCode::Unsupported, "unknown package type"))?;

    let space = resolve_space_path(&state, &request.space_path).await?;
    let root_identifier = request
        .space_path
        .split('/')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OciError::new(ErrorCode::NameInvalid, "empty space path"))?;
    let root = state
        .metadata
        .find_root_space(root_identifier)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::RootUnknown, format!("root {root_identifier} not found"))
        })?;

    let upstream_config_id = match (&registry_type, &request.upstream) {
        (RegistryType::Upstream, Some(upstream)) => {
            let auth_mode = UpstreamAuthMode::from_str(&upstream.auth_mode)
                .map_err(|_| OciError::new(ErrorCode::Unsupported, "unknown auth mode"))?;
            let config = state
                .metadata
                .create_upstream_config(&NewUpstreamConfig {
                    url: upstream.url.clone(),
                    auth_mode,
                    namespace: upstream.namespace.clone(),
                    username: upstream.username.clone(),
                    password: upstream.password.clone(),
                    insecure_tls: upstream.insecure_tls,
                })
                .await?;
            Some(config.id)
        }
        (RegistryType::Upstream, None) => {
            return Err(OciError::new(
                ErrorCode::Unsupported,
                "upstream registries require an upstream block",
            ));
        }
        (RegistryType::Virtual, _) => None,
    };

    let registry = state
        .metadata
        .create_registry(&NewRegistry {
            space_id: space.id,
            root_space_id: root.id,
            name: request.name.clone(),
            registry_type,
            package_type,
            allowed_patterns: request.allowed_patterns.clone(),
            blocked_patterns: request.blocked_patterns.clone(),
            upstream_config_id,
        })
        .await
        .map_err(|e| match e {
            wharf_metadata::MetadataError::AlreadyExists(_) => OciError::new(
                ErrorCode::NameInvalid,
                format!("registry {} already exists", request.name),
            ),
            other => other.into(),
        })?;

    tracing::info!(
        registry = %registry.name,
        space = %request.space_path,
        registry_type = %registry.registry_type,
        "registry created"
    );
    Ok((
        StatusCode::CREATED,
        Json(RegistryResponse::from_row(
            &registry,
            request.upstream.map(|u| u.url),
        )),
    )
        .into_response())
}

async fn lookup_registry(
    state: &AppState,
    root: &str,
    name: &str,
) -> OciResult<(SpaceRow, RegistryRow)> {
    let root_space = state.metadata.find_root_space(root).await?.ok_or_else(|| {
        OciError::new(ErrorCode::RootUnknown, format!("root {root} not found"))
    })?;
    let registry = state
        .metadata
        .find_registry(root_space.id, name)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::NameUnknown, format!("registry {name} not found"))
        })?;
    Ok((root_space, registry))
}

pub async fn get_registry(
    State(state): State<AppState>,
    Path((root, name)): Path<(String, String)>,
    parts: Parts,
) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    let (_root_space, registry) = lookup_registry(&state, &root, &name).await?;
    let space_path = state.metadata.space_path(registry.space_id).await?;
    authorize(&state, &session, &space_path, Action::View)?;

    let upstream_url = match registry.upstream_config_id {
        Some(id) => state
            .metadata
            .get_upstream_config(id)
            .await?
            .map(|c| c.url),
        None => None,
    };
    Ok(Json(RegistryResponse::from_row(&registry, upstream_url)).into_response())
}

pub async fn list_registries(
    State(state): State<AppState>,
    Path(root): Path<String>,
    parts: Parts,
) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    let root_space = state.metadata.find_root_space(&root).await?.ok_or_else(|| {
        OciError::new(ErrorCode::RootUnknown, format!("root {root} not found"))
    })?;
    authorize(&state, &session, &root_space.identifier, Action::View)?;

    let registries = state.metadata.list_registries(root_space.id).await?;
    let body: Vec<RegistryResponse> = registries
        .iter()
        .map(|row| RegistryResponse::from_row(row, None))
        .collect();
    Ok(Json(body).into_response())
}

/// Delete a registry: tags, manifests, and images cascade; shared blob rows
/// and CAS objects stay for the tenant's other registries.
pub async fn delete_registry(
    State(state): State<AppState>,
    Path((root, name)): Path<(String, String)>,
    parts: Parts,
) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    let (_root_space, registry) = lookup_registry(&state, &root, &name).await?;
    let space_path = state.metadata.space_path(registry.space_id).await?;
    authorize(&state, &session, &space_path, Action::Delete)?;

    state.metadata.delete_registry(registry.id).await?;
    tracing::info!(registry = %name, root = %root, "registry deleted");
    Ok(StatusCode::NO_CONTENT.into_response())
}

// =============================================================================
// Download stats
// =============================================================================

#[derive(Deserialize)]
pub struct StatsQuery {
    pub image: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub image: String,
    pub total: i64,
    pub manifests: i64,
    pub blobs: i64,
}

pub async fn image_stats(
    State(state): State<AppState>,
    Path((root, name)): Path<(String, String)>,
    Query(query): Query<StatsQuery>,
    parts: Parts,
) -> OciResult<Response> {
    let session = session_from_parts(&state, &parts)?;
    let (_root_space, registry) = lookup_registry(&state, &root, &name).await?;
    let space_path = state.metadata.space_path(registry.space_id).await?;
    authorize(&state, &session, &space_path, Action::View)?;

    let image = state
        .metadata
        .find_image(registry.id, &query.image)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::NameUnknown, format!("image {} unknown", query.image))
        })?;
    let stats = state.metadata.download_stats(registry.id, image.id).await?;

    Ok(Json(StatsResponse {
        image: query.image,
        total: stats.total,
        manifests: stats.manifests,
        blobs: stats.blobs,
    })
    .into_response())
}
