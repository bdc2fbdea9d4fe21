//! Access resolver: maps a parsed route onto a concrete registry and
//! enforces permissions and artifact policy.

use crate::auth::{Action, AuthDecision, AuthSession, challenge};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::oci::RouteInfo;
use crate::state::AppState;
use crate::urls::UrlBuilder;
use axum::http::HeaderMap;
use wharf_core::policy::ArtifactFilter;
use wharf_core::reference::{validate_image_name, validate_space_identifier};
use wharf_core::registry::RegistryType;
use wharf_metadata::models::{RegistryRow, SpaceRow};

/// Resolved request context: the registry, its spaces, and a URL builder
/// honoring the process-wide relative-URL policy.
#[derive(Clone, Debug)]
pub struct RegistryContext {
    pub root_space: SpaceRow,
    pub registry: RegistryRow,
    pub space_path: String,
    pub urls: UrlBuilder,
}

impl RegistryContext {
    pub fn is_upstream(&self) -> bool {
        self.registry.registry_type() == RegistryType::Upstream
    }
}

/// Resolve `(root, registry)` and authorize `action`.
///
/// The sequence is fixed: identifier syntax, root space (case-insensitive),
/// registry by `(root, name)`, parent space, permission check, then the
/// allow/block filter over `image:tag` when both are present.
pub async fn resolve(
    state: &AppState,
    route: &RouteInfo,
    session: &AuthSession,
    action: Action,
    headers: &HeaderMap,
) -> OciResult<RegistryContext> {
    validate_space_identifier(&route.root)
        .map_err(|_| OciError::new(ErrorCode::NameInvalid, "invalid root identifier"))?;
    validate_space_identifier(&route.registry)
        .map_err(|_| OciError::new(ErrorCode::NameInvalid, "invalid registry identifier"))?;
    if !route.image.is_empty() {
        validate_image_name(&route.image)
            .map_err(|_| OciError::new(ErrorCode::NameInvalid, "invalid repository name"))?;
    }

    let root_space = state
        .metadata
        .find_root_space(&route.root)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::RootUnknown, format!("root {} not found", route.root))
        })?;

    let registry = state
        .metadata
        .find_registry(root_space.id, &route.registry)
        .await?
        .ok_or_else(|| {
            OciError::new(
                ErrorCode::NameUnknown,
                format!("registry {} not found", route.registry),
            )
        })?;

    let parent_space = state
        .metadata
        .get_space(registry.space_id)
        .await?
        .ok_or_else(|| OciError::new(ErrorCode::NameUnknown, "parent space not found"))?;
    let space_path = state.metadata.space_path(parent_space.id).await?;

    match state.authorizer.check(session, &space_path, action) {
        AuthDecision::Allow => {}
        AuthDecision::Unauthorized => {
            return Err(
                OciError::new(ErrorCode::Unauthorized, "authentication required")
                    .with_challenge(challenge(&state.config.server.realm)),
            );
        }
        AuthDecision::Denied => {
            return Err(OciError::new(ErrorCode::Denied, "access denied"));
        }
    }

    // The policy filter applies when both image and tag are known.
    if !route.image.is_empty()
        && let Some(tag) = &route.tag
    {
        enforce_artifact_policy(&registry, &route.image, tag)?;
    }

    Ok(RegistryContext {
        root_space,
        registry,
        space_path,
        urls: UrlBuilder::from_headers(headers, state.config.oci.relative_urls),
    })
}

/// Check `image:tag` against the registry's allow/block globs.
pub fn enforce_artifact_policy(registry: &RegistryRow, image: &str, tag: &str) -> OciResult<()> {
    let filter = ArtifactFilter::compile(&registry.allowed(), &registry.blocked())
        .map_err(|e| OciError::internal(format!("invalid registry policy: {e}")))?;
    let artifact = format!("{image}:{tag}");
    if filter.allows(&artifact) {
        Ok(())
    } else {
        Err(OciError::new(
            ErrorCode::Denied,
            format!("artifact {artifact} blocked by registry policy"),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn registry_with_patterns(allowed: &[&str], blocked: &[&str]) -> RegistryRow {
        RegistryRow {
            id: 1,
            space_id: 1,
            root_space_id: 1,
            name: "docker".to_string(),
            registry_type: "virtual".to_string(),
            package_type: "docker".to_string(),
            allowed_patterns: serde_json::to_string(allowed).unwrap(),
            blocked_patterns: serde_json::to_string(blocked).unwrap(),
            upstream_config_id: None,
            created_at: OffsetDateTime::now_utc(),
            updated_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn blocked_tag_is_denied() {
        let registry = registry_with_patterns(&[], &["*:latest"]);
        let err = enforce_artifact_policy(&registry, "foo", "latest").unwrap_err();
        assert_eq!(err.code, ErrorCode::Denied);
        enforce_artifact_policy(&registry, "foo", "1.0").unwrap();
    }

    #[test]
    fn allow_list_restricts_images() {
        let registry = registry_with_patterns(&["team/*"], &[]);
        enforce_artifact_policy(&registry, "team/app", "v1").unwrap();
        assert!(enforce_artifact_policy(&registry, "other", "v1").is_err());
    }
}
