//! Authentication and the authorization seam.
//!
//! Authentication providers are external collaborators; the server extracts
//! a principal from `Authorization: Basic` against config-declared users and
//! routes every permission decision through the [`Authorizer`] trait so a
//! real provider can be plugged in.

use crate::error::{ErrorCode, OciError, OciResult};
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use base64::Engine;
use sha2::{Digest as Sha2Digest, Sha256};
use wharf_core::config::AuthConfig;

/// Action being authorized against a registry's space path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    View,
    Upload,
    Delete,
}

/// The caller's session: an authenticated principal or anonymous.
#[derive(Clone, Debug, Default)]
pub struct AuthSession {
    pub principal: Option<String>,
    pub can_push: bool,
    pub can_delete: bool,
}

impl AuthSession {
    pub fn is_anonymous(&self) -> bool {
        self.principal.is_none()
    }

    /// Username placeholder for client-setup instructions.
    pub fn username(&self) -> &str {
        self.principal.as_deref().unwrap_or("<USERNAME>")
    }
}

/// Decision returned by an authorizer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// No (valid) credentials; the client should authenticate.
    Unauthorized,
    /// Credentials are fine but the action is not permitted.
    Denied,
}

/// Permission check seam, scoped by hierarchical space path.
pub trait Authorizer: Send + Sync + 'static {
    fn check(&self, session: &AuthSession, space_path: &str, action: Action) -> AuthDecision;
}

/// Built-in authorizer over the static config users.
pub struct ConfigAuthorizer {
    anonymous_pull: bool,
}

impl ConfigAuthorizer {
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            anonymous_pull: config.anonymous_pull,
        }
    }
}

impl Authorizer for ConfigAuthorizer {
    fn check(&self, session: &AuthSession, _space_path: &str, action: Action) -> AuthDecision {
        match action {
            Action::View => {
                if session.is_anonymous() && !self.anonymous_pull {
                    AuthDecision::Unauthorized
                } else {
                    AuthDecision::Allow
                }
            }
            Action::Upload => {
                if session.is_anonymous() {
                    AuthDecision::Unauthorized
                } else if session.can_push {
                    AuthDecision::Allow
                } else {
                    AuthDecision::Denied
                }
            }
            Action::Delete => {
                if session.is_anonymous() {
                    AuthDecision::Unauthorized
                } else if session.can_delete {
                    AuthDecision::Allow
                } else {
                    AuthDecision::Denied
                }
            }
        }
    }
}

fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the `Www-Authenticate` challenge from the configured realm.
pub fn challenge(realm: &str) -> String {
    format!("Bearer realm=\"{realm}\",service=\"wharf-registry\"")
}

/// Extract the caller's session from request headers.
///
/// Missing credentials yield the anonymous session; present-but-wrong
/// credentials are a hard 401 so clients don't silently fall back.
pub fn session_from_headers(
    headers: &HeaderMap,
    config: &AuthConfig,
    realm: &str,
) -> OciResult<AuthSession> {
    let Some(value) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Ok(AuthSession::default());
    };

    // RFC 7617: the scheme is case-insensitive.
    let Some(encoded) = value
        .len()
        .checked_sub(6)
        .and_then(|_| value[..6].eq_ignore_ascii_case("basic ").then(|| &value[6..]))
    else {
        // Unknown scheme (e.g. a Bearer token for an external provider we
        // don't run): treat as anonymous rather than rejecting.
        return Ok(AuthSession::default());
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| unauthorized(realm))?;
    let decoded = String::from_utf8(decoded).map_err(|_| unauthorized(realm))?;
    let (username, password) = decoded.split_once(':').ok_or_else(|| unauthorized(realm))?;

    let user = config
        .users
        .iter()
        .find(|u| u.username == username)
        .ok_or_else(|| unauthorized(realm))?;

    if hash_password(password) != user.password_hash.to_lowercase() {
        return Err(unauthorized(realm));
    }

    Ok(AuthSession {
        principal: Some(user.username.clone()),
        can_push: user.push,
        can_delete: user.delete,
    })
}

fn unauthorized(realm: &str) -> OciError {
    OciError::new(ErrorCode::Unauthorized, "authentication required")
        .with_challenge(challenge(realm))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use wharf_core::config::UserConfig;

    fn config_with_user(push: bool, delete: bool) -> AuthConfig {
        AuthConfig {
            anonymous_pull: true,
            users: vec![UserConfig {
                username: "ci".to_string(),
                password_hash: hash_password("secret"),
                push,
                delete,
            }],
        }
    }

    fn basic_header(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let encoded =
            base64::engine::general_purpose::STANDARD.encode(format!("{user}:{password}"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {encoded}")).unwrap(),
        );
        headers
    }

    #[test]
    fn missing_header_is_anonymous() {
        let session =
            session_from_headers(&HeaderMap::new(), &config_with_user(true, true), "r").unwrap();
        assert!(session.is_anonymous());
    }

    #[test]
    fn valid_credentials_resolve_user() {
        let headers = basic_header("ci", "secret");
        let session =
            session_from_headers(&headers, &config_with_user(true, false), "r").unwrap();
        assert_eq!(session.principal.as_deref(), Some("ci"));
        assert!(session.can_push);
        assert!(!session.can_delete);
    }

    #[test]
    fn wrong_password_is_401_with_challenge() {
        let headers = basic_header("ci", "wrong");
        let err = session_from_headers(&headers, &config_with_user(true, true), "wharf")
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Unauthorized);
        assert!(err.challenge.as_deref().unwrap().contains("realm=\"wharf\""));
    }

    #[test]
    fn unknown_user_is_401() {
        let headers = basic_header("ghost", "secret");
        assert!(session_from_headers(&headers, &config_with_user(true, true), "r").is_err());
    }

    #[test]
    fn authorizer_gates_by_action() {
        let authorizer = ConfigAuthorizer::new(&config_with_user(true, false));
        let anonymous = AuthSession::default();
        let user = AuthSession {
            principal: Some("ci".to_string()),
            can_push: true,
            can_delete: false,
        };

        assert_eq!(
            authorizer.check(&anonymous, "acme", Action::View),
            AuthDecision::Allow
        );
        assert_eq!(
            authorizer.check(&anonymous, "acme", Action::Upload),
            AuthDecision::Unauthorized
        );
        assert_eq!(
            authorizer.check(&user, "acme", Action::Upload),
            AuthDecision::Allow
        );
        assert_eq!(
            authorizer.check(&user, "acme", Action::Delete),
            AuthDecision::Denied
        );
    }

    #[test]
    fn anonymous_pull_toggle() {
        let config = AuthConfig {
            anonymous_pull: false,
            users: vec![],
        };
        let authorizer = ConfigAuthorizer::new(&config);
        assert_eq!(
            authorizer.check(&AuthSession::default(), "acme", Action::View),
            AuthDecision::Unauthorized
        );
    }
}
