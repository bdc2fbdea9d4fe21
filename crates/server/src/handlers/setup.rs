//! Client setup instructions.
//!
//! GET `/api/v1/registries/{root}/{registry}/client-setup?artifact=&version=`
//! returns copy-pasteable login/push/pull commands for the registry's
//! package type, with `<USERNAME>`, `<HOSTNAME>`, `<LOGIN_HOSTNAME>`,
//! `<REGISTRY_NAME>`, `<IMAGE_NAME>`, and `<TAG>` substituted from the
//! session and request context.

use crate::auth::{Action, AuthDecision, AuthSession, challenge};
use crate::error::{ErrorCode, OciError, OciResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use wharf_core::registry::PackageType;

#[derive(Deserialize)]
pub struct SetupQuery {
    #[serde(default)]
    pub artifact: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientSetupDetails {
    pub main_header: String,
    pub sec_header: String,
    pub sections: Vec<SetupSection>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupSection {
    pub header: String,
    pub steps: Vec<SetupStep>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStep {
    pub header: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<SetupCommand>,
    #[serde(rename = "type")]
    pub step_type: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupCommand {
    pub label: String,
    pub value: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupResponse {
    pub data: ClientSetupDetails,
    pub status: &'static str,
}

const STEP_STATIC: &str = "Static";
const STEP_GENERATE_TOKEN: &str = "GenerateToken";

fn command(label: &str, value: &str) -> SetupCommand {
    SetupCommand {
        label: label.to_string(),
        value: value.to_string(),
    }
}

fn docker_sections() -> Vec<SetupSection> {
    vec![
        SetupSection {
            header: "Login to Docker".to_string(),
            steps: vec![
                SetupStep {
                    header: "Run this Docker command in your terminal to authenticate the client."
                        .to_string(),
                    commands: vec![
                        command("", "docker login <LOGIN_HOSTNAME>"),
                        command("Username: <USERNAME>", "<USERNAME>"),
                        command("Password: *see step 2*", ""),
                    ],
                    step_type: STEP_STATIC,
                },
                SetupStep {
                    header: "For the Password field above, generate an identity token".to_string(),
                    commands: vec![],
                    step_type: STEP_GENERATE_TOKEN,
                },
            ],
        },
        SetupSection {
            header: "Retag and Push the image".to_string(),
            steps: vec![
                SetupStep {
                    header: "Run this Docker command in your terminal to tag the image.".to_string(),
                    commands: vec![command(
                        "",
                        "docker tag <IMAGE_NAME>:<TAG> <HOSTNAME>/<REGISTRY_NAME>/<IMAGE_NAME>:<TAG>",
                    )],
                    step_type: STEP_STATIC,
                },
                SetupStep {
                    header: "Run this Docker command in your terminal to push the image."
                        .to_string(),
                    commands: vec![command(
                        "",
                        "docker push <HOSTNAME>/<REGISTRY_NAME>/<IMAGE_NAME>:<TAG>",
                    )],
                    step_type: STEP_STATIC,
                },
            ],
        },
        SetupSection {
            header: "Pull an image".to_string(),
            steps: vec![SetupStep {
                header: "Run this Docker command in your terminal to pull image.".to_string(),
                commands: vec![command(
                    "",
                    "docker pull <HOSTNAME>/<REGISTRY_NAME>/<IMAGE_NAME>:<TAG>",
                )],
                step_type: STEP_STATIC,
            }],
        },
    ]
}

fn helm_sections() -> Vec<SetupSection> {
    vec![
        SetupSection {
            header: "Login to Helm".to_string(),
            steps: vec![
                SetupStep {
                    header: "Run this Helm command in your terminal to authenticate the client."
                        .to_string(),
                    commands: vec![
                        command("", "helm registry login <LOGIN_HOSTNAME>"),
                        command("Username: <USERNAME>", "<USERNAME>"),
                        command("Password: *see step 2*", ""),
                    ],
                    step_type: STEP_STATIC,
                },
                SetupStep {
                    header: "For the Password field above, generate an identity token".to_string(),
                    commands: vec![],
                    step_type: STEP_GENERATE_TOKEN,
                },
            ],
        },
        SetupSection {
            header: "Push a version".to_string(),
            steps: vec![SetupStep {
                header: "Run this Helm push command in your terminal to push a chart in OCI form. \
                         Note: Make sure you add oci:// prefix to the repository URL."
                    .to_string(),
                commands: vec![command(
                    "",
                    "helm push <CHART_TGZ_FILE> oci://<HOSTNAME>/<REGISTRY_NAME>",
                )],
                step_type: STEP_STATIC,
            }],
        },
        SetupSection {
            header: "Pull a version".to_string(),
            steps: vec![SetupStep {
                header: "Run this Helm command in your terminal to pull a specific chart version."
                    .to_string(),
                commands: vec![command(
                    "",
                    "helm pull oci://<HOSTNAME>/<REGISTRY_NAME>/<IMAGE_NAME> --version <TAG>",
                )],
                step_type: STEP_STATIC,
            }],
        },
    ]
}

/// Replace placeholder tokens in every command of every section.
fn substitute(
    sections: &mut [SetupSection],
    username: &str,
    hostname: &str,
    registry: &str,
    image: Option<&str>,
    tag: Option<&str>,
) {
    let login_hostname = hostname.split('/').next().unwrap_or(hostname);
    for section in sections.iter_mut() {
        for step in section.steps.iter_mut() {
            for cmd in step.commands.iter_mut() {
                cmd.value = cmd.value.replace("<USERNAME>", username);
                cmd.label = cmd.label.replace("<USERNAME>", username);
                cmd.value = cmd.value.replace("<HOSTNAME>", hostname);
                cmd.value = cmd.value.replace("<LOGIN_HOSTNAME>", login_hostname);
                cmd.value = cmd.value.replace("<REGISTRY_NAME>", registry);
                if let Some(image) = image {
                    cmd.value = cmd.value.replace("<IMAGE_NAME>", image);
                }
                if let Some(tag) = tag {
                    cmd.value = cmd.value.replace("<TAG>", tag);
                }
            }
        }
    }
}

pub async fn client_setup(
    State(state): State<AppState>,
    Path((root, name)): Path<(String, String)>,
    Query(query): Query<SetupQuery>,
    parts: Parts,
) -> OciResult<Response> {
    let session: AuthSession = crate::auth::session_from_headers(
        &parts.headers,
        &state.config.auth,
        &state.config.server.realm,
    )?;

    let root_space = state.metadata.find_root_space(&root).await?.ok_or_else(|| {
        OciError::new(ErrorCode::RootUnknown, format!("root {root} not found"))
    })?;
    let registry = state
        .metadata
        .find_registry(root_space.id, &name)
        .await?
        .ok_or_else(|| {
            OciError::new(ErrorCode::NameUnknown, format!("registry {name} not found"))
        })?;
    let space_path = state.metadata.space_path(registry.space_id).await?;

    match state.authorizer.check(&session, &space_path, Action::View) {
        AuthDecision::Allow => {}
        AuthDecision::Unauthorized => {
            return Err(OciError::new(ErrorCode::Unauthorized, "authentication required")
                .with_challenge(challenge(&state.config.server.realm)));
        }
        AuthDecision::Denied => return Err(OciError::new(ErrorCode::Denied, "access denied")),
    }

    // Referenced artifact and version must exist when supplied.
    if let Some(image_name) = &query.artifact {
        let image = state
            .metadata
            .find_image(registry.id, image_name)
            .await?
            .ok_or_else(|| {
                OciError::new(ErrorCode::NameUnknown, format!("image {image_name} unknown"))
            })?;
        if let Some(version) = &query.version {
            state
                .metadata
                .find_tag(registry.id, image.id, version)
                .await?
                .ok_or_else(|| {
                    OciError::new(ErrorCode::ManifestUnknown, format!("tag {version} unknown"))
                })?;
        }
    }

    let (main_header, mut sections) = match registry.package_type() {
        PackageType::Helm => ("Helm Client Setup", helm_sections()),
        // Docker instructions double for generic OCI clients (oras, skopeo).
        _ => ("Docker Client Setup", docker_sections()),
    };

    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("<HOSTNAME>");
    let hostname = format!("{host}/{}", root_space.identifier);

    substitute(
        &mut sections,
        session.username(),
        &hostname,
        &registry.name,
        query.artifact.as_deref(),
        query.version.as_deref(),
    );

    let details = ClientSetupDetails {
        main_header: main_header.to_string(),
        sec_header: "Follow these instructions to install/use artifacts from this registry."
            .to_string(),
        sections,
    };
    Ok(Json(SetupResponse {
        data: details,
        status: "SUCCESS",
    })
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_replaces_all_placeholders() {
        let mut sections = docker_sections();
        substitute(
            &mut sections,
            "ci-bot",
            "registry.example/acme",
            "containers",
            Some("app"),
            Some("v1"),
        );

        let pull = &sections[2].steps[0].commands[0].value;
        assert_eq!(pull, "docker pull registry.example/acme/containers/app:v1");

        let login = &sections[0].steps[0].commands[0].value;
        assert_eq!(login, "docker login registry.example");

        let username = &sections[0].steps[0].commands[1].label;
        assert_eq!(username, "Username: ci-bot");
    }

    #[test]
    fn helm_uses_oci_prefix() {
        let mut sections = helm_sections();
        substitute(
            &mut sections,
            "dev",
            "registry.example/acme",
            "charts",
            Some("web"),
            Some("1.2.3"),
        );
        let push = &sections[1].steps[0].commands[0].value;
        assert_eq!(push, "helm push <CHART_TGZ_FILE> oci://registry.example/acme/charts");
        let pull = &sections[2].steps[0].commands[0].value;
        assert_eq!(
            pull,
            "helm pull oci://registry.example/acme/charts/web --version 1.2.3"
        );
    }

    #[test]
    fn placeholders_survive_when_context_missing() {
        let mut sections = docker_sections();
        substitute(&mut sections, "<USERNAME>", "host/acme", "reg", None, None);
        let pull = &sections[2].steps[0].commands[0].value;
        assert!(pull.contains("<IMAGE_NAME>"));
        assert!(pull.contains("<TAG>"));
    }
}
