//! OCI and Docker manifest payloads.
//!
//! The registry accepts four manifest kinds: Docker schema2 single, OCI
//! image single, Docker manifest list, and OCI image index. The two single
//! kinds share one payload shape, as do the two list kinds; the original
//! media type is kept verbatim so responses round-trip byte-exactly.

use crate::digest::Digest;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Docker schema2 single-image manifest.
pub const MEDIA_TYPE_DOCKER_MANIFEST: &str =
    "application/vnd.docker.distribution.manifest.v2+json";
/// OCI single-image manifest.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";
/// Docker manifest list.
pub const MEDIA_TYPE_DOCKER_MANIFEST_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";
/// OCI image index.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";
/// Docker image config blob.
pub const MEDIA_TYPE_DOCKER_CONFIG: &str = "application/vnd.docker.container.image.v1+json";
/// OCI image config blob.
pub const MEDIA_TYPE_OCI_CONFIG: &str = "application/vnd.oci.image.config.v1+json";

/// A content descriptor: a typed, sized pointer to another object.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: Digest,
    pub size: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

impl Descriptor {
    /// A plain descriptor with no platform or annotations.
    pub fn new(media_type: impl Into<String>, digest: Digest, size: i64) -> Self {
        Self {
            media_type: media_type.into(),
            digest,
            size,
            platform: None,
            artifact_type: None,
            annotations: None,
        }
    }
}

/// Platform tuple carried on manifest-list children.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: String,
    pub architecture: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            architecture: architecture.into(),
            variant: None,
        }
    }

    /// Exact `(os, architecture)` match; variant is carried verbatim but
    /// does not participate in selection.
    pub fn matches(&self, os: &str, architecture: &str) -> bool {
        self.os == os && self.architecture == architecture
    }
}

/// A single-image manifest (Docker schema2 or OCI).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageManifest {
    pub schema_version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// A manifest list (Docker) or image index (OCI).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestList {
    pub schema_version: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub manifests: Vec<Descriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<HashMap<String, String>>,
}

/// Minimal shape used to sniff the media type out of an untyped payload.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Versioned {
    #[allow(dead_code)]
    schema_version: Option<i32>,
    media_type: Option<String>,
}

/// A parsed manifest payload, tagged by its effective media type.
#[derive(Clone, Debug)]
pub enum Manifest {
    Image {
        media_type: String,
        manifest: ImageManifest,
    },
    List {
        media_type: String,
        list: ManifestList,
    },
}

impl Manifest {
    /// Parse a manifest payload.
    ///
    /// Identification follows the declared `Content-Type` when it names a
    /// known manifest media type; otherwise the payload's own `mediaType`
    /// field is sniffed. Anything else is rejected.
    pub fn parse(content_type: Option<&str>, payload: &[u8]) -> Result<Self> {
        let declared = content_type.map(str::trim).filter(|c| !c.is_empty());
        let media_type = match declared {
            Some(ct) if is_manifest_media_type(ct) => ct.to_string(),
            _ => {
                let versioned: Versioned = serde_json::from_slice(payload)
                    .map_err(|e| Error::InvalidManifest(format!("unparseable payload: {e}")))?;
                match versioned.media_type {
                    Some(mt) if is_manifest_media_type(&mt) => mt,
                    Some(mt) => {
                        return Err(Error::InvalidManifest(format!(
                            "unknown manifest media type: {mt}"
                        )));
                    }
                    None => {
                        return Err(Error::InvalidManifest(
                            "missing media type in both header and payload".to_string(),
                        ));
                    }
                }
            }
        };

        if is_list_media_type(&media_type) {
            let list: ManifestList = serde_json::from_slice(payload)?;
            Ok(Self::List { media_type, list })
        } else {
            let manifest: ImageManifest = serde_json::from_slice(payload)?;
            Ok(Self::Image {
                media_type,
                manifest,
            })
        }
    }

    /// The effective media type of the payload.
    pub fn media_type(&self) -> &str {
        match self {
            Self::Image { media_type, .. } => media_type,
            Self::List { media_type, .. } => media_type,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Self::List { .. })
    }

    /// Config descriptor for single-image manifests.
    pub fn config(&self) -> Option<&Descriptor> {
        match self {
            Self::Image { manifest, .. } => Some(&manifest.config),
            Self::List { .. } => None,
        }
    }

    /// All descriptors this manifest points at: config + layers for single
    /// images, children for lists. The subject is not included.
    pub fn references(&self) -> Vec<&Descriptor> {
        match self {
            Self::Image { manifest, .. } => std::iter::once(&manifest.config)
                .chain(manifest.layers.iter())
                .collect(),
            Self::List { list, .. } => list.manifests.iter().collect(),
        }
    }

    /// Child manifest descriptors, for lists only.
    pub fn children(&self) -> &[Descriptor] {
        match self {
            Self::Image { .. } => &[],
            Self::List { list, .. } => &list.manifests,
        }
    }

    /// The referrers subject, if present.
    pub fn subject(&self) -> Option<&Descriptor> {
        match self {
            Self::Image { manifest, .. } => manifest.subject.as_ref(),
            Self::List { list, .. } => list.subject.as_ref(),
        }
    }

    /// The artifact type used for referrers filtering: an explicit
    /// `artifactType`, falling back to the config media type.
    pub fn artifact_type(&self) -> Option<&str> {
        match self {
            Self::Image { manifest, .. } => manifest
                .artifact_type
                .as_deref()
                .or(Some(manifest.config.media_type.as_str())),
            Self::List { list, .. } => list.artifact_type.as_deref(),
        }
    }

    pub fn annotations(&self) -> Option<&HashMap<String, String>> {
        match self {
            Self::Image { manifest, .. } => manifest.annotations.as_ref(),
            Self::List { list, .. } => list.annotations.as_ref(),
        }
    }
}

/// Whether the media type names one of the four accepted manifest kinds.
pub fn is_manifest_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        MEDIA_TYPE_DOCKER_MANIFEST
            | MEDIA_TYPE_OCI_MANIFEST
            | MEDIA_TYPE_DOCKER_MANIFEST_LIST
            | MEDIA_TYPE_OCI_INDEX
    )
}

/// Whether the media type names a manifest list / index.
pub fn is_list_media_type(media_type: &str) -> bool {
    matches!(
        media_type,
        MEDIA_TYPE_DOCKER_MANIFEST_LIST | MEDIA_TYPE_OCI_INDEX
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn digest(byte: u8) -> String {
        format!("sha256:{}", hex::encode([byte; 32]))
    }

    fn single_payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_DOCKER_MANIFEST,
            "config": {
                "mediaType": MEDIA_TYPE_DOCKER_CONFIG,
                "digest": digest(1),
                "size": 100
            },
            "layers": [
                { "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                  "digest": digest(2), "size": 4096 }
            ]
        }))
        .unwrap()
    }

    fn index_payload() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_INDEX,
            "manifests": [
                { "mediaType": MEDIA_TYPE_OCI_MANIFEST, "digest": digest(3), "size": 500,
                  "platform": { "os": "linux", "architecture": "amd64" } },
                { "mediaType": MEDIA_TYPE_OCI_MANIFEST, "digest": digest(4), "size": 501,
                  "platform": { "os": "linux", "architecture": "arm64", "variant": "v8" } }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn parses_single_by_content_type() {
        let m = Manifest::parse(Some(MEDIA_TYPE_DOCKER_MANIFEST), &single_payload()).unwrap();
        assert!(!m.is_list());
        assert_eq!(m.media_type(), MEDIA_TYPE_DOCKER_MANIFEST);
        assert_eq!(m.references().len(), 2);
        assert_eq!(m.config().unwrap().size, 100);
    }

    #[test]
    fn sniffs_media_type_when_header_missing() {
        let m = Manifest::parse(None, &index_payload()).unwrap();
        assert!(m.is_list());
        assert_eq!(m.media_type(), MEDIA_TYPE_OCI_INDEX);
        assert_eq!(m.children().len(), 2);
        assert_eq!(
            m.children()[1].platform.as_ref().unwrap().variant.as_deref(),
            Some("v8")
        );
    }

    #[test]
    fn sniffs_when_header_is_not_a_manifest_type() {
        let m = Manifest::parse(Some("application/octet-stream"), &single_payload()).unwrap();
        assert_eq!(m.media_type(), MEDIA_TYPE_DOCKER_MANIFEST);
    }

    #[test]
    fn rejects_unknown_media_type() {
        let payload = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": "application/vnd.example.custom+json"
        }))
        .unwrap();
        assert!(Manifest::parse(None, &payload).is_err());
    }

    #[test]
    fn rejects_missing_media_type() {
        let payload = serde_json::to_vec(&json!({ "schemaVersion": 2 })).unwrap();
        assert!(Manifest::parse(None, &payload).is_err());
    }

    #[test]
    fn artifact_type_falls_back_to_config_media_type() {
        let m = Manifest::parse(Some(MEDIA_TYPE_DOCKER_MANIFEST), &single_payload()).unwrap();
        assert_eq!(m.artifact_type(), Some(MEDIA_TYPE_DOCKER_CONFIG));
    }

    #[test]
    fn subject_is_exposed() {
        let payload = serde_json::to_vec(&json!({
            "schemaVersion": 2,
            "mediaType": MEDIA_TYPE_OCI_MANIFEST,
            "artifactType": "application/vnd.example.sbom",
            "config": { "mediaType": MEDIA_TYPE_OCI_CONFIG, "digest": digest(1), "size": 2 },
            "layers": [],
            "subject": { "mediaType": MEDIA_TYPE_OCI_MANIFEST, "digest": digest(9), "size": 42 }
        }))
        .unwrap();
        let m = Manifest::parse(None, &payload).unwrap();
        assert_eq!(m.subject().unwrap().digest.to_string(), digest(9));
        assert_eq!(m.artifact_type(), Some("application/vnd.example.sbom"));
    }
}
