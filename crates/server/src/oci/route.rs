//! `/v2/...` path parser.
//!
//! Paths have the shape `/v2/{root}/{registry}/{image...}/{verb}/{ref}`,
//! where `image` may contain slashes (nested repositories). The parser is
//! pure: no I/O, no storage access. Invalid paths classify as
//! [`RouteType::Invalid`] and are rejected before touching storage.

use std::collections::HashMap;
use wharf_core::digest::Digest;

/// Minimum number of path segments for a valid OCI route.
const MIN_URL_SEGMENTS: usize = 5;

const PART_MANIFESTS: &str = "manifests";
const PART_BLOBS: &str = "blobs";
const PART_UPLOADS: &str = "uploads";
const PART_TAGS: &str = "tags";
const PART_REFERRERS: &str = "referrers";

/// Classified OCI route.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteType {
    /// `/v2/:root/:registry/:image/manifests/:reference`
    Manifests,
    /// `/v2/:root/:registry/:image/blobs/:digest`
    Blobs,
    /// `/v2/:root/:registry/:image/blobs/uploads/[:session]`
    BlobUploadSession,
    /// `/v2/:root/:registry/:image/tags/list`
    Tags,
    /// `/v2/:root/:registry/:image/referrers/:digest`
    Referrers,
    /// Anything else.
    Invalid,
}

/// Parsed route components.
#[derive(Clone, Debug, Default)]
pub struct RouteInfo {
    pub root: String,
    pub registry: String,
    pub image: String,
    /// Raw final segment (tag, digest, or upload session id).
    pub reference: String,
    pub digest: Option<Digest>,
    pub tag: Option<String>,
    pub route_type: Option<RouteType>,
}

impl RouteInfo {
    pub fn route_type(&self) -> RouteType {
        self.route_type.unwrap_or(RouteType::Invalid)
    }
}

fn classify(segments: &[&str]) -> RouteType {
    if segments.len() < MIN_URL_SEGMENTS {
        return RouteType::Invalid;
    }
    let verb = segments[segments.len() - 2];
    match verb {
        PART_MANIFESTS => RouteType::Manifests,
        PART_BLOBS => {
            if segments[segments.len() - 1] == PART_UPLOADS {
                RouteType::BlobUploadSession
            } else {
                RouteType::Blobs
            }
        }
        PART_UPLOADS => RouteType::BlobUploadSession,
        PART_TAGS => RouteType::Tags,
        PART_REFERRERS => RouteType::Referrers,
        _ => RouteType::Invalid,
    }
}

/// Parse an OCI path plus its query parameters.
///
/// Example: `/v2/acme/reg1/lib/alpine/manifests/3.19` parses to
/// root=`acme`, registry=`reg1`, image=`lib/alpine`, tag=`3.19`.
pub fn parse(path: &str, params: &HashMap<String, String>) -> RouteInfo {
    let trimmed = path.trim_matches('/');
    let segments: Vec<&str> = trimmed.split('/').collect();

    let route_type = classify(&segments);
    if route_type == RouteType::Invalid {
        tracing::warn!(path = %path, "invalid OCI route");
        return RouteInfo {
            route_type: Some(RouteType::Invalid),
            ..Default::default()
        };
    }

    let mut info = RouteInfo {
        root: segments[1].to_string(),
        registry: segments[2].to_string(),
        image: segments[3..segments.len() - 2].join("/"),
        route_type: Some(route_type),
        ..Default::default()
    };

    let last = segments[segments.len() - 1];
    match route_type {
        RouteType::Manifests => {
            info.reference = last.to_string();
            match Digest::parse(last) {
                Ok(digest) => info.digest = Some(digest),
                Err(_) => info.tag = Some(last.to_string()),
            }
        }
        RouteType::Blobs => {
            info.digest = Digest::parse(last).ok();
            info.reference = last.to_string();
        }
        RouteType::BlobUploadSession => {
            // Ambiguity inherited from the upstream path grammar: a final
            // segment equal to the literal "uploads" means "new upload";
            // otherwise the final segment is the session id and "uploads"
            // is the penultimate segment.
            if last != PART_UPLOADS && segments[segments.len() - 2] == PART_UPLOADS {
                info.image = segments[3..segments.len() - 3].join("/");
                info.reference = last.to_string();
            }
            // On PUT close the digest arrives as a query parameter and
            // takes precedence.
            if let Some(digest) = params.get("digest") {
                info.digest = Digest::parse(digest).ok();
            }
        }
        RouteType::Tags => {
            // Final segment is the literal "list"; nothing to capture.
        }
        RouteType::Referrers => {
            info.digest = Digest::parse(last).ok();
            info.reference = last.to_string();
        }
        RouteType::Invalid => unreachable!(),
    }

    info
}
