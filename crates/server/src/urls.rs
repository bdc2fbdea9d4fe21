//! Location URL builder.
//!
//! All `Location` headers derive from one builder carried in the request
//! context, so the process-wide relative-URL policy applies uniformly.

use axum::http::HeaderMap;
use axum::http::header;

/// Builds absolute or relative URLs for OCI responses.
#[derive(Clone, Debug)]
pub struct UrlBuilder {
    base: Option<String>,
}

impl UrlBuilder {
    /// Build from request headers. With `relative` set, the base is dropped
    /// and every URL comes out path-only.
    pub fn from_headers(headers: &HeaderMap, relative: bool) -> Self {
        if relative {
            return Self { base: None };
        }

        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        let host = headers
            .get("x-forwarded-host")
            .or_else(|| headers.get(header::HOST))
            .and_then(|v| v.to_str().ok());

        Self {
            base: host.map(|h| format!("{proto}://{h}")),
        }
    }

    /// A builder that always emits relative URLs.
    pub fn relative() -> Self {
        Self { base: None }
    }

    /// Resolve a path (starting with `/`) against the base.
    pub fn url(&self, path: &str) -> String {
        match &self.base {
            Some(base) => format!("{base}{path}"),
            None => path.to_string(),
        }
    }

    /// Upload session URL.
    pub fn upload_url(&self, root: &str, registry: &str, image: &str, session: &uuid::Uuid) -> String {
        self.url(&format!("/v2/{root}/{registry}/{image}/blobs/uploads/{session}"))
    }

    /// Blob URL.
    pub fn blob_url(&self, root: &str, registry: &str, image: &str, digest: &str) -> String {
        self.url(&format!("/v2/{root}/{registry}/{image}/blobs/{digest}"))
    }

    /// Tags listing URL with pagination parameters.
    pub fn tags_url(&self, root: &str, registry: &str, image: &str, n: i64, last: &str) -> String {
        self.url(&format!(
            "/v2/{root}/{registry}/{image}/tags/list?n={n}&last={last}"
        ))
    }
}
