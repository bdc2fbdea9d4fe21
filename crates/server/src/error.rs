//! OCI registry error envelope.
//!
//! Every client-visible failure renders as the Registry v2 envelope
//! `{"errors": [{"code", "message", "detail"}]}` with the matching HTTP
//! status. Internal detail (paths, upstream URLs, SQL) is scrubbed before
//! leaving the dispatcher.

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;

/// Symbolic OCI error codes, serialized verbatim into the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    BlobUnknown,
    BlobUploadInvalid,
    BlobUploadUnknown,
    DigestInvalid,
    ManifestBlobUnknown,
    ManifestInvalid,
    ManifestUnknown,
    NameInvalid,
    NameUnknown,
    SizeInvalid,
    RangeInvalid,
    Unauthorized,
    Denied,
    Unsupported,
    TooManyRequests,
    RootUnknown,
    PayloadTooLarge,
    ReferencesExceedLimit,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlobUnknown => "BLOB_UNKNOWN",
            Self::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            Self::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            Self::DigestInvalid => "DIGEST_INVALID",
            Self::ManifestBlobUnknown => "MANIFEST_BLOB_UNKNOWN",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::ManifestUnknown => "MANIFEST_UNKNOWN",
            Self::NameInvalid => "NAME_INVALID",
            Self::NameUnknown => "NAME_UNKNOWN",
            Self::SizeInvalid => "SIZE_INVALID",
            Self::RangeInvalid => "RANGE_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Denied => "DENIED",
            Self::Unsupported => "UNSUPPORTED",
            Self::TooManyRequests => "TOOMANYREQUESTS",
            Self::RootUnknown => "NAME_UNKNOWN",
            Self::PayloadTooLarge => "MANIFEST_PAYLOAD_EXCEEDS_LIMIT",
            Self::ReferencesExceedLimit => "MANIFEST_REFERENCES_EXCEED_LIMIT",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BlobUploadInvalid
            | Self::DigestInvalid
            | Self::ManifestInvalid
            | Self::NameInvalid => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Denied => StatusCode::FORBIDDEN,
            Self::BlobUnknown
            | Self::BlobUploadUnknown
            | Self::ManifestBlobUnknown
            | Self::ManifestUnknown
            | Self::NameUnknown
            | Self::RootUnknown => StatusCode::NOT_FOUND,
            Self::SizeInvalid => StatusCode::BAD_REQUEST,
            Self::RangeInvalid => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::Unsupported => StatusCode::BAD_REQUEST,
            Self::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            Self::PayloadTooLarge | Self::ReferencesExceedLimit => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A client-visible registry error.
#[derive(Debug)]
pub struct OciError {
    pub code: ErrorCode,
    pub message: String,
    pub detail: Option<String>,
    /// `Www-Authenticate` challenge attached to 401 responses.
    pub challenge: Option<String>,
    /// Override for the HTTP status (502 for exhausted upstream retries).
    pub status_override: Option<StatusCode>,
}

impl OciError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            challenge: None,
            status_override: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_override = Some(status);
        self
    }

    /// 502 + UNKNOWN for exhausted upstream retries.
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message).with_status(StatusCode::BAD_GATEWAY)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status_override.unwrap_or_else(|| self.code.status())
    }
}

impl fmt::Display for OciError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.message)
    }
}

impl std::error::Error for OciError {}

#[derive(Serialize)]
struct ErrorEntry {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorEntry>,
}

impl IntoResponse for OciError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code.as_str(), message = %self.message, "registry error");
        }

        let body = ErrorEnvelope {
            errors: vec![ErrorEntry {
                code: self.code.as_str(),
                message: self.message,
                detail: self.detail,
            }],
        };

        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED
            && let Some(challenge) = self.challenge
            && let Ok(value) = header::HeaderValue::from_str(&challenge)
        {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

impl From<wharf_metadata::MetadataError> for OciError {
    fn from(e: wharf_metadata::MetadataError) -> Self {
        match e {
            wharf_metadata::MetadataError::NotFound(what) => {
                Self::new(ErrorCode::NameUnknown, what)
            }
            // Internal detail stays out of the envelope.
            other => {
                tracing::error!(error = %other, "metadata error");
                Self::internal("metadata store failure")
            }
        }
    }
}

impl From<wharf_storage::StorageError> for OciError {
    fn from(e: wharf_storage::StorageError) -> Self {
        match e {
            wharf_storage::StorageError::NotFound(_) => {
                Self::new(ErrorCode::BlobUnknown, "blob not found in storage")
            }
            wharf_storage::StorageError::DigestMismatch { expected, actual } => {
                Self::new(ErrorCode::DigestInvalid, "digest verification failed")
                    .with_detail(format!("expected {expected}, got {actual}"))
            }
            wharf_storage::StorageError::InvalidRange(detail) => {
                Self::new(ErrorCode::RangeInvalid, "invalid range").with_detail(detail)
            }
            other => {
                tracing::error!(error = %other, "storage error");
                Self::internal("storage failure")
            }
        }
    }
}

impl From<wharf_core::Error> for OciError {
    fn from(e: wharf_core::Error) -> Self {
        match e {
            wharf_core::Error::InvalidDigest(detail) => {
                Self::new(ErrorCode::DigestInvalid, "invalid digest").with_detail(detail)
            }
            wharf_core::Error::InvalidReference(detail) => {
                Self::new(ErrorCode::NameInvalid, "invalid name").with_detail(detail)
            }
            wharf_core::Error::InvalidManifest(detail) => {
                Self::new(ErrorCode::ManifestInvalid, "invalid manifest").with_detail(detail)
            }
            other => {
                tracing::error!(error = %other, "core error");
                Self::internal("internal error")
            }
        }
    }
}

/// Result type for registry handlers.
pub type OciResult<T> = std::result::Result<T, OciError>;
