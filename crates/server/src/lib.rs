//! OCI distribution server for the wharf artifact registry.
//!
//! Request flow: the wildcard `/v2/` dispatcher parses the path, the access
//! resolver maps it onto a registry and enforces policy, and the manifest /
//! blob engines execute against content-addressed storage and the metadata
//! store, pulling through the upstream proxy on miss.

pub mod access;
pub mod auth;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod locks;
pub mod metrics;
pub mod oci;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod upstream;
pub mod urls;

pub use error::{ErrorCode, OciError, OciResult};
pub use routes::create_router;
pub use state::AppState;
