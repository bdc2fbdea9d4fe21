//! OCI distribution protocol plumbing.

pub mod route;

pub use route::{RouteInfo, RouteType};
