//! Repository traits for metadata operations.

pub mod blobs;
pub mod images;
pub mod manifests;
pub mod registries;
pub mod spaces;
pub mod stats;
pub mod tags;
pub mod uploads;
pub mod upstreams;

pub use blobs::BlobRepo;
pub use images::ImageRepo;
pub use manifests::ManifestRepo;
pub use registries::RegistryRepo;
pub use spaces::SpaceRepo;
pub use stats::StatsRepo;
pub use tags::TagRepo;
pub use uploads::UploadRepo;
pub use upstreams::UpstreamRepo;
