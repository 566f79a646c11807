//! Core type definitions for the sidecar repo control plane.
//!
//! This crate defines the plain data shared by the repository client, the
//! policy compiler and the job scheduler:
//! - Proxy keys and service identities
//! - Mesh services and their DNS hostnames
//! - Content fingerprints
//! - Certificates and pod probe metadata
//!
//! Nothing in here performs I/O or holds locks.

mod certificate;
mod fingerprint;
mod ids;
mod pod;
mod service;

pub use certificate::Certificate;
pub use fingerprint::Fingerprint;
pub use ids::{ProxyKey, ServiceIdentity};
pub use pod::{HttpGetAction, PodMetadata, Probe, TcpSocketAction};
pub use service::MeshService;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid service identity '{0}': expected namespace/service-account")]
    InvalidIdentity(String),
}
