//! Error types for the control plane.

use sidecar_repo_client::RepoError;
use std::time::Duration;
use thiserror::Error;

/// Result type for catalog queries.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// Errors returned by mesh catalog queries.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The data exists upstream but has not been observed yet.
    #[error("not ready: {0}")]
    NotReady(String),

    /// The query itself failed.
    #[error("query failed: {0}")]
    Query(String),
}

/// Result type for Kubernetes lookups.
pub type KubeResult<T> = Result<T, KubeError>;

/// Errors returned by Kubernetes object lookups.
#[derive(Debug, Error)]
pub enum KubeError {
    /// No pod backs the proxy.
    #[error("pod not found for proxy {0}")]
    PodNotFound(String),

    /// The services fronted by a proxy could not be listed.
    #[error("could not list services for proxy {proxy}: {reason}")]
    ServicesUnavailable { proxy: String, reason: String },
}

/// Result type for certificate authority operations.
pub type CertificateResult<T> = Result<T, CertificateError>;

/// Errors returned by a certificate authority.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The authority has no key material for the identity.
    #[error("no certificate material for {0}")]
    NoMaterial(String),

    /// Issuance failed.
    #[error("issuance failed: {0}")]
    Issuance(String),
}

/// Errors that abort a publish attempt.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The document could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Branching the proxy namespace from the base failed.
    #[error("derive failed for {path}: {source}")]
    Derive {
        path: String,
        #[source]
        source: RepoError,
    },

    /// Writing the document failed.
    #[error("write failed for {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: RepoError,
    },
}

/// Errors loading a mesh snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Result type for server lifecycle operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that stop the repo server from starting.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called more than once.
    #[error("server already started")]
    AlreadyStarted,

    /// The repository never reported ready.
    #[error("repository not ready after {waited:?}")]
    RepoUnavailable { waited: Duration },

    /// Seeding the base namespace failed.
    #[error("failed to seed base namespace: {0}")]
    Seed(#[source] RepoError),

    /// The base namespace never became consistent.
    #[error("base namespace {path} not ready after {waited:?}")]
    BaseNotReady { path: String, waited: Duration },
}
