//! Sidecar configuration control plane.
//!
//! For every connected proxy this crate compiles a configuration document
//! from mesh state and publishes it, only when it changed, to the remote
//! configuration repository the proxy pulls from.
//!
//! - [`compiler::PolicyCompiler`] runs the compilation stages
//! - [`publisher::VersionedPublisher`] fingerprints and publishes documents
//! - [`job::ProxyJob`] is one compile-and-publish run under the proxy's lock
//! - [`scheduler::JobScheduler`] routes jobs onto serial
//!   [`workerpool::WorkerPool`] lanes and coalesces retries
//! - [`server::RepoServer`] orders startup and reacts to mesh events
//!
//! Mesh state comes in through the [`catalog::MeshCatalog`] and
//! [`catalog::KubeController`] traits; certificates through
//! [`certificate::CertificateAuthority`].

pub mod catalog;
pub mod certificate;
pub mod compiler;
pub mod config;
pub mod document;
pub mod error;
pub mod job;
pub mod plugin;
pub mod proxy;
pub mod publisher;
pub mod scheduler;
pub mod server;
pub mod workerpool;

pub use catalog::{KubeController, MeshCatalog, MeshSnapshot, SnapshotCatalog};
pub use certificate::{CertificateAuthority, SnapshotAuthority};
pub use compiler::{Compiled, PolicyCompiler, Stage};
pub use config::{CodebasePaths, MeshConfig, ServerConfig};
pub use document::ConfigDocument;
pub use error::{PublishError, ServerError, ServerResult};
pub use job::{JobHandle, JobOutcome, JobReport, ProxyJob};
pub use proxy::{Proxy, ProxyRegistry, ProxyState};
pub use publisher::{PublishOutcome, VersionedPublisher};
pub use scheduler::JobScheduler;
pub use server::{LifecycleState, MeshEvent, RepoServer, ServerDeps};
