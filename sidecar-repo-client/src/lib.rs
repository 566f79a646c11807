//! Client for the remote sidecar configuration repository.
//!
//! The repository stores versioned namespaces ("codebases") of files that
//! sidecars pull their configuration from. The control plane only needs a
//! handful of operations against it:
//!
//! - **Readiness**: is the repository up at all
//! - **Batch write**: write files into one or more namespaces at a version
//! - **Derive**: branch a namespace copy-on-write from a base namespace
//! - **Delete**: drop a namespace
//!
//! [`HttpRepoClient`] speaks the repository's REST API. [`mock::MemoryRepo`]
//! keeps everything in memory, records every call and can inject failures.

mod client;
mod error;
mod http;
pub mod mock;

pub use client::{Batch, BatchItem, RepoClient};
pub use error::{RepoError, RepoResult};
pub use http::{HttpRepoClient, HttpRepoConfig};
