//! Repository client abstraction.

use crate::error::RepoResult;
use async_trait::async_trait;

/// One file to write inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchItem {
    /// File name relative to the namespace root.
    pub filename: String,
    /// Raw file content.
    pub content: Vec<u8>,
}

impl BatchItem {
    /// Creates a batch item.
    pub fn new(filename: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            content: content.into(),
        }
    }
}

/// A set of files destined for a single namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Namespace path, e.g. `osm-edge-sidecar/<common-name>`.
    pub basepath: String,
    /// Files to write.
    pub items: Vec<BatchItem>,
}

impl Batch {
    /// Creates a batch for one namespace.
    pub fn new(basepath: impl Into<String>, items: Vec<BatchItem>) -> Self {
        Self {
            basepath: basepath.into(),
            items,
        }
    }
}

/// Abstract configuration repository interface.
///
/// Paths may be given with or without a leading `/`; implementations treat
/// both forms as the same namespace.
#[async_trait]
pub trait RepoClient: Send + Sync {
    /// Returns the name of the repository backend.
    fn provider_name(&self) -> &'static str;

    /// Returns whether the repository is up and serving requests.
    async fn is_ready(&self) -> RepoResult<bool>;

    /// Returns whether the namespace exists and is consistent.
    async fn namespace_exists(&self, path: &str) -> RepoResult<bool>;

    /// Writes every batch and commits each touched namespace at `version`.
    async fn write_batch(&self, version: &str, batches: &[Batch]) -> RepoResult<()>;

    /// Creates `path` as a copy-on-write branch of `base` at `version`.
    async fn derive_namespace(&self, path: &str, base: &str, version: &str) -> RepoResult<()>;

    /// Deletes a namespace. Deleting an absent namespace succeeds.
    async fn delete_namespace(&self, path: &str) -> RepoResult<()>;
}

/// Normalizes a namespace path to its `/`-prefixed form.
pub(crate) fn normalize_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    format!("/{trimmed}")
}
