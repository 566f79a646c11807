//! An in-memory repository for testing.
//!
//! [`MemoryRepo`] models namespaces as versioned file maps, records every
//! call it receives and can be told to fail the next derive, batch or delete.

use crate::client::{normalize_path, Batch, RepoClient};
use crate::error::{RepoError, RepoResult};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// A call observed by the in-memory repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepoCall {
    IsReady,
    NamespaceExists(String),
    WriteBatch { version: String, paths: Vec<String> },
    Derive { path: String, base: String, version: String },
    Delete(String),
}

impl RepoCall {
    /// Whether this call changes repository content.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            RepoCall::WriteBatch { .. } | RepoCall::Derive { .. } | RepoCall::Delete(_)
        )
    }
}

/// A namespace as stored in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryNamespace {
    /// Version of the last commit.
    pub version: String,
    /// The namespace this one was derived from, if any.
    pub base: Option<String>,
    /// File name to content.
    pub files: BTreeMap<String, Vec<u8>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    namespaces: BTreeMap<String, MemoryNamespace>,
    calls: Vec<RepoCall>,
    ready_after: u32,
    ready_polls: u32,
    fail_derive: u32,
    fail_batch: u32,
    fail_delete: u32,
}

/// In-memory repository with call recording and failure injection.
#[derive(Debug, Default)]
pub struct MemoryRepo {
    state: Mutex<MemoryState>,
}

impl MemoryRepo {
    /// Creates an empty repository that is immediately ready.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository that reports not-ready for the first `polls`
    /// readiness checks.
    pub fn ready_after(polls: u32) -> Self {
        let repo = Self::default();
        repo.lock().ready_after = polls;
        repo
    }

    /// Creates a repository that never becomes ready.
    pub fn never_ready() -> Self {
        Self::ready_after(u32::MAX)
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fails the next derive call.
    pub fn fail_next_derive(&self) {
        self.lock().fail_derive += 1;
    }

    /// Fails the next batch write.
    pub fn fail_next_batch(&self) {
        self.lock().fail_batch += 1;
    }

    /// Fails the next delete call.
    pub fn fail_next_delete(&self) {
        self.lock().fail_delete += 1;
    }

    /// Returns every recorded call, oldest first.
    pub fn calls(&self) -> Vec<RepoCall> {
        self.lock().calls.clone()
    }

    /// Returns only calls that change repository content.
    pub fn mutations(&self) -> Vec<RepoCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutation())
            .cloned()
            .collect()
    }

    /// Forgets recorded calls.
    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Returns a copy of a namespace, if present.
    pub fn namespace(&self, path: &str) -> Option<MemoryNamespace> {
        self.lock().namespaces.get(&normalize_path(path)).cloned()
    }

    /// Returns the content of one file, if present.
    pub fn file(&self, path: &str, filename: &str) -> Option<Vec<u8>> {
        self.lock()
            .namespaces
            .get(&normalize_path(path))
            .and_then(|ns| ns.files.get(filename).cloned())
    }

    /// Returns every namespace path.
    pub fn namespace_paths(&self) -> Vec<String> {
        self.lock().namespaces.keys().cloned().collect()
    }
}

fn take_failure(counter: &mut u32, what: &str) -> RepoResult<()> {
    if *counter > 0 {
        *counter -= 1;
        return Err(RepoError::Injected(what.to_string()));
    }
    Ok(())
}

#[async_trait]
impl RepoClient for MemoryRepo {
    fn provider_name(&self) -> &'static str {
        "Memory"
    }

    async fn is_ready(&self) -> RepoResult<bool> {
        let mut state = self.lock();
        state.calls.push(RepoCall::IsReady);
        if state.ready_polls >= state.ready_after {
            return Ok(true);
        }
        state.ready_polls += 1;
        Ok(false)
    }

    async fn namespace_exists(&self, path: &str) -> RepoResult<bool> {
        let path = normalize_path(path);
        let mut state = self.lock();
        state.calls.push(RepoCall::NamespaceExists(path.clone()));
        Ok(state.namespaces.contains_key(&path))
    }

    async fn write_batch(&self, version: &str, batches: &[Batch]) -> RepoResult<()> {
        let mut state = self.lock();
        state.calls.push(RepoCall::WriteBatch {
            version: version.to_string(),
            paths: batches.iter().map(|b| normalize_path(&b.basepath)).collect(),
        });
        take_failure(&mut state.fail_batch, "batch")?;

        for batch in batches {
            let ns = state
                .namespaces
                .entry(normalize_path(&batch.basepath))
                .or_default();
            for item in &batch.items {
                ns.files.insert(item.filename.clone(), item.content.clone());
            }
            ns.version = version.to_string();
        }
        Ok(())
    }

    async fn derive_namespace(&self, path: &str, base: &str, version: &str) -> RepoResult<()> {
        let path = normalize_path(path);
        let base = normalize_path(base);
        let mut state = self.lock();
        state.calls.push(RepoCall::Derive {
            path: path.clone(),
            base: base.clone(),
            version: version.to_string(),
        });
        take_failure(&mut state.fail_derive, "derive")?;

        let files = state
            .namespaces
            .get(&base)
            .map(|ns| ns.files.clone())
            .ok_or_else(|| RepoError::NotFound(base.clone()))?;
        let derived = state.namespaces.entry(path).or_default();
        for (name, content) in files {
            derived.files.entry(name).or_insert(content);
        }
        derived.base = Some(base);
        derived.version = version.to_string();
        Ok(())
    }

    async fn delete_namespace(&self, path: &str) -> RepoResult<()> {
        let path = normalize_path(path);
        let mut state = self.lock();
        state.calls.push(RepoCall::Delete(path.clone()));
        take_failure(&mut state.fail_delete, "delete")?;
        state.namespaces.remove(&path);
        Ok(())
    }
}
