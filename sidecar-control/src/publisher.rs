//! Content-addressed publishing of compiled documents.
//!
//! A document is fingerprinted with its publish metadata and certificate
//! key material stripped. Only a fingerprint that differs from the proxy's
//! last published one reaches the repository: the proxy namespace is
//! derived from the base at `fingerprint - 2` and `config.json` is written
//! at `fingerprint - 1`. A failed attempt deletes the namespace and leaves
//! the stored fingerprint alone, so the next run starts over cleanly.

use crate::config::{CodebasePaths, CONFIG_FILE};
use crate::document::{CertificateBlock, ConfigDocument};
use crate::error::PublishError;
use crate::proxy::{Proxy, ProxyState};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sidecar_repo_client::{Batch, BatchItem, RepoClient};
use sidecar_types::{Certificate, Fingerprint};
use std::sync::Arc;
use tracing::{error, info, warn};

/// What a publish attempt did.
#[derive(Debug)]
pub enum PublishOutcome {
    /// Policy-equivalent to the last publish; no repository call was made.
    Unchanged(Fingerprint),
    /// A new version was written.
    Published {
        previous: Option<Fingerprint>,
        current: Fingerprint,
    },
    /// The attempt failed and was rolled back.
    Failed(PublishError),
}

impl PublishOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

/// Strips publish metadata from `document` and fingerprints it together with
/// the plugin set version.
///
/// Of the certificate only the expiration is kept, so a rotated certificate
/// yields a new fingerprint.
pub fn fingerprint(
    document: &mut ConfigDocument,
    certificate: Option<&Certificate>,
    plugin_version: &str,
) -> Result<Fingerprint, serde_json::Error> {
    document.ts = None;
    document.version = None;
    document.certificate = certificate.map(CertificateBlock::expiration_only);

    let mut bytes = serde_json::to_vec(&*document)?;
    bytes.extend_from_slice(plugin_version.as_bytes());
    Ok(Fingerprint::from_digest(&Sha256::digest(&bytes)))
}

/// Publishes compiled documents to the repository.
pub struct VersionedPublisher {
    repo: Arc<dyn RepoClient>,
    paths: Arc<CodebasePaths>,
}

impl VersionedPublisher {
    pub fn new(repo: Arc<dyn RepoClient>, paths: Arc<CodebasePaths>) -> Self {
        Self { repo, paths }
    }

    /// Publishes `document` for `proxy` if it changed since the last
    /// successful publish. `state` must be held under the proxy's lock.
    pub async fn publish(
        &self,
        proxy: &Proxy,
        state: &mut ProxyState,
        mut document: ConfigDocument,
        plugin_version: &str,
    ) -> PublishOutcome {
        let current = match fingerprint(&mut document, state.certificate.as_ref(), plugin_version) {
            Ok(fp) => fp,
            Err(e) => {
                error!("Failed to serialize document for {}: {}", proxy, e);
                return PublishOutcome::Failed(e.into());
            }
        };
        let previous = state.last_published;
        if previous == Some(current) {
            return PublishOutcome::Unchanged(current);
        }

        info!(
            proxy = %proxy.key(),
            previous = ?previous.map(|fp| fp.value()),
            current = %current,
            "Publishing {} for {}",
            CONFIG_FILE,
            proxy
        );

        let path = self.paths.sidecar(&proxy.common_name_prefix());
        if let Err(e) = self
            .write(&path, &mut document, state.certificate.as_ref(), current)
            .await
        {
            error!("Failed to publish {} for {}: {}", CONFIG_FILE, proxy, e);
            if let Err(cleanup) = self.repo.delete_namespace(&path).await {
                warn!("Failed to roll back namespace {}: {}", path, cleanup);
            }
            return PublishOutcome::Failed(e);
        }

        state.last_published = Some(current);
        PublishOutcome::Published { previous, current }
    }

    async fn write(
        &self,
        path: &str,
        document: &mut ConfigDocument,
        certificate: Option<&Certificate>,
        fingerprint: Fingerprint,
    ) -> Result<(), PublishError> {
        self.repo
            .derive_namespace(
                path,
                &self.paths.base_repo(),
                &fingerprint.offset_back(2).to_string(),
            )
            .await
            .map_err(|source| PublishError::Derive {
                path: path.to_string(),
                source,
            })?;

        document.ts = Some(Utc::now());
        document.version = Some(fingerprint.to_string());
        if let (Some(block), Some(certificate)) = (document.certificate.as_mut(), certificate) {
            block.fill_material(certificate);
        }
        let content = serde_json::to_vec_pretty(&*document)?;

        let batch = Batch::new(path, vec![BatchItem::new(CONFIG_FILE, content)]);
        self.repo
            .write_batch(&fingerprint.offset_back(1).to_string(), &[batch])
            .await
            .map_err(|source| PublishError::Write {
                path: path.to_string(),
                source,
            })
    }
}
