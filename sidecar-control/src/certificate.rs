//! Certificate authority seam.

use crate::error::{CertificateError, CertificateResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sidecar_types::{Certificate, ServiceIdentity};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// What a certificate is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertKind {
    Service,
}

/// A request to issue a workload certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueRequest {
    pub common_name: String,
    pub identity: ServiceIdentity,
    pub kind: CertKind,
    /// Subject alternative names: every hostname of every fronted service.
    pub sans: Vec<String>,
    pub validity: Duration,
}

/// Issues and rotates workload certificates.
///
/// Implementations must tolerate concurrent issuance for distinct proxies.
pub trait CertificateAuthority: Send + Sync {
    fn trust_domain(&self) -> &str;

    /// A previously issued certificate for `common_name`, if cached.
    fn get_certificate(&self, common_name: &str) -> Option<Certificate>;

    fn issue(&self, request: &IssueRequest) -> CertificateResult<Certificate>;

    /// Whether `certificate` is due for reissue.
    fn should_rotate(&self, certificate: &Certificate) -> bool;
}

/// Pre-provisioned PEM material handed out by [`SnapshotAuthority`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PkiMaterial {
    #[serde(default = "default_trust_domain")]
    pub trust_domain: String,
    pub cert_chain: String,
    pub private_key: String,
    pub issuing_ca: String,
    /// Reissue once less than this much validity remains.
    #[serde(default = "default_rotate_before")]
    pub rotate_before_secs: u64,
}

fn default_trust_domain() -> String {
    "cluster.local".to_string()
}

fn default_rotate_before() -> u64 {
    60 * 60
}

/// A static PKI: every certificate carries the same pre-provisioned material
/// with a fresh serial and expiration.
#[derive(Debug)]
pub struct SnapshotAuthority {
    trust_domain: String,
    material: Option<PkiMaterial>,
    issued: Mutex<HashMap<String, Certificate>>,
}

impl SnapshotAuthority {
    /// An authority that issues from `material`, or refuses to issue when
    /// there is none.
    pub fn new(material: Option<PkiMaterial>) -> Self {
        let trust_domain = material
            .as_ref()
            .map(|m| m.trust_domain.clone())
            .unwrap_or_else(default_trust_domain);
        Self {
            trust_domain,
            material,
            issued: Mutex::new(HashMap::new()),
        }
    }

    fn issued(&self) -> MutexGuard<'_, HashMap<String, Certificate>> {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of certificates issued so far.
    pub fn issued_count(&self) -> usize {
        self.issued().len()
    }

    fn rotate_before(&self) -> chrono::Duration {
        let secs = self
            .material
            .as_ref()
            .map_or_else(default_rotate_before, |m| m.rotate_before_secs);
        i64::try_from(secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }
}

impl CertificateAuthority for SnapshotAuthority {
    fn trust_domain(&self) -> &str {
        &self.trust_domain
    }

    fn get_certificate(&self, common_name: &str) -> Option<Certificate> {
        self.issued().get(common_name).cloned()
    }

    fn issue(&self, request: &IssueRequest) -> CertificateResult<Certificate> {
        let material = self
            .material
            .as_ref()
            .ok_or_else(|| CertificateError::NoMaterial(request.identity.to_string()))?;
        let validity = chrono::Duration::from_std(request.validity)
            .map_err(|e| CertificateError::Issuance(e.to_string()))?;
        let expiration: DateTime<Utc> = Utc::now().checked_add_signed(validity).ok_or_else(|| {
            CertificateError::Issuance(format!("validity {:?} out of range", request.validity))
        })?;

        let certificate = Certificate {
            common_name: request.common_name.clone(),
            serial_number: format!("{:032x}", rand::random::<u128>()),
            cert_chain: material.cert_chain.clone(),
            private_key: material.private_key.clone(),
            issuing_ca: material.issuing_ca.clone(),
            expiration,
        };
        self.issued()
            .insert(request.common_name.clone(), certificate.clone());
        Ok(certificate)
    }

    fn should_rotate(&self, certificate: &Certificate) -> bool {
        certificate.expiration - Utc::now() < self.rotate_before()
    }
}
