//! Connected proxies and the registry that owns them.

use sidecar_types::{Certificate, Fingerprint, PodMetadata, ProxyKey, ServiceIdentity};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{Mutex, MutexGuard};

/// Per-proxy state mutated by jobs.
///
/// Only reachable through [`Proxy::lock`], so whichever job holds the guard
/// owns it exclusively.
#[derive(Debug, Default)]
pub struct ProxyState {
    /// Current workload certificate, if any.
    pub certificate: Option<Certificate>,
    /// Fingerprint of the last successfully published document.
    pub last_published: Option<Fingerprint>,
}

/// A connected sidecar proxy.
#[derive(Debug)]
pub struct Proxy {
    key: ProxyKey,
    identity: ServiceIdentity,
    certificate_serial: String,
    pod_metadata: Option<PodMetadata>,
    state: Mutex<ProxyState>,
}

impl Proxy {
    pub fn new(
        key: ProxyKey,
        identity: ServiceIdentity,
        certificate_serial: impl Into<String>,
        pod_metadata: Option<PodMetadata>,
    ) -> Self {
        Self {
            key,
            identity,
            certificate_serial: certificate_serial.into(),
            pod_metadata,
            state: Mutex::new(ProxyState::default()),
        }
    }

    pub fn key(&self) -> ProxyKey {
        self.key
    }

    pub fn identity(&self) -> &ServiceIdentity {
        &self.identity
    }

    /// Serial of the certificate the proxy connected with.
    pub fn certificate_serial(&self) -> &str {
        &self.certificate_serial
    }

    pub fn pod_metadata(&self) -> Option<&PodMetadata> {
        self.pod_metadata.as_ref()
    }

    /// `{key}.sidecar.{service-account}.{namespace}`; names the proxy's
    /// repository namespace.
    pub fn common_name_prefix(&self) -> String {
        self.identity.common_name_prefix(&self.key)
    }

    /// Acquires exclusive access to the proxy's mutable state.
    ///
    /// Released when the guard drops, on every exit path.
    pub async fn lock(&self) -> MutexGuard<'_, ProxyState> {
        self.state.lock().await
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.common_name_prefix())
    }
}

/// Connected proxies keyed by [`ProxyKey`].
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    proxies: RwLock<BTreeMap<ProxyKey, Arc<Proxy>>>,
}

impl ProxyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a proxy, replacing any previous one with the same key.
    pub fn register(&self, proxy: Proxy) -> Arc<Proxy> {
        let proxy = Arc::new(proxy);
        self.proxies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(proxy.key(), Arc::clone(&proxy));
        proxy
    }

    pub fn unregister(&self, key: &ProxyKey) -> Option<Arc<Proxy>> {
        self.proxies
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn get(&self, key: &ProxyKey) -> Option<Arc<Proxy>> {
        self.proxies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Every registered proxy, ordered by key.
    pub fn list(&self) -> Vec<Arc<Proxy>> {
        self.proxies
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.proxies.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
