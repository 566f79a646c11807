//! A static mesh catalog loaded from a JSON snapshot.
//!
//! The snapshot holds every input the compiler reads, keyed the way the
//! catalog queries them. It can be swapped or edited in place, which is how
//! the daemon resyncs and how tests change policy between job runs.

use super::types::{
    selector_matches, EgressGatewayPolicy, EgressTrafficPolicy, Endpoint, InboundListener,
    InboundTrafficPolicy, Namespace, OutboundTrafficPolicy, Plugin, PluginChain, PluginConfig, Pod,
    ServiceRoutePolicy,
};
use super::{KubeController, MeshCatalog};
use crate::certificate::PkiMaterial;
use crate::config::MeshConfig;
use crate::error::{CatalogError, CatalogResult, KubeError, KubeResult, SnapshotError};
use crate::proxy::Proxy;
use serde::{Deserialize, Serialize};
use sidecar_types::{MeshService, PodMetadata, ProxyKey, ServiceIdentity};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

/// A mesh service and the pod labels it selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceEntry {
    #[serde(flatten)]
    pub service: MeshService,
    /// Empty selects nothing.
    #[serde(default)]
    pub selector: BTreeMap<String, String>,
}

impl ServiceEntry {
    /// The service with an unset target port defaulted to its port.
    pub fn resolved(&self) -> MeshService {
        let mut service = self.service.clone();
        if service.target_port == 0 {
            service.target_port = service.port;
        }
        service
    }
}

/// A proxy expected to connect, as listed in a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyEntry {
    pub key: ProxyKey,
    pub identity: ServiceIdentity,
    #[serde(default)]
    pub certificate_serial: String,
    #[serde(default)]
    pub pod: Option<PodMetadata>,
}

impl ProxyEntry {
    pub fn into_proxy(self) -> Proxy {
        Proxy::new(self.key, self.identity, self.certificate_serial, self.pod)
    }
}

/// Switches that make catalog queries fail, for exercising degraded paths.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SnapshotFaults {
    pub egress_not_ready: bool,
    pub egress_gateway_not_ready: bool,
    pub sub_policy_errors: bool,
}

/// Everything the catalog knows, in serializable form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshSnapshot {
    pub mesh_config: MeshConfig,
    pub pki: Option<PkiMaterial>,
    pub services: Vec<ServiceEntry>,
    pub pods: Vec<Pod>,
    pub namespaces: Vec<Namespace>,
    pub proxies: Vec<ProxyEntry>,
    /// Explicit inbound policy; identities without an entry get one
    /// catch-all listener per service.
    pub inbound: BTreeMap<ServiceIdentity, InboundTrafficPolicy>,
    pub outbound: BTreeMap<ServiceIdentity, OutboundTrafficPolicy>,
    pub egress: BTreeMap<ServiceIdentity, EgressTrafficPolicy>,
    pub egress_gateway: Option<EgressGatewayPolicy>,
    /// Keyed by `namespace/name:port`.
    pub ingress: BTreeMap<String, ServiceRoutePolicy>,
    pub access_control: BTreeMap<String, ServiceRoutePolicy>,
    pub export: BTreeMap<String, ServiceRoutePolicy>,
    /// Cluster name to endpoints. Missing clusters are unresolved.
    pub endpoints: BTreeMap<String, Vec<Endpoint>>,
    pub plugins: Vec<Plugin>,
    pub plugin_chains: Vec<PluginChain>,
    pub plugin_configs: Vec<PluginConfig>,
    pub faults: SnapshotFaults,
}

impl MeshSnapshot {
    /// Parses a snapshot from JSON.
    pub fn from_json(bytes: &[u8]) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Reads and parses a snapshot file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let bytes = std::fs::read(path)?;
        Self::from_json(&bytes)
    }

    fn pod(&self, namespace: &str, name: &str) -> Option<&Pod> {
        self.pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
    }
}

/// [`MeshCatalog`] and [`KubeController`] backed by a [`MeshSnapshot`].
#[derive(Debug, Default)]
pub struct SnapshotCatalog {
    snapshot: RwLock<MeshSnapshot>,
}

impl SnapshotCatalog {
    pub fn new(snapshot: MeshSnapshot) -> Self {
        Self {
            snapshot: RwLock::new(snapshot),
        }
    }

    /// Loads the catalog from a snapshot file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        Ok(Self::new(MeshSnapshot::load(path)?))
    }

    fn read(&self) -> RwLockReadGuard<'_, MeshSnapshot> {
        self.snapshot.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Edits the snapshot in place.
    pub fn update<F: FnOnce(&mut MeshSnapshot)>(&self, f: F) {
        let mut guard = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard);
    }

    /// Replaces the whole snapshot.
    pub fn replace(&self, snapshot: MeshSnapshot) {
        self.update(|s| *s = snapshot);
    }

    /// Returns a copy of the current snapshot.
    pub fn snapshot(&self) -> MeshSnapshot {
        self.read().clone()
    }

    fn service_policy(
        &self,
        select: impl FnOnce(&MeshSnapshot) -> &BTreeMap<String, ServiceRoutePolicy>,
        kind: &str,
        service: &MeshService,
    ) -> CatalogResult<Option<ServiceRoutePolicy>> {
        let snapshot = self.read();
        if snapshot.faults.sub_policy_errors {
            return Err(CatalogError::Query(format!("{kind} policy for {service}")));
        }
        Ok(select(&snapshot).get(&service.to_string()).cloned())
    }
}

impl MeshCatalog for SnapshotCatalog {
    fn mesh_config(&self) -> MeshConfig {
        self.read().mesh_config.clone()
    }

    fn inbound_policy(
        &self,
        identity: &ServiceIdentity,
        services: &[MeshService],
    ) -> InboundTrafficPolicy {
        if let Some(policy) = self.read().inbound.get(identity) {
            return policy.clone();
        }
        InboundTrafficPolicy {
            listeners: services.iter().map(InboundListener::for_service).collect(),
        }
    }

    fn outbound_policy(&self, identity: &ServiceIdentity) -> OutboundTrafficPolicy {
        self.read().outbound.get(identity).cloned().unwrap_or_default()
    }

    fn egress_policy(&self, identity: &ServiceIdentity) -> CatalogResult<Option<EgressTrafficPolicy>> {
        let snapshot = self.read();
        if snapshot.faults.egress_not_ready {
            return Err(CatalogError::NotReady(format!("egress policy for {identity}")));
        }
        Ok(snapshot.egress.get(identity).cloned())
    }

    fn egress_gateway_policy(&self) -> CatalogResult<Option<EgressGatewayPolicy>> {
        let snapshot = self.read();
        if snapshot.faults.egress_gateway_not_ready {
            return Err(CatalogError::NotReady("egress gateway policy".to_string()));
        }
        Ok(snapshot.egress_gateway.clone())
    }

    fn ingress_policy(&self, service: &MeshService) -> CatalogResult<Option<ServiceRoutePolicy>> {
        self.service_policy(|s| &s.ingress, "ingress", service)
    }

    fn access_control_policy(
        &self,
        service: &MeshService,
    ) -> CatalogResult<Option<ServiceRoutePolicy>> {
        self.service_policy(|s| &s.access_control, "access control", service)
    }

    fn export_policy(&self, service: &MeshService) -> CatalogResult<Option<ServiceRoutePolicy>> {
        self.service_policy(|s| &s.export, "export", service)
    }

    fn upstream_endpoints(&self, cluster: &str) -> Option<Vec<Endpoint>> {
        self.read().endpoints.get(cluster).cloned()
    }

    fn plugins(&self) -> Vec<Plugin> {
        self.read().plugins.clone()
    }

    fn plugin_chains(&self) -> Vec<PluginChain> {
        self.read().plugin_chains.clone()
    }

    fn plugin_configs(&self) -> Vec<PluginConfig> {
        self.read().plugin_configs.clone()
    }
}

impl KubeController for SnapshotCatalog {
    fn services_for_proxy(&self, proxy: &Proxy) -> KubeResult<Vec<MeshService>> {
        let pod = self
            .pod_for_proxy(proxy)
            .map_err(|e| KubeError::ServicesUnavailable {
                proxy: proxy.to_string(),
                reason: e.to_string(),
            })?;
        Ok(self
            .read()
            .services
            .iter()
            .filter(|entry| {
                entry.service.namespace == pod.namespace
                    && !entry.selector.is_empty()
                    && selector_matches(&entry.selector, &pod.labels)
            })
            .map(ServiceEntry::resolved)
            .collect())
    }

    fn pod_for_proxy(&self, proxy: &Proxy) -> KubeResult<Pod> {
        let metadata = proxy
            .pod_metadata()
            .ok_or_else(|| KubeError::PodNotFound(proxy.to_string()))?;
        self.read()
            .pod(&metadata.namespace, &metadata.pod_name)
            .cloned()
            .ok_or_else(|| KubeError::PodNotFound(proxy.to_string()))
    }

    fn namespace(&self, name: &str) -> Option<Namespace> {
        self.read().namespaces.iter().find(|n| n.name == name).cloned()
    }
}
