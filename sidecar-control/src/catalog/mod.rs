//! Read-only views of mesh state consumed by the policy compiler.
//!
//! [`MeshCatalog`] answers routing and identity policy questions and exposes
//! the mesh configuration directly. [`KubeController`] resolves the
//! Kubernetes objects behind a proxy. Both must be safe to call from many
//! jobs at once.

mod snapshot;
mod types;

pub use snapshot::{MeshSnapshot, ProxyEntry, ServiceEntry, SnapshotCatalog, SnapshotFaults};
pub use types::{
    selector_matches, ChainSpec, EgressGatewayPolicy, EgressGatewayRule, EgressTrafficPolicy,
    Endpoint, HttpRouteMatch, HttpRoutePolicy, InboundListener, InboundTrafficPolicy, Namespace,
    OutboundListener, OutboundTrafficPolicy, PathMatchType, Plugin, PluginChain, PluginConfig, Pod,
    ServiceRoutePolicy, WeightedCluster,
};

use crate::config::MeshConfig;
use crate::error::{CatalogResult, KubeResult};
use crate::proxy::Proxy;
use sidecar_types::{MeshService, ServiceIdentity};

/// Routing, identity and plugin policy for the whole mesh.
pub trait MeshCatalog: Send + Sync {
    /// Current mesh-wide configuration.
    fn mesh_config(&self) -> MeshConfig;

    /// Inbound policy for the services fronted by `identity`.
    fn inbound_policy(
        &self,
        identity: &ServiceIdentity,
        services: &[MeshService],
    ) -> InboundTrafficPolicy;

    /// Outbound policy for `identity`.
    fn outbound_policy(&self, identity: &ServiceIdentity) -> OutboundTrafficPolicy;

    /// Egress policy for `identity`, if any applies.
    fn egress_policy(&self, identity: &ServiceIdentity) -> CatalogResult<Option<EgressTrafficPolicy>>;

    /// Mesh-wide egress gateway forwarding policy, if configured.
    fn egress_gateway_policy(&self) -> CatalogResult<Option<EgressGatewayPolicy>>;

    fn ingress_policy(&self, service: &MeshService) -> CatalogResult<Option<ServiceRoutePolicy>>;

    fn access_control_policy(
        &self,
        service: &MeshService,
    ) -> CatalogResult<Option<ServiceRoutePolicy>>;

    fn export_policy(&self, service: &MeshService) -> CatalogResult<Option<ServiceRoutePolicy>>;

    /// Endpoints backing an upstream cluster.
    ///
    /// `None` means the cluster is known but its endpoints have not been
    /// resolved yet. `Some(vec![])` means it resolved to nothing.
    fn upstream_endpoints(&self, cluster: &str) -> Option<Vec<Endpoint>>;

    fn plugins(&self) -> Vec<Plugin>;

    fn plugin_chains(&self) -> Vec<PluginChain>;

    fn plugin_configs(&self) -> Vec<PluginConfig>;
}

/// Kubernetes object lookups for connected proxies.
pub trait KubeController: Send + Sync {
    /// Every mesh service whose selector matches the proxy's pod.
    fn services_for_proxy(&self, proxy: &Proxy) -> KubeResult<Vec<MeshService>>;

    /// The pod the proxy runs in.
    fn pod_for_proxy(&self, proxy: &Proxy) -> KubeResult<Pod>;

    fn namespace(&self, name: &str) -> Option<Namespace>;
}
