//! Policy data returned by the mesh catalog.
//!
//! These are the raw inputs to compilation. Collections arrive in whatever
//! order the catalog produced them; the compiler canonicalizes them.

use serde::{Deserialize, Serialize};
use sidecar_types::{MeshService, ServiceIdentity};
use std::collections::BTreeMap;

/// How an HTTP route path is matched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PathMatchType {
    Exact,
    #[default]
    Prefix,
    Regex,
}

impl PathMatchType {
    /// Lower ranks are more specific.
    pub fn specificity_rank(self) -> u8 {
        match self {
            PathMatchType::Exact => 0,
            PathMatchType::Prefix => 1,
            PathMatchType::Regex => 2,
        }
    }
}

/// Request matching criteria for an HTTP route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRouteMatch {
    pub path: String,
    #[serde(default)]
    pub path_type: PathMatchType,
    #[serde(default)]
    pub methods: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// An upstream cluster and its share of traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightedCluster {
    pub cluster: String,
    #[serde(default)]
    pub weight: u32,
}

impl WeightedCluster {
    pub fn new(cluster: impl Into<String>, weight: u32) -> Self {
        Self {
            cluster: cluster.into(),
            weight,
        }
    }
}

/// A named HTTP route with its destinations and permitted callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRoutePolicy {
    pub name: String,
    #[serde(rename = "match")]
    pub route_match: HttpRouteMatch,
    #[serde(default)]
    pub clusters: Vec<WeightedCluster>,
    #[serde(default)]
    pub allowed_identities: Vec<ServiceIdentity>,
}

/// Traffic a proxy accepts on behalf of one of its services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundListener {
    pub service: String,
    pub port: u16,
    pub protocol: String,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub routes: Vec<HttpRoutePolicy>,
    pub cluster: String,
}

impl InboundListener {
    /// A catch-all listener for a service with no custom routes.
    pub fn for_service(service: &MeshService) -> Self {
        Self {
            service: service.name.clone(),
            port: service.target_port,
            protocol: service.protocol.clone(),
            hostnames: service.hostnames(),
            routes: Vec::new(),
            cluster: service.cluster_name(),
        }
    }
}

/// Inbound policy for every service a proxy fronts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundTrafficPolicy {
    #[serde(default)]
    pub listeners: Vec<InboundListener>,
}

/// Ingress, access-control or export policy attached to one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRoutePolicy {
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub source_ip_ranges: Vec<String>,
    #[serde(default)]
    pub routes: Vec<HttpRoutePolicy>,
}

fn default_protocol() -> String {
    "http".to_string()
}

/// Traffic a proxy originates towards upstream services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundListener {
    pub name: String,
    pub port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    #[serde(default)]
    pub destination_ip_ranges: Vec<String>,
    #[serde(default)]
    pub hostnames: Vec<String>,
    #[serde(default)]
    pub routes: Vec<HttpRoutePolicy>,
    #[serde(default)]
    pub tcp_clusters: Vec<WeightedCluster>,
}

impl OutboundListener {
    /// Every cluster this listener can route to.
    pub fn referenced_clusters(&self) -> impl Iterator<Item = &str> {
        self.routes
            .iter()
            .flat_map(|r| r.clusters.iter())
            .chain(self.tcp_clusters.iter())
            .map(|c| c.cluster.as_str())
    }
}

/// Outbound policy for one identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundTrafficPolicy {
    #[serde(default)]
    pub listeners: Vec<OutboundListener>,
    /// Upstream DNS name to resolvable addresses.
    #[serde(default)]
    pub services_resolvable_set: BTreeMap<String, Vec<String>>,
}

/// Egress policy for one identity: traffic leaving the mesh.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressTrafficPolicy {
    #[serde(default)]
    pub listeners: Vec<OutboundListener>,
}

/// One forwarding rule: named egress policies sent through gateways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EgressGatewayRule {
    pub name: String,
    #[serde(default)]
    pub egress_policies: Vec<String>,
    #[serde(default)]
    pub gateways: Vec<WeightedCluster>,
}

/// Mesh-wide egress gateway forwarding configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EgressGatewayPolicy {
    /// Gateways used for any egress traffic without a specific rule.
    #[serde(default)]
    pub global: Vec<WeightedCluster>,
    #[serde(default)]
    pub rules: Vec<EgressGatewayRule>,
}

/// A resolved upstream endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub weight: u32,
}

impl Endpoint {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
            weight: 0,
        }
    }

    /// `ip:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// A middleware script that can be mounted into sidecar chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub script: String,
}

/// Plugins mounted at one mount point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSpec {
    pub mount_point: String,
    #[serde(default)]
    pub plugins: Vec<String>,
}

/// Selects pods and mounts plugins into their sidecars.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginChain {
    pub name: String,
    pub namespace: String,
    /// Empty selects every namespace.
    #[serde(default)]
    pub namespace_selector: BTreeMap<String, String>,
    /// Empty selects every pod.
    #[serde(default)]
    pub pod_selector: BTreeMap<String, String>,
    #[serde(default)]
    pub chains: Vec<ChainSpec>,
}

/// Per-service configuration handed to a plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginConfig {
    pub name: String,
    pub namespace: String,
    pub plugin: String,
    #[serde(default)]
    pub destination_refs: Vec<MeshService>,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// A Kubernetes pod, reduced to what compilation needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// A Kubernetes namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

/// Whether every `key=value` in `selector` appears in `labels`.
pub fn selector_matches(selector: &BTreeMap<String, String>, labels: &BTreeMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
}
