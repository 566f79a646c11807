//! The per-proxy configuration document.
//!
//! Serialized as PascalCase JSON into `config.json`. Every map is a
//! `BTreeMap` so key order is fixed; list order is fixed by
//! [`ConfigDocument::canonicalize`]. Together these make serialization a
//! function of content alone.

use crate::catalog::PathMatchType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sidecar_types::{Certificate, Probe};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Cluster name to weight.
pub type WeightedTargets = BTreeMap<String, u32>;

/// A compiled sidecar configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ConfigDocument {
    /// Publish time. Unset while fingerprinting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<DateTime<Utc>>,
    /// Published version. Unset while fingerprinting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub spec: MeshSpec,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateBlock>,
    /// Mount point to plugin names, in execution order.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub chains: BTreeMap<String, Vec<String>>,
    /// Service to plugin to mount point to plugin configuration.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_policies: BTreeMap<String, BTreeMap<String, BTreeMap<String, serde_json::Value>>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inbound: Option<InboundSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outbound: Option<TrafficSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub egress_policy: Option<TrafficSection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward: Option<ForwardSection>,
    /// Pod IP to `namespace/pod`.
    pub allowed_endpoints: BTreeMap<String, String>,
    #[serde(rename = "DNSResolveDB", skip_serializing_if = "BTreeMap::is_empty")]
    pub dns_resolve_db: BTreeMap<String, Vec<String>>,
}

/// Mesh-wide settings and pod probes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct MeshSpec {
    pub sidecar_log_level: String,
    pub feature_flags: FeatureFlags,
    pub traffic: TrafficFlags,
    pub probes: Probes,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub cluster_set: BTreeMap<String, String>,
    #[serde(rename = "LocalDNSProxy", skip_serializing_if = "Option::is_none")]
    pub local_dns_proxy: Option<LocalDnsProxy>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FeatureFlags {
    pub enable_sidecar_active_health_checks: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TrafficFlags {
    pub enable_egress: bool,
    pub enable_permissive_traffic_policy_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct Probes {
    pub startup_probes: Vec<Probe>,
    pub liveness_probes: Vec<Probe>,
    pub readiness_probes: Vec<Probe>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct LocalDnsProxy {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_upstream: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary_upstream: Option<String>,
}

/// Certificate section. Only `expiration` is present while fingerprinting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CertificateBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub common_name: Option<String>,
    pub expiration: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cert_chain: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    #[serde(rename = "IssuingCA", skip_serializing_if = "String::is_empty")]
    pub issuing_ca: String,
}

impl CertificateBlock {
    pub fn expiration_only(certificate: &Certificate) -> Self {
        Self {
            expiration: certificate.expiration_string(),
            ..Self::default()
        }
    }

    /// Adds the key material that must never be fingerprinted.
    pub fn fill_material(&mut self, certificate: &Certificate) {
        self.common_name = Some(certificate.common_name.clone());
        self.cert_chain = certificate.cert_chain.clone();
        self.private_key = certificate.private_key.clone();
        self.issuing_ca = certificate.issuing_ca.clone();
    }
}

/// One compiled HTTP route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct RouteRule {
    pub name: String,
    pub path: String,
    #[serde(rename = "Type")]
    pub path_type: PathMatchType,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    pub target_clusters: WeightedTargets,
    /// Principals allowed to use the route. Empty allows everyone.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_services: Vec<String>,
}

impl RouteRule {
    fn canonicalize(&mut self) {
        self.methods.sort();
        self.methods.dedup();
        self.allowed_services.sort();
        self.allowed_services.dedup();
    }
}

/// Most specific match type first, then longer paths, then by name; the
/// remaining fields break ties so the order is total.
impl Ord for RouteRule {
    fn cmp(&self, other: &Self) -> Ordering {
        self.path_type
            .specificity_rank()
            .cmp(&other.path_type.specificity_rank())
            .then_with(|| other.path.len().cmp(&self.path.len()))
            .then_with(|| self.path.cmp(&other.path))
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.methods.cmp(&other.methods))
            .then_with(|| self.headers.cmp(&other.headers))
            .then_with(|| self.target_clusters.cmp(&other.target_clusters))
            .then_with(|| self.allowed_services.cmp(&other.allowed_services))
    }
}

impl PartialOrd for RouteRule {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Inbound traffic, keyed by the local cluster of each fronted service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct InboundSection {
    pub traffic_matches: BTreeMap<String, InboundTrafficMatch>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct InboundTrafficMatch {
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "SourceIPRanges", skip_serializing_if = "Vec::is_empty")]
    pub source_ip_ranges: Vec<String>,
    pub http_host_port_2_service: BTreeMap<String, String>,
    pub http_service_route_rules: BTreeMap<String, Vec<RouteRule>>,
    pub target_clusters: WeightedTargets,
}

/// Outbound or egress traffic with the clusters it routes to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct TrafficSection {
    /// Port to listeners on that port.
    pub traffic_matches: BTreeMap<u16, Vec<OutboundTrafficMatch>>,
    pub clusters_configs: BTreeMap<String, ClusterConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct OutboundTrafficMatch {
    pub name: String,
    pub port: u16,
    pub protocol: String,
    #[serde(rename = "DestinationIPRanges", skip_serializing_if = "Vec::is_empty")]
    pub destination_ip_ranges: Vec<String>,
    pub http_host_port_2_service: BTreeMap<String, String>,
    pub http_service_route_rules: BTreeMap<String, Vec<RouteRule>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub target_clusters: WeightedTargets,
}

impl OutboundTrafficMatch {
    /// Listeners bound to explicit destination ranges match first.
    fn canonical_cmp(&self, other: &Self) -> Ordering {
        self.destination_ip_ranges
            .is_empty()
            .cmp(&other.destination_ip_ranges.is_empty())
            .then_with(|| self.name.cmp(&other.name))
            .then_with(|| self.protocol.cmp(&other.protocol))
            .then_with(|| self.destination_ip_ranges.cmp(&other.destination_ip_ranges))
            .then_with(|| self.http_host_port_2_service.cmp(&other.http_host_port_2_service))
            .then_with(|| self.http_service_route_rules.cmp(&other.http_service_route_rules))
            .then_with(|| self.target_clusters.cmp(&other.target_clusters))
    }
}

/// Endpoint address to weight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ClusterConfig {
    pub endpoints: BTreeMap<String, u32>,
}

/// Egress gateway forwarding.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ForwardSection {
    /// Rule name (`*` for the global rule) to gateway clusters.
    pub forward_matches: BTreeMap<String, WeightedTargets>,
    pub egress_gateways: BTreeMap<String, ClusterConfig>,
}

impl ConfigDocument {
    /// Puts every list into its canonical order.
    pub fn canonicalize(&mut self) {
        if let Some(inbound) = self.inbound.as_mut() {
            for traffic_match in inbound.traffic_matches.values_mut() {
                sort_dedup(&mut traffic_match.source_ip_ranges);
                canonicalize_rules(&mut traffic_match.http_service_route_rules);
            }
        }
        for section in [self.outbound.as_mut(), self.egress_policy.as_mut()]
            .into_iter()
            .flatten()
        {
            for matches in section.traffic_matches.values_mut() {
                for traffic_match in matches.iter_mut() {
                    sort_dedup(&mut traffic_match.destination_ip_ranges);
                    canonicalize_rules(&mut traffic_match.http_service_route_rules);
                }
                matches.sort_by(OutboundTrafficMatch::canonical_cmp);
            }
        }
        for addresses in self.dns_resolve_db.values_mut() {
            sort_dedup(addresses);
        }
    }
}

fn sort_dedup(values: &mut Vec<String>) {
    values.sort();
    values.dedup();
}

fn canonicalize_rules(rules: &mut BTreeMap<String, Vec<RouteRule>>) {
    for group in rules.values_mut() {
        group.iter_mut().for_each(RouteRule::canonicalize);
        group.sort();
    }
}
