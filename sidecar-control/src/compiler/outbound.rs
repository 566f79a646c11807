//! Outbound, egress and forward stages.
//!
//! Each returns `false` when some upstream cluster it references has no
//! resolved endpoints yet. Whatever was compiled is kept on the document.

use super::inbound::route_rule;
use crate::catalog::{Endpoint, MeshCatalog, OutboundListener, WeightedCluster};
use crate::document::{
    ClusterConfig, ConfigDocument, ForwardSection, OutboundTrafficMatch, TrafficSection,
    WeightedTargets,
};
use sidecar_types::ServiceIdentity;
use std::collections::BTreeSet;
use tracing::debug;

/// Rule name used for gateways that apply to all egress traffic.
const GLOBAL_FORWARD: &str = "*";

pub(super) fn compile_outbound(
    catalog: &dyn MeshCatalog,
    trust_domain: &str,
    identity: &ServiceIdentity,
    document: &mut ConfigDocument,
) -> bool {
    let policy = catalog.outbound_policy(identity);
    if !policy.services_resolvable_set.is_empty() {
        document.dns_resolve_db = policy.services_resolvable_set.clone();
    }
    if policy.listeners.is_empty() {
        return true;
    }
    let (section, ready) = traffic_section(catalog, trust_domain, &policy.listeners);
    document.outbound = Some(section);
    ready
}

pub(super) fn compile_egress(
    catalog: &dyn MeshCatalog,
    trust_domain: &str,
    identity: &ServiceIdentity,
    document: &mut ConfigDocument,
) -> bool {
    let policy = match catalog.egress_policy(identity) {
        Ok(Some(policy)) => policy,
        Ok(None) => return true,
        Err(e) => {
            debug!("Egress policy for {} unavailable: {}", identity, e);
            return false;
        }
    };
    if policy.listeners.is_empty() {
        return true;
    }
    let (section, ready) = traffic_section(catalog, trust_domain, &policy.listeners);
    document.egress_policy = Some(section);
    ready
}

/// Routes egress traffic through gateways. A rule applies when one of its
/// egress policies names a listener in this proxy's egress section.
pub(super) fn compile_forward(catalog: &dyn MeshCatalog, document: &mut ConfigDocument) -> bool {
    let policy = match catalog.egress_gateway_policy() {
        Ok(Some(policy)) => policy,
        Ok(None) => return true,
        Err(e) => {
            debug!("Egress gateway policy unavailable: {}", e);
            return false;
        }
    };

    let egress_names: BTreeSet<String> = document
        .egress_policy
        .iter()
        .flat_map(|s| s.traffic_matches.values().flatten())
        .map(|m| m.name.clone())
        .collect();

    let mut section = ForwardSection::default();
    if !policy.global.is_empty() {
        section
            .forward_matches
            .insert(GLOBAL_FORWARD.to_string(), weighted(&policy.global));
    }
    // Rules sharing a name resolve to the greatest gateway set.
    let mut applied: Vec<(&str, WeightedTargets)> = policy
        .rules
        .iter()
        .filter(|rule| !rule.gateways.is_empty())
        .filter(|rule| {
            rule.egress_policies
                .iter()
                .any(|name| egress_names.contains(name))
        })
        .map(|rule| (rule.name.as_str(), weighted(&rule.gateways)))
        .collect();
    applied.sort();
    for (name, targets) in applied {
        section.forward_matches.insert(name.to_string(), targets);
    }
    if section.forward_matches.is_empty() {
        return true;
    }

    let gateways: BTreeSet<String> = section
        .forward_matches
        .values()
        .flat_map(|targets| targets.keys().cloned())
        .collect();
    let mut ready = true;
    for gateway in gateways {
        match catalog.upstream_endpoints(&gateway) {
            Some(endpoints) => {
                section
                    .egress_gateways
                    .insert(gateway, cluster_config(&endpoints));
            }
            None => {
                debug!("Endpoints for gateway {} not resolved yet", gateway);
                ready = false;
            }
        }
    }
    document.forward = Some(section);
    ready
}

fn traffic_section(
    catalog: &dyn MeshCatalog,
    trust_domain: &str,
    listeners: &[OutboundListener],
) -> (TrafficSection, bool) {
    let mut section = TrafficSection::default();
    let mut clusters = BTreeSet::new();
    for listener in listeners {
        section
            .traffic_matches
            .entry(listener.port)
            .or_default()
            .push(traffic_match(listener, trust_domain));
        clusters.extend(listener.referenced_clusters().map(str::to_string));
    }

    let mut ready = true;
    for cluster in clusters {
        match catalog.upstream_endpoints(&cluster) {
            Some(endpoints) => {
                section
                    .clusters_configs
                    .insert(cluster, cluster_config(&endpoints));
            }
            None => {
                debug!("Endpoints for cluster {} not resolved yet", cluster);
                ready = false;
            }
        }
    }
    (section, ready)
}

fn traffic_match(listener: &OutboundListener, trust_domain: &str) -> OutboundTrafficMatch {
    let mut traffic_match = OutboundTrafficMatch {
        name: listener.name.clone(),
        port: listener.port,
        protocol: listener.protocol.clone(),
        destination_ip_ranges: listener.destination_ip_ranges.clone(),
        target_clusters: weighted(&listener.tcp_clusters),
        ..OutboundTrafficMatch::default()
    };
    for host in &listener.hostnames {
        traffic_match
            .http_host_port_2_service
            .insert(host.clone(), listener.name.clone());
    }
    if !listener.routes.is_empty() {
        traffic_match.http_service_route_rules.insert(
            listener.name.clone(),
            listener
                .routes
                .iter()
                .map(|r| route_rule(r, trust_domain, None))
                .collect(),
        );
    }
    traffic_match
}

fn weighted(clusters: &[WeightedCluster]) -> WeightedTargets {
    let mut targets = WeightedTargets::new();
    for cluster in clusters {
        let weight = targets.entry(cluster.cluster.clone()).or_insert(0);
        *weight = weight.saturating_add(cluster.weight);
    }
    targets
}

/// Raw endpoint weights; the balance stage normalizes them.
fn cluster_config(endpoints: &[Endpoint]) -> ClusterConfig {
    let mut config = ClusterConfig::default();
    for endpoint in endpoints {
        let weight = config.endpoints.entry(endpoint.address()).or_insert(0);
        *weight = (*weight).max(endpoint.weight);
    }
    config
}
