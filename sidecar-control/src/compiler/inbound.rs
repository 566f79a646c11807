use crate::catalog::{HttpRoutePolicy, MeshCatalog, PathMatchType, ServiceRoutePolicy};
use crate::document::{ConfigDocument, InboundSection, InboundTrafficMatch, RouteRule, WeightedTargets};
use crate::error::CatalogResult;
use sidecar_types::{MeshService, ServiceIdentity};
use tracing::warn;

/// Builds inbound traffic matches for every fronted service, then merges in
/// per-service ingress, access-control and export policies. A sub-policy
/// that fails to load is left out.
pub(super) fn compile(
    catalog: &dyn MeshCatalog,
    trust_domain: &str,
    identity: &ServiceIdentity,
    services: &[MeshService],
    document: &mut ConfigDocument,
) {
    let policy = catalog.inbound_policy(identity, services);
    let mut section = InboundSection::default();

    // The first listener of a cluster sets its port, and later hostnames
    // override earlier ones, so fold in a fixed order.
    let mut listeners: Vec<_> = policy.listeners.iter().collect();
    listeners.sort_by(|a, b| {
        (&a.cluster, a.port, &a.protocol, &a.service, &a.hostnames)
            .cmp(&(&b.cluster, b.port, &b.protocol, &b.service, &b.hostnames))
    });

    for listener in listeners {
        let traffic_match = section
            .traffic_matches
            .entry(listener.cluster.clone())
            .or_insert_with(|| InboundTrafficMatch {
                port: listener.port,
                protocol: listener.protocol.clone(),
                ..InboundTrafficMatch::default()
            });
        for host in &listener.hostnames {
            traffic_match
                .http_host_port_2_service
                .insert(host.clone(), listener.service.clone());
        }
        traffic_match
            .target_clusters
            .insert(listener.cluster.clone(), 100);

        let rules = traffic_match
            .http_service_route_rules
            .entry(listener.service.clone())
            .or_default();
        if listener.routes.is_empty() {
            rules.push(catch_all(&listener.service, &listener.cluster));
        } else {
            rules.extend(
                listener
                    .routes
                    .iter()
                    .map(|r| route_rule(r, trust_domain, Some(&listener.cluster))),
            );
        }
    }

    for service in services {
        let lookups: [(&str, CatalogResult<Option<ServiceRoutePolicy>>); 3] = [
            ("ingress", catalog.ingress_policy(service)),
            ("acl", catalog.access_control_policy(service)),
            ("export", catalog.export_policy(service)),
        ];
        for (kind, lookup) in lookups {
            match lookup {
                Ok(Some(policy)) => merge(&mut section, service, kind, &policy, trust_domain),
                Ok(None) => {}
                Err(e) => warn!("Failed to get {} policy for {}: {}", kind, service, e),
            }
        }
    }

    if !section.traffic_matches.is_empty() {
        document.inbound = Some(section);
    }
}

fn merge(
    section: &mut InboundSection,
    service: &MeshService,
    kind: &str,
    policy: &ServiceRoutePolicy,
    trust_domain: &str,
) {
    let cluster = format!("{}/{}|{}", service.namespace, service.name, policy.port);
    let traffic_match = section
        .traffic_matches
        .entry(cluster.clone())
        .or_insert_with(|| InboundTrafficMatch {
            port: policy.port,
            protocol: policy.protocol.clone(),
            ..InboundTrafficMatch::default()
        });
    traffic_match.target_clusters.entry(cluster.clone()).or_insert(100);
    traffic_match
        .source_ip_ranges
        .extend(policy.source_ip_ranges.iter().cloned());
    traffic_match
        .http_service_route_rules
        .entry(format!("{}:{}", kind, service.name))
        .or_default()
        .extend(
            policy
                .routes
                .iter()
                .map(|r| route_rule(r, trust_domain, Some(&cluster))),
        );
}

fn catch_all(service: &str, cluster: &str) -> RouteRule {
    RouteRule {
        name: service.to_string(),
        path: "/".to_string(),
        path_type: PathMatchType::Prefix,
        target_clusters: WeightedTargets::from([(cluster.to_string(), 100)]),
        ..RouteRule::default()
    }
}

/// Compiles one HTTP route. Routes without clusters go to `fallback`.
pub(super) fn route_rule(
    route: &HttpRoutePolicy,
    trust_domain: &str,
    fallback: Option<&str>,
) -> RouteRule {
    let mut target_clusters = WeightedTargets::new();
    for cluster in &route.clusters {
        let weight = target_clusters.entry(cluster.cluster.clone()).or_insert(0);
        *weight = weight.saturating_add(cluster.weight);
    }
    if target_clusters.is_empty() {
        if let Some(fallback) = fallback {
            target_clusters.insert(fallback.to_string(), 100);
        }
    }
    RouteRule {
        name: route.name.clone(),
        path: route.route_match.path.clone(),
        path_type: route.route_match.path_type,
        methods: route.route_match.methods.clone(),
        headers: route.route_match.headers.clone(),
        target_clusters,
        allowed_services: route
            .allowed_identities
            .iter()
            .map(|i| i.principal(trust_domain))
            .collect(),
    }
}
