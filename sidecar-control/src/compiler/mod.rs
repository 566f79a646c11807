//! Policy compilation.
//!
//! [`PolicyCompiler::compile`] builds a fresh [`ConfigDocument`] for one
//! proxy by running a fixed sequence of stages over catalog data. A stage
//! that finds data missing records itself as not ready and the pipeline
//! carries on, so the result is always the best document available now.

mod balance;
mod inbound;
mod outbound;
mod plugins;

use crate::catalog::{KubeController, MeshCatalog};
use crate::certificate::{CertKind, CertificateAuthority, IssueRequest};
use crate::config::MeshConfig;
use crate::document::{ConfigDocument, LocalDnsProxy, Probes};
use crate::plugin::PluginRegistry;
use crate::proxy::{Proxy, ProxyRegistry, ProxyState};
use sidecar_types::MeshService;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Compilation stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Probes,
    Features,
    Certificates,
    Plugins,
    Inbound,
    Outbound,
    Egress,
    Forward,
    Balance,
    Reorder,
    Endpoints,
}

impl Stage {
    pub const ORDER: [Stage; 11] = [
        Stage::Probes,
        Stage::Features,
        Stage::Certificates,
        Stage::Plugins,
        Stage::Inbound,
        Stage::Outbound,
        Stage::Egress,
        Stage::Forward,
        Stage::Balance,
        Stage::Reorder,
        Stage::Endpoints,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Probes => "probes",
            Stage::Features => "features",
            Stage::Certificates => "certificates",
            Stage::Plugins => "plugins",
            Stage::Inbound => "inbound",
            Stage::Outbound => "outbound",
            Stage::Egress => "egress",
            Stage::Forward => "forward",
            Stage::Balance => "balance",
            Stage::Reorder => "reorder",
            Stage::Endpoints => "endpoints",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of one compilation.
#[derive(Debug, Clone)]
pub struct Compiled {
    pub document: ConfigDocument,
    /// Version tag of the plugin set the document was built against; empty
    /// when no plugins apply.
    pub plugin_version: String,
    /// Stages that found data missing.
    pub not_ready: Vec<Stage>,
}

impl Compiled {
    /// Whether every stage had the data it needed.
    pub fn is_ready(&self) -> bool {
        self.not_ready.is_empty()
    }
}

/// Turns catalog state into configuration documents.
pub struct PolicyCompiler {
    catalog: Arc<dyn MeshCatalog>,
    kube: Arc<dyn KubeController>,
    authority: Arc<dyn CertificateAuthority>,
    registry: Arc<ProxyRegistry>,
    plugins: PluginRegistry,
}

impl PolicyCompiler {
    pub fn new(
        catalog: Arc<dyn MeshCatalog>,
        kube: Arc<dyn KubeController>,
        authority: Arc<dyn CertificateAuthority>,
        registry: Arc<ProxyRegistry>,
    ) -> Self {
        Self {
            catalog,
            kube,
            authority,
            registry,
            plugins: PluginRegistry::new(),
        }
    }

    pub fn plugin_registry(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Compiles the document for `proxy`.
    ///
    /// `state` must come from the proxy's own lock; the certificate stage
    /// updates it. `services` are the services the proxy fronts.
    pub fn compile(
        &self,
        proxy: &Proxy,
        state: &mut ProxyState,
        services: &[MeshService],
    ) -> Compiled {
        let mesh = self.catalog.mesh_config();
        let trust_domain = self.authority.trust_domain();
        let identity = proxy.identity();
        let mut document = ConfigDocument::default();
        let mut not_ready = Vec::new();

        probes(proxy, &mut document);
        features(&mesh, &mut document);
        self.certificates(proxy, state, &mesh, services);
        let plugin_version = plugins::compile(self, proxy, &mesh, &mut document);
        inbound::compile(self.catalog.as_ref(), trust_domain, identity, services, &mut document);
        if !outbound::compile_outbound(self.catalog.as_ref(), trust_domain, identity, &mut document) {
            not_ready.push(Stage::Outbound);
        }
        if !outbound::compile_egress(self.catalog.as_ref(), trust_domain, identity, &mut document) {
            not_ready.push(Stage::Egress);
        }
        if !outbound::compile_forward(self.catalog.as_ref(), &mut document) {
            not_ready.push(Stage::Forward);
        }
        balance::rebalance(&mut document);
        document.canonicalize();
        if !self.endpoints(&mut document) {
            not_ready.push(Stage::Endpoints);
        }

        if !not_ready.is_empty() {
            debug!(
                "Compiled {} with stages not ready: {:?}",
                proxy,
                not_ready.iter().map(|s| s.name()).collect::<Vec<_>>()
            );
        }
        Compiled {
            document,
            plugin_version,
            not_ready,
        }
    }

    fn certificates(
        &self,
        proxy: &Proxy,
        state: &mut ProxyState,
        mesh: &MeshConfig,
        services: &[MeshService],
    ) {
        if mesh.sidecar_disabled_mtls {
            state.certificate = None;
            return;
        }

        let common_name = proxy.identity().principal(self.authority.trust_domain());
        if state.certificate.is_none() {
            state.certificate = self.authority.get_certificate(&common_name);
        }
        let due = state
            .certificate
            .as_ref()
            .is_none_or(|c| self.authority.should_rotate(c));
        if !due {
            return;
        }

        let request = IssueRequest {
            common_name,
            identity: proxy.identity().clone(),
            kind: CertKind::Service,
            sans: services.iter().flat_map(MeshService::hostnames).collect(),
            validity: mesh.service_cert_validity(),
        };
        match self.authority.issue(&request) {
            Ok(certificate) => {
                debug!("Issued certificate {} for {}", certificate.serial_number, proxy);
                state.certificate = Some(certificate);
            }
            Err(e) => {
                warn!("Failed to issue certificate for {}: {}", proxy, e);
                state.certificate = None;
            }
        }
    }

    /// Allow-lists the pod IP of every registered proxy.
    fn endpoints(&self, document: &mut ConfigDocument) -> bool {
        let mut ready = true;
        for peer in self.registry.list() {
            match self.kube.pod_for_proxy(&peer) {
                Ok(pod) => match pod.ip {
                    Some(ip) => {
                        document
                            .allowed_endpoints
                            .insert(ip, format!("{}/{}", pod.namespace, pod.name));
                    }
                    None => {
                        debug!("Pod {}/{} has no IP yet", pod.namespace, pod.name);
                        ready = false;
                    }
                },
                Err(e) => {
                    debug!("Could not resolve pod for {}: {}", peer, e);
                    ready = false;
                }
            }
        }
        ready
    }
}

fn probes(proxy: &Proxy, document: &mut ConfigDocument) {
    if let Some(pod) = proxy.pod_metadata() {
        document.spec.probes = Probes {
            startup_probes: pod.startup_probes.clone(),
            liveness_probes: pod.liveness_probes.clone(),
            readiness_probes: pod.readiness_probes.clone(),
        };
    }
}

fn features(mesh: &MeshConfig, document: &mut ConfigDocument) {
    let spec = &mut document.spec;
    spec.sidecar_log_level = mesh.sidecar_log_level.clone();
    spec.feature_flags.enable_sidecar_active_health_checks =
        mesh.enable_sidecar_active_health_checks;
    spec.traffic.enable_egress = mesh.enable_egress;
    spec.traffic.enable_permissive_traffic_policy_mode =
        mesh.enable_permissive_traffic_policy_mode;
    spec.local_dns_proxy = mesh.local_dns_proxy.enable.then(|| LocalDnsProxy {
        primary_upstream: mesh.local_dns_proxy.primary_upstream.clone(),
        secondary_upstream: mesh.local_dns_proxy.secondary_upstream.clone(),
    });
    spec.cluster_set = mesh
        .cluster_set
        .iter()
        .map(|p| (p.name.clone(), p.value.clone()))
        .collect();
}
