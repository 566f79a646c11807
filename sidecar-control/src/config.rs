//! Server and mesh configuration.
//!
//! [`ServerConfig`] is read once at startup. [`CodebasePaths`] is derived
//! from it exactly once and shared immutably by every component that needs
//! a repository path.

use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::time::Duration;

/// Base namespace name, before any configured prefix.
pub const BASE_CODEBASE: &str = "osm-edge-base";

/// Sidecar namespace prefix, before any configured prefix.
pub const SIDECAR_CODEBASE: &str = "osm-edge-sidecar";

/// The single file written into every proxy namespace.
pub const CONFIG_FILE: &str = "config.json";

/// Configuration for the repo server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Optional path prefix for all namespaces, e.g. a mesh name.
    pub codebase_prefix: Option<String>,
    /// Number of worker lanes (0 = available parallelism).
    pub workers: usize,
    /// Debounce window before a not-ready proxy is recompiled (ms).
    pub retry_delay_ms: u64,
    /// Interval between readiness polls during startup (ms).
    pub poll_interval_ms: u64,
    /// Overall timeout for each readiness wait during startup (ms).
    pub ready_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            codebase_prefix: None,
            workers: 0,
            retry_delay_ms: 5_000,
            poll_interval_ms: 5_000,
            ready_timeout_ms: 90_000,
        }
    }
}

impl ServerConfig {
    /// Resolved worker lane count.
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}

/// Repository namespace paths, computed once from [`ServerConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodebasePaths {
    base: String,
    sidecar_prefix: String,
}

impl CodebasePaths {
    /// Derives the paths for an optional prefix.
    pub fn new(prefix: Option<&str>) -> Self {
        match prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
            Some(prefix) => Self {
                base: format!("{prefix}/{BASE_CODEBASE}"),
                sidecar_prefix: format!("{prefix}/{SIDECAR_CODEBASE}"),
            },
            None => Self {
                base: BASE_CODEBASE.to_string(),
                sidecar_prefix: SIDECAR_CODEBASE.to_string(),
            },
        }
    }

    /// Paths for a server configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.codebase_prefix.as_deref())
    }

    /// The shared base namespace, as written during seeding.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The base namespace as referenced when deriving from it.
    pub fn base_repo(&self) -> String {
        format!("/{}", self.base)
    }

    /// The private namespace for one proxy.
    pub fn sidecar(&self, common_name_prefix: &str) -> String {
        format!("{}/{}", self.sidecar_prefix, common_name_prefix)
    }
}

/// One cluster-set property forwarded to every sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSetProperty {
    pub name: String,
    pub value: String,
}

/// Local DNS proxy settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LocalDnsProxyConfig {
    pub enable: bool,
    pub primary_upstream: Option<String>,
    pub secondary_upstream: Option<String>,
}

/// Mesh-wide settings, as exposed by the mesh catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MeshConfig {
    pub sidecar_log_level: String,
    pub enable_sidecar_active_health_checks: bool,
    pub enable_egress: bool,
    pub enable_permissive_traffic_policy_mode: bool,
    pub local_dns_proxy: LocalDnsProxyConfig,
    pub cluster_set: Vec<ClusterSetProperty>,
    pub sidecar_disabled_mtls: bool,
    pub enable_plugin_policy: bool,
    pub service_cert_validity_secs: u64,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            sidecar_log_level: "error".to_string(),
            enable_sidecar_active_health_checks: false,
            enable_egress: false,
            enable_permissive_traffic_policy_mode: false,
            local_dns_proxy: LocalDnsProxyConfig::default(),
            cluster_set: Vec::new(),
            sidecar_disabled_mtls: false,
            enable_plugin_policy: false,
            service_cert_validity_secs: 24 * 60 * 60,
        }
    }
}

impl MeshConfig {
    pub fn service_cert_validity(&self) -> Duration {
        Duration::from_secs(self.service_cert_validity_secs)
    }
}
