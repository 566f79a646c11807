//! Mesh services fronted by proxies.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A Kubernetes service port participating in the mesh.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeshService {
    pub name: String,
    pub namespace: String,
    pub port: u16,
    #[serde(default)]
    pub target_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "http".to_string()
}

impl MeshService {
    /// Creates an HTTP service whose target port equals its port.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            port,
            target_port: port,
            protocol: default_protocol(),
        }
    }

    /// Every DNS name a client in the service's own namespace may use to
    /// reach it, short forms first, each followed by its `:port` variant.
    pub fn hostnames(&self) -> Vec<String> {
        let bases = [
            self.name.clone(),
            format!("{}.{}", self.name, self.namespace),
            format!("{}.{}.svc", self.name, self.namespace),
            format!("{}.{}.svc.cluster", self.name, self.namespace),
            format!("{}.{}.svc.cluster.local", self.name, self.namespace),
        ];
        bases
            .into_iter()
            .flat_map(|host| {
                let with_port = format!("{host}:{}", self.port);
                [host, with_port]
            })
            .collect()
    }

    /// Cluster name used for this service in compiled documents.
    pub fn cluster_name(&self) -> String {
        format!("{}/{}|{}", self.namespace, self.name, self.target_port)
    }
}

impl fmt::Display for MeshService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.namespace, self.name, self.port)
    }
}
