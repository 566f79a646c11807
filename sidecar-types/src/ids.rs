//! Identifier types for connected proxies.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Unique identifier for a connected proxy.
/// Taken from the UUID embedded in the proxy's certificate common name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProxyKey(Uuid);

impl ProxyKey {
    /// Creates a new random proxy key.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a proxy key from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Parses a proxy key from a string.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }

    /// Stable hash used to route every job for this proxy to the same lane.
    #[must_use]
    pub fn lane_hash(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.0.as_u128().hash(&mut hasher);
        hasher.finish()
    }
}

impl Default for ProxyKey {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProxyKey {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The workload identity a proxy runs as: a Kubernetes service account.
///
/// Rendered as `namespace/service-account`, which is also its serialized
/// form so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceIdentity {
    namespace: String,
    service_account: String,
}

impl ServiceIdentity {
    /// Creates an identity from its namespace and service account.
    pub fn new(namespace: impl Into<String>, service_account: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            service_account: service_account.into(),
        }
    }

    /// The Kubernetes namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The Kubernetes service account.
    pub fn service_account(&self) -> &str {
        &self.service_account
    }

    /// Certificate common-name prefix for the proxy with the given key.
    pub fn common_name_prefix(&self, key: &ProxyKey) -> String {
        format!("{}.sidecar.{}.{}", key, self.service_account, self.namespace)
    }

    /// Authenticated principal name within a trust domain.
    pub fn principal(&self, trust_domain: &str) -> String {
        format!("{}.{}.{}", self.service_account, self.namespace, trust_domain)
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service_account)
    }
}

impl FromStr for ServiceIdentity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, sa)) if !ns.is_empty() && !sa.is_empty() && !sa.contains('/') => {
                Ok(Self::new(ns, sa))
            }
            _ => Err(Error::InvalidIdentity(s.to_string())),
        }
    }
}

impl Serialize for ServiceIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ServiceIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
