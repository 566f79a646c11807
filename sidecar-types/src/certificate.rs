//! Issued workload certificates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A certificate issued to a proxy, with its key material in PEM form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub common_name: String,
    pub serial_number: String,
    pub cert_chain: String,
    pub private_key: String,
    pub issuing_ca: String,
    pub expiration: DateTime<Utc>,
}

impl Certificate {
    /// Layout used when the expiration is written into a sidecar document.
    pub const EXPIRATION_FORMAT: &'static str = "%Y-%m-%d %H:%M:%S";

    /// Expiration rendered in [`Self::EXPIRATION_FORMAT`].
    pub fn expiration_string(&self) -> String {
        self.expiration.format(Self::EXPIRATION_FORMAT).to_string()
    }
}
