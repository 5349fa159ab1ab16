//! Normalized routes derived from ingress path rules

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Path matching mode understood by the proxy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PathType {
    Exact,
    Prefix,
}

impl PathType {
    /// Normalize an ingress `pathType`
    ///
    /// Only `Exact` keeps exact matching. `Prefix`, `ImplementationSpecific`,
    /// unset and unknown values all become prefix matches.
    pub fn from_ingress(path_type: Option<&str>) -> Self {
        match path_type {
            Some("Exact") => PathType::Exact,
            _ => PathType::Prefix,
        }
    }
}

/// One ingress path resolved to a backend address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub path: String,
    /// Empty host matches any host
    pub host: String,
    pub path_type: PathType,
    /// Backend address as `<service>.<namespace>.svc.cluster.local:<port>`
    pub resource: String,
}

impl Route {
    pub fn new(
        path: impl Into<String>,
        host: impl Into<String>,
        path_type: PathType,
        resource: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            path_type,
            resource: resource.into(),
        }
    }

    pub fn is_wildcard_host(&self) -> bool {
        self.host.is_empty()
    }

    /// Split `resource` into backend host and port
    pub fn backend(&self) -> Option<(&str, u16)> {
        let (host, port) = self.resource.rsplit_once(':')?;
        Some((host, port.parse().ok()?))
    }
}
