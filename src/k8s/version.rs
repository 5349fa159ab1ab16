//! Minimum Kubernetes version check

use k8s_openapi::apimachinery::pkg::version::Info;
use serde::Serialize;
use std::fmt;
use tracing::{info, instrument};

use super::auth::ClusterConnection;
use crate::error::AgentError;

/// Oldest control plane the agent supports (networking.k8s.io/v1 IngressClass)
pub const MINIMUM_VERSION: KubeVersion = KubeVersion { major: 1, minor: 22 };

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
}

impl KubeVersion {
    /// Parse the version reported by the API server
    ///
    /// Providers append suffixes such as `22+`; only leading digits count.
    pub fn from_info(info: &Info) -> Self {
        Self {
            major: leading_number(&info.major),
            minor: leading_number(&info.minor),
        }
    }

    pub fn is_supported(&self) -> bool {
        *self >= MINIMUM_VERSION
    }
}

impl fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

fn leading_number(raw: &str) -> u32 {
    let digits: String = raw.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().unwrap_or(0)
}

/// Detect the control plane version and reject clusters below the minimum
#[instrument(skip(connection), fields(endpoint = %connection.endpoint))]
pub async fn check_version(connection: &mut ClusterConnection) -> Result<KubeVersion, AgentError> {
    let info = connection
        .api
        .server_version()
        .await
        .map_err(AgentError::VersionDetection)?;
    let version = KubeVersion::from_info(&info);

    if !version.is_supported() {
        return Err(AgentError::VersionUnsupported {
            major: version.major,
            minor: version.minor,
            min_major: MINIMUM_VERSION.major,
            min_minor: MINIMUM_VERSION.minor,
        });
    }

    info!(version = %version, git_version = %info.git_version, "Detected Kubernetes version");
    connection.version = Some(version);
    Ok(version)
}
