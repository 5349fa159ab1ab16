//! RBAC probe
//!
//! Lists every kind the polling loop reads, across all namespaces. All kinds
//! are probed so the error names every missing permission at once.

use tracing::{info, instrument, warn};

use super::client::ClusterApi;
use crate::error::{AgentError, ClusterError, ResourceKind};

/// Kinds the agent must be able to list cluster-wide
pub const REQUIRED_LIST_ACCESS: [ResourceKind; 4] = [
    ResourceKind::ConfigMap,
    ResourceKind::Secret,
    ResourceKind::Service,
    ResourceKind::Ingress,
];

async fn probe(api: &dyn ClusterApi, kind: ResourceKind) -> Result<(), ClusterError> {
    match kind {
        ResourceKind::ConfigMap => api.list_config_maps().await.map(drop),
        ResourceKind::Secret => api.list_secrets().await.map(drop),
        ResourceKind::Service => api.list_services().await.map(drop),
        ResourceKind::Ingress => api.list_ingresses().await.map(drop),
        _ => Ok(()),
    }
}

#[instrument(skip(api))]
pub async fn check_permissions(api: &dyn ClusterApi) -> Result<(), AgentError> {
    let mut denied = Vec::new();
    let mut first_cause = None;

    for kind in REQUIRED_LIST_ACCESS {
        if let Err(e) = probe(api, kind).await {
            warn!(kind = %kind, error = %e, "Unable to list cluster objects");
            denied.push(kind);
            first_cause.get_or_insert(e);
        }
    }

    match first_cause {
        Some(source) => Err(AgentError::Permission { denied, source }),
        None => {
            info!("Checked privileges to access cluster configuration objects in all namespaces");
            Ok(())
        }
    }
}
