//! Cluster authentication
//!
//! Credentials are tried in order: external kubeconfig first, then the pod's
//! service account. A source only counts as connected once an authenticated
//! probe against the API server has succeeded.

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use super::client::{ClusterApi, KubeCluster};
use super::version::KubeVersion;
use crate::error::{AgentError, ClusterError};

/// A client bound to credentials, not yet probed
pub struct Connected {
    pub api: Arc<dyn ClusterApi>,
    pub endpoint: String,
}

/// One way of obtaining cluster credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    fn name(&self) -> &'static str;

    async fn connect(&self) -> Result<Connected, ClusterError>;
}

/// Authenticated handle shared by the rest of the agent
#[derive(Clone)]
pub struct ClusterConnection {
    pub api: Arc<dyn ClusterApi>,
    pub endpoint: String,
    /// Name of the credential source that succeeded
    pub source: &'static str,
    /// Set once by the version gate
    pub version: Option<KubeVersion>,
}

impl fmt::Debug for ClusterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClusterConnection")
            .field("endpoint", &self.endpoint)
            .field("source", &self.source)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Credentials from a kubeconfig file
pub struct KubeconfigCredentials {
    path: Option<PathBuf>,
    timeout: Duration,
}

impl KubeconfigCredentials {
    /// Use `path`, or kube's default discovery (`KUBECONFIG`, `~/.kube/config`) when `None`
    pub fn new(path: Option<PathBuf>, timeout: Duration) -> Self {
        Self { path, timeout }
    }
}

#[async_trait]
impl CredentialSource for KubeconfigCredentials {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn connect(&self) -> Result<Connected, ClusterError> {
        let options = KubeConfigOptions::default();
        let config = match &self.path {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path)
                    .map_err(|e| ClusterError::Credentials(e.to_string()))?;
                Config::from_custom_kubeconfig(kubeconfig, &options).await
            }
            None => Config::from_kubeconfig(&options).await,
        }
        .map_err(|e| ClusterError::Credentials(e.to_string()))?;

        bind(config, self.timeout)
    }
}

/// Credentials from the pod's service account
pub struct InClusterCredentials {
    timeout: Duration,
}

impl InClusterCredentials {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CredentialSource for InClusterCredentials {
    fn name(&self) -> &'static str {
        "in-cluster"
    }

    async fn connect(&self) -> Result<Connected, ClusterError> {
        let config = Config::incluster().map_err(|e| ClusterError::Credentials(e.to_string()))?;
        bind(config, self.timeout)
    }
}

fn bind(config: Config, timeout: Duration) -> Result<Connected, ClusterError> {
    let endpoint = config.cluster_url.to_string();
    let client = Client::try_from(config)?;
    Ok(Connected {
        api: Arc::new(KubeCluster::new(client, timeout)),
        endpoint,
    })
}

/// Picks the first credential source that can reach the API server
pub struct AuthenticationResolver {
    external: Box<dyn CredentialSource>,
    in_cluster: Box<dyn CredentialSource>,
}

impl AuthenticationResolver {
    pub fn new(external: Box<dyn CredentialSource>, in_cluster: Box<dyn CredentialSource>) -> Self {
        Self {
            external,
            in_cluster,
        }
    }

    /// Kubeconfig first, service account second
    pub fn from_environment(kubeconfig: Option<PathBuf>, timeout: Duration) -> Self {
        Self::new(
            Box::new(KubeconfigCredentials::new(kubeconfig, timeout)),
            Box::new(InClusterCredentials::new(timeout)),
        )
    }

    #[instrument(skip(self))]
    pub async fn authenticate(&self) -> Result<ClusterConnection, AgentError> {
        let external = match try_source(self.external.as_ref()).await {
            Ok(connection) => return Ok(connection),
            Err(e) => {
                warn!(source = self.external.name(), error = %e, "Authentication failed, falling back");
                e
            }
        };

        try_source(self.in_cluster.as_ref())
            .await
            .map_err(|in_cluster| AgentError::Authentication {
                external: external.to_string(),
                in_cluster: in_cluster.to_string(),
            })
    }
}

async fn try_source(source: &dyn CredentialSource) -> Result<ClusterConnection, ClusterError> {
    let Connected { api, endpoint } = source.connect().await?;
    let uid = api.probe().await?;

    info!(
        source = source.name(),
        endpoint = %endpoint,
        uid = %uid,
        "Authenticated to Kubernetes control plane"
    );

    Ok(ClusterConnection {
        api,
        endpoint,
        source: source.name(),
        version: None,
    })
}
