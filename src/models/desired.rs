use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::Config;

/// The proxy deployment the agent converges the cluster towards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesiredClusterState {
    pub namespace: String,
    pub ingress_class: String,
    /// Controller name advertised on the IngressClass
    pub controller: String,
    pub deployment: DeploymentTarget,
    pub service: String,
    pub pod: PodTemplate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentTarget {
    pub name: String,
    pub image: String,
    pub version: String,
    pub replicas: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PodTemplate {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

impl DeploymentTarget {
    /// Image reference with the version as tag, minus any leading `v`
    pub fn image_reference(&self) -> String {
        let tag = self.version.strip_prefix('v').unwrap_or(&self.version);
        format!("{}:{}", self.image, tag)
    }
}

impl From<&Config> for DesiredClusterState {
    fn from(config: &Config) -> Self {
        Self {
            namespace: config.namespace.clone(),
            ingress_class: config.ingress_class.clone(),
            controller: config.controller.clone(),
            deployment: DeploymentTarget {
                name: config.deployment.clone(),
                image: config.image.clone(),
                version: config.proxy_version.clone(),
                replicas: config.replicas,
            },
            service: config.service.clone(),
            pod: PodTemplate {
                name: config.pod_name.clone(),
                labels: [("app".to_string(), config.app_label.clone())]
                    .into_iter()
                    .collect(),
            },
        }
    }
}

impl Default for DesiredClusterState {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}
