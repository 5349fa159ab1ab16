use serde::Deserialize;
use std::time::Duration;

use crate::error::AgentError;

/// Prefix for every environment variable the agent reads, e.g. `AGENT_REPLICAS`
pub const ENV_PREFIX: &str = "AGENT";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Explicit kubeconfig path; when unset kube's default discovery applies
    #[serde(default = "default_kubeconfig")]
    pub kubeconfig: Option<String>,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "default_ingress_class")]
    pub ingress_class: String,

    #[serde(default = "default_controller")]
    pub controller: String,

    #[serde(default = "default_deployment")]
    pub deployment: String,

    #[serde(default = "default_image")]
    pub image: String,

    #[serde(default = "default_proxy_version")]
    pub proxy_version: String,

    #[serde(default = "default_replicas")]
    pub replicas: i32,

    #[serde(default = "default_service")]
    pub service: String,

    #[serde(default = "default_pod_name")]
    pub pod_name: String,

    /// Value of the `app` label placed on proxy pods
    #[serde(default = "default_app_label")]
    pub app_label: String,

    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_api_timeout_secs")]
    pub api_timeout_secs: u64,

    /// Maximum number of routing snapshots kept; unbounded when unset
    #[serde(default)]
    pub history_limit: Option<usize>,

    #[serde(default)]
    pub log_json: bool,
}

fn default_kubeconfig() -> Option<String> {
    None
}

fn default_namespace() -> String {
    "j8a".to_string()
}

fn default_ingress_class() -> String {
    "ingress-j8a".to_string()
}

fn default_controller() -> String {
    "j8a.io/ingress-controller".to_string()
}

fn default_deployment() -> String {
    "deployment-j8a".to_string()
}

fn default_image() -> String {
    "simonmittag/j8a".to_string()
}

fn default_proxy_version() -> String {
    "v1.1.0".to_string()
}

fn default_replicas() -> i32 {
    3
}

fn default_service() -> String {
    "loadbalancer-j8a".to_string()
}

fn default_pod_name() -> String {
    "j8a".to_string()
}

fn default_app_label() -> String {
    "j8a".to_string()
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_api_timeout_secs() -> u64 {
    15
}

impl Config {
    pub fn load() -> Result<Self, AgentError> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix(ENV_PREFIX))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kubeconfig: default_kubeconfig(),
            namespace: default_namespace(),
            ingress_class: default_ingress_class(),
            controller: default_controller(),
            deployment: default_deployment(),
            image: default_image(),
            proxy_version: default_proxy_version(),
            replicas: default_replicas(),
            service: default_service(),
            pod_name: default_pod_name(),
            app_label: default_app_label(),
            poll_interval_secs: default_poll_interval_secs(),
            api_timeout_secs: default_api_timeout_secs(),
            history_limit: None,
            log_json: false,
        }
    }
}
