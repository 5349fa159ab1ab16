//! Error types for the ingress proxy agent
//!
//! `ClusterError` covers a single failed call against the cluster API,
//! `RouteError` a single ingress path that could not be turned into a route,
//! and `AgentError` the fatal conditions that stop the agent during startup.

use std::time::Duration;

use serde::Serialize;
use strum::Display;
use thiserror::Error;

/// Kinds of cluster objects the agent creates, reads or lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ResourceKind {
    Namespace,
    IngressClass,
    Deployment,
    Service,
    ConfigMap,
    Secret,
    Ingress,
}

/// A failed call against the cluster API
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("{kind} {name} not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("access to {0} denied")]
    Forbidden(ResourceKind),

    #[error("cluster request timed out after {0:?}")]
    Timeout(Duration),

    #[error("unable to load credentials: {0}")]
    Credentials(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl ClusterError {
    /// True when the object being created already exists
    pub fn is_conflict(&self) -> bool {
        match self {
            ClusterError::AlreadyExists { .. } => true,
            ClusterError::Kube(kube::Error::Api(e)) => e.code == 409,
            _ => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            ClusterError::NotFound { .. } => true,
            ClusterError::Kube(kube::Error::Api(e)) => e.code == 404,
            _ => false,
        }
    }
}

/// An ingress path that could not be resolved into a route
///
/// These never abort a poll cycle; the offending path is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("ingress {ingress} has a path without a service backend")]
    MissingServiceBackend { ingress: String },

    #[error("backend service {service} not found in namespace {namespace}")]
    ServiceNotFound { service: String, namespace: String },

    #[error("backend service {service} has no port named {port}")]
    NamedPortNotFound { service: String, port: String },

    #[error("backend service {service} declares neither a port name nor a number")]
    MissingPort { service: String },
}

/// Fatal conditions raised while bringing the agent up
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unable to authenticate to the cluster (external: {external}; in-cluster: {in_cluster})")]
    Authentication { external: String, in_cluster: String },

    #[error("unable to detect the cluster version")]
    VersionDetection(#[source] ClusterError),

    #[error("detected unsupported Kubernetes version {major}.{minor}, need at least {min_major}.{min_minor}")]
    VersionUnsupported {
        major: u32,
        minor: u32,
        min_major: u32,
        min_minor: u32,
    },

    #[error("insufficient privileges to access {}", join_kinds(.denied))]
    Permission {
        denied: Vec<ResourceKind>,
        #[source]
        source: ClusterError,
    },

    #[error("unable to create or detect {kind} {name}")]
    Reconciliation {
        kind: ResourceKind,
        name: String,
        #[source]
        source: ClusterError,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("agent has not completed bootstrap")]
    NotBootstrapped,

    #[error("unable to list ingresses")]
    IngressList(#[source] ClusterError),
}

fn join_kinds(kinds: &[ResourceKind]) -> String {
    kinds
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Render an error together with every `source()` below it
pub fn cause_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        current = cause.source();
    }
    out
}
