//! Kubernetes integration for the ingress proxy agent
//!
//! This module handles all interactions with the cluster:
//! - Authenticating with kubeconfig or service account credentials
//! - Gating on the control plane version and RBAC permissions
//! - Creating or detecting the proxy namespace, class, deployment and service

pub mod auth;
mod client;
pub mod memory;
mod permissions;
mod reconciler;
mod resources;
mod version;

pub use auth::{AuthenticationResolver, ClusterConnection, Connected, CredentialSource};
pub use client::{ClusterApi, KubeCluster};
pub use memory::{InMemoryCluster, StaticCredentials, UnavailableCredentials};
pub use permissions::{check_permissions, REQUIRED_LIST_ACCESS};
pub use reconciler::{
    Outcome, ReconcileReport, ReconcileStep, ResourceReconciler, Step, RECONCILE_ORDER,
};
pub use resources::{
    create_deployment, create_ingress_class, create_namespace, create_service, managed_labels,
};
pub use version::{check_version, KubeVersion, MINIMUM_VERSION};
