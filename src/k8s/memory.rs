//! In-memory cluster
//!
//! Implements `ClusterApi` over mutex-guarded maps, following API server
//! semantics closely enough to exercise the agent end to end: creating an
//! existing object conflicts, reading a missing one is not found, namespaced
//! objects need their namespace, and list access can be denied per kind.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use k8s_openapi::apimachinery::pkg::version::Info;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::auth::{Connected, CredentialSource};
use super::client::ClusterApi;
use crate::error::{ClusterError, ResourceKind};

type Key = (String, String);

#[derive(Default)]
struct State {
    version: Info,
    namespaces: BTreeMap<String, Namespace>,
    ingress_classes: BTreeMap<String, IngressClass>,
    deployments: BTreeMap<Key, Deployment>,
    services: BTreeMap<Key, Service>,
    config_maps: Vec<ConfigMap>,
    secrets: Vec<Secret>,
    ingresses: Vec<Ingress>,
    denied: HashSet<ResourceKind>,
    created: Vec<(ResourceKind, String)>,
}

#[derive(Default)]
pub struct InMemoryCluster {
    state: Mutex<State>,
}

fn object_name(meta: &k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta) -> String {
    meta.name.clone().unwrap_or_default()
}

impl InMemoryCluster {
    /// An empty cluster reporting version 1.28
    pub fn new() -> Self {
        let cluster = Self::default();
        cluster.set_version("1", "28");
        cluster
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_version(&self, major: &str, minor: &str) {
        let mut state = self.state();
        state.version = Info {
            major: major.to_string(),
            minor: minor.to_string(),
            git_version: format!("v{major}.{minor}.0"),
            ..Default::default()
        };
    }

    /// Make every call touching `kind` fail with `Forbidden`
    pub fn deny(&self, kind: ResourceKind) {
        self.state().denied.insert(kind);
    }

    /// Store a deployment as if someone else had created it
    pub fn insert_deployment(&self, namespace: &str, mut deployment: Deployment) {
        deployment.metadata.namespace = Some(namespace.to_string());
        let key = (namespace.to_string(), object_name(&deployment.metadata));
        self.state().deployments.insert(key, deployment);
    }

    pub fn insert_service(&self, namespace: &str, mut service: Service) {
        service.metadata.namespace = Some(namespace.to_string());
        let key = (namespace.to_string(), object_name(&service.metadata));
        self.state().services.insert(key, service);
    }

    pub fn insert_ingress(&self, ingress: Ingress) {
        self.state().ingresses.push(ingress);
    }

    pub fn insert_config_map(&self, config_map: ConfigMap) {
        self.state().config_maps.push(config_map);
    }

    pub fn insert_secret(&self, secret: Secret) {
        self.state().secrets.push(secret);
    }

    /// Objects created through the API, in creation order
    pub fn created(&self) -> Vec<(ResourceKind, String)> {
        self.state().created.clone()
    }

    pub fn deployment(&self, namespace: &str, name: &str) -> Option<Deployment> {
        self.state()
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn namespace_count(&self) -> usize {
        self.state().namespaces.len()
    }
}

impl State {
    fn check(&self, kind: ResourceKind) -> Result<(), ClusterError> {
        if self.denied.contains(&kind) {
            return Err(ClusterError::Forbidden(kind));
        }
        Ok(())
    }

    fn require_namespace(&self, namespace: &str) -> Result<(), ClusterError> {
        if self.namespaces.contains_key(namespace) {
            Ok(())
        } else {
            Err(ClusterError::NotFound {
                kind: ResourceKind::Namespace,
                name: namespace.to_string(),
            })
        }
    }
}

fn insert_new<K: Ord, V: Clone>(
    map: &mut BTreeMap<K, V>,
    key: K,
    value: &V,
    kind: ResourceKind,
    name: &str,
) -> Result<V, ClusterError> {
    if map.contains_key(&key) {
        return Err(ClusterError::AlreadyExists {
            kind,
            name: name.to_string(),
        });
    }
    map.insert(key, value.clone());
    Ok(value.clone())
}

fn not_found(kind: ResourceKind, name: &str) -> ClusterError {
    ClusterError::NotFound {
        kind,
        name: name.to_string(),
    }
}

#[async_trait]
impl ClusterApi for InMemoryCluster {
    async fn probe(&self) -> Result<String, ClusterError> {
        Ok("in-memory".to_string())
    }

    async fn server_version(&self) -> Result<Info, ClusterError> {
        Ok(self.state().version.clone())
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let mut state = self.state();
        state.check(ResourceKind::Namespace)?;
        let name = object_name(&namespace.metadata);
        let created = insert_new(
            &mut state.namespaces,
            name.clone(),
            namespace,
            ResourceKind::Namespace,
            &name,
        )?;
        state.created.push((ResourceKind::Namespace, name));
        Ok(created)
    }

    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::Namespace)?;
        state
            .namespaces
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Namespace, name))
    }

    async fn create_ingress_class(&self, class: &IngressClass) -> Result<IngressClass, ClusterError> {
        let mut state = self.state();
        state.check(ResourceKind::IngressClass)?;
        let name = object_name(&class.metadata);
        let created = insert_new(
            &mut state.ingress_classes,
            name.clone(),
            class,
            ResourceKind::IngressClass,
            &name,
        )?;
        state.created.push((ResourceKind::IngressClass, name));
        Ok(created)
    }

    async fn get_ingress_class(&self, name: &str) -> Result<IngressClass, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::IngressClass)?;
        state
            .ingress_classes
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::IngressClass, name))
    }

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let mut state = self.state();
        state.check(ResourceKind::Deployment)?;
        state.require_namespace(namespace)?;
        let name = object_name(&deployment.metadata);
        let mut stored = deployment.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        let created = insert_new(
            &mut state.deployments,
            (namespace.to_string(), name.clone()),
            &stored,
            ResourceKind::Deployment,
            &name,
        )?;
        state.created.push((ResourceKind::Deployment, name));
        Ok(created)
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::Deployment)?;
        state
            .deployments
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Deployment, name))
    }

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let mut state = self.state();
        state.check(ResourceKind::Service)?;
        state.require_namespace(namespace)?;
        let name = object_name(&service.metadata);
        let mut stored = service.clone();
        stored.metadata.namespace = Some(namespace.to_string());
        let created = insert_new(
            &mut state.services,
            (namespace.to_string(), name.clone()),
            &stored,
            ResourceKind::Service,
            &name,
        )?;
        state.created.push((ResourceKind::Service, name));
        Ok(created)
    }

    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::Service)?;
        state
            .services
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| not_found(ResourceKind::Service, name))
    }

    async fn list_config_maps(&self) -> Result<Vec<ConfigMap>, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::ConfigMap)?;
        Ok(state.config_maps.clone())
    }

    async fn list_secrets(&self) -> Result<Vec<Secret>, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::Secret)?;
        Ok(state.secrets.clone())
    }

    async fn list_services(&self) -> Result<Vec<Service>, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::Service)?;
        Ok(state.services.values().cloned().collect())
    }

    async fn list_ingresses(&self) -> Result<Vec<Ingress>, ClusterError> {
        let state = self.state();
        state.check(ResourceKind::Ingress)?;
        Ok(state.ingresses.clone())
    }
}

/// Credentials that always resolve to a given cluster
pub struct StaticCredentials {
    name: &'static str,
    api: Arc<dyn ClusterApi>,
    endpoint: String,
}

impl StaticCredentials {
    pub fn new(name: &'static str, api: Arc<dyn ClusterApi>, endpoint: impl Into<String>) -> Self {
        Self {
            name,
            api,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for StaticCredentials {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn connect(&self) -> Result<Connected, ClusterError> {
        Ok(Connected {
            api: Arc::clone(&self.api),
            endpoint: self.endpoint.clone(),
        })
    }
}

/// Credentials that never resolve, e.g. in-cluster auth outside a pod
pub struct UnavailableCredentials {
    name: &'static str,
    reason: String,
}

impl UnavailableCredentials {
    pub fn new(name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            name,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl CredentialSource for UnavailableCredentials {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn connect(&self) -> Result<Connected, ClusterError> {
        Err(ClusterError::Credentials(self.reason.clone()))
    }
}
