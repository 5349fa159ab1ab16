//! Cluster API capability used by every component of the agent
//!
//! `ClusterApi` is the seam between the agent and the cluster. `KubeCluster`
//! implements it over `kube::Client`; tests use `InMemoryCluster` or mocks.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressClass};
use k8s_openapi::apimachinery::pkg::version::Info;
use kube::{
    api::{Api, ListParams, PostParams},
    Client,
};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, instrument};

#[cfg(test)]
use mockall::automock;

use crate::error::ClusterError;

/// Typed cluster operations the agent relies on
///
/// List operations span all namespaces and are unfiltered.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Fetch the `default/kubernetes` service and return its uid
    ///
    /// Proves that the credentials are accepted by the API server.
    async fn probe(&self) -> Result<String, ClusterError>;

    async fn server_version(&self) -> Result<Info, ClusterError>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError>;
    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError>;

    async fn create_ingress_class(&self, class: &IngressClass) -> Result<IngressClass, ClusterError>;
    async fn get_ingress_class(&self, name: &str) -> Result<IngressClass, ClusterError>;

    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError>;
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError>;

    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError>;
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError>;

    async fn list_config_maps(&self) -> Result<Vec<ConfigMap>, ClusterError>;
    async fn list_secrets(&self) -> Result<Vec<Secret>, ClusterError>;
    async fn list_services(&self) -> Result<Vec<Service>, ClusterError>;
    async fn list_ingresses(&self) -> Result<Vec<Ingress>, ClusterError>;
}

/// `ClusterApi` backed by a live API server
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    timeout: Duration,
}

impl KubeCluster {
    pub fn new(client: Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Run one API round-trip, giving up after the configured timeout
    async fn call<T, F>(&self, request: F) -> Result<T, ClusterError>
    where
        F: Future<Output = Result<T, kube::Error>>,
    {
        match tokio::time::timeout(self.timeout, request).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClusterError::Timeout(self.timeout)),
        }
    }

    fn all<K>(&self) -> Api<K>
    where
        K: kube::Resource,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }

    fn namespaced<K>(&self, namespace: &str) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as kube::Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    #[instrument(skip(self))]
    async fn probe(&self) -> Result<String, ClusterError> {
        let services: Api<Service> = self.namespaced("default");
        let apiserver = self.call(services.get("kubernetes")).await?;
        Ok(apiserver.metadata.uid.unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn server_version(&self) -> Result<Info, ClusterError> {
        self.call(self.client.apiserver_version()).await
    }

    #[instrument(skip(self, namespace), fields(name = %namespace.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_namespace(&self, namespace: &Namespace) -> Result<Namespace, ClusterError> {
        let api: Api<Namespace> = self.all();
        self.call(api.create(&PostParams::default(), namespace)).await
    }

    #[instrument(skip(self))]
    async fn get_namespace(&self, name: &str) -> Result<Namespace, ClusterError> {
        let api: Api<Namespace> = self.all();
        self.call(api.get(name)).await
    }

    #[instrument(skip(self, class), fields(name = %class.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_ingress_class(&self, class: &IngressClass) -> Result<IngressClass, ClusterError> {
        let api: Api<IngressClass> = self.all();
        self.call(api.create(&PostParams::default(), class)).await
    }

    #[instrument(skip(self))]
    async fn get_ingress_class(&self, name: &str) -> Result<IngressClass, ClusterError> {
        let api: Api<IngressClass> = self.all();
        self.call(api.get(name)).await
    }

    #[instrument(skip(self, deployment), fields(name = %deployment.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_deployment(
        &self,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = self.namespaced(namespace);
        self.call(api.create(&PostParams::default(), deployment)).await
    }

    #[instrument(skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment, ClusterError> {
        let api: Api<Deployment> = self.namespaced(namespace);
        self.call(api.get(name)).await
    }

    #[instrument(skip(self, service), fields(name = %service.metadata.name.as_deref().unwrap_or("unknown")))]
    async fn create_service(&self, namespace: &str, service: &Service) -> Result<Service, ClusterError> {
        let api: Api<Service> = self.namespaced(namespace);
        self.call(api.create(&PostParams::default(), service)).await
    }

    #[instrument(skip(self))]
    async fn get_service(&self, namespace: &str, name: &str) -> Result<Service, ClusterError> {
        let api: Api<Service> = self.namespaced(namespace);
        self.call(api.get(name)).await
    }

    async fn list_config_maps(&self) -> Result<Vec<ConfigMap>, ClusterError> {
        let api: Api<ConfigMap> = self.all();
        let list = self.call(api.list(&ListParams::default())).await?;
        debug!(count = list.items.len(), "Listed config maps");
        Ok(list.items)
    }

    async fn list_secrets(&self) -> Result<Vec<Secret>, ClusterError> {
        let api: Api<Secret> = self.all();
        let list = self.call(api.list(&ListParams::default())).await?;
        debug!(count = list.items.len(), "Listed secrets");
        Ok(list.items)
    }

    async fn list_services(&self) -> Result<Vec<Service>, ClusterError> {
        let api: Api<Service> = self.all();
        let list = self.call(api.list(&ListParams::default())).await?;
        debug!(count = list.items.len(), "Listed services");
        Ok(list.items)
    }

    async fn list_ingresses(&self) -> Result<Vec<Ingress>, ClusterError> {
        let api: Api<Ingress> = self.all();
        let list = self.call(api.list(&ListParams::default())).await?;
        debug!(count = list.items.len(), "Listed ingresses");
        Ok(list.items)
    }
}
