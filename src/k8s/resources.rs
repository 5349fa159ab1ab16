//! Kubernetes object builders for the proxy deployment
//!
//! Functions to create the Namespace, IngressClass, Deployment and Service
//! specs from the desired cluster state

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, Namespace, PodSpec, PodTemplateSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::api::networking::v1::{IngressClass, IngressClassSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::models::DesiredClusterState;
use crate::routing::{ProxyConfig, PROXY_CONFIG_ENV};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "ingress-proxy-agent";

const HTTP_PORT: i32 = 80;
const HTTPS_PORT: i32 = 443;

/// Labels for objects owned by the agent
pub fn managed_labels() -> BTreeMap<String, String> {
    [(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())]
        .into_iter()
        .collect()
}

fn metadata(name: &str, namespace: Option<&str>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: Some(managed_labels()),
        ..Default::default()
    }
}

pub fn create_namespace(desired: &DesiredClusterState) -> Namespace {
    Namespace {
        metadata: metadata(&desired.namespace, None),
        ..Default::default()
    }
}

pub fn create_ingress_class(desired: &DesiredClusterState) -> IngressClass {
    IngressClass {
        metadata: metadata(&desired.ingress_class, None),
        spec: Some(IngressClassSpec {
            controller: Some(desired.controller.clone()),
            ..Default::default()
        }),
    }
}

/// Deployment running the proxy with the bootstrap configuration
///
/// The rendered placeholder config is handed to the container through an
/// environment variable so the proxy starts before any ingress is known.
pub fn create_deployment(desired: &DesiredClusterState) -> Deployment {
    let pod_labels = desired.pod.labels.clone();
    let mut labels = pod_labels.clone();
    labels.extend(managed_labels());

    // Fixed strings, integers and maps with string keys always serialize
    let bootstrap = ProxyConfig::bootstrap().to_yaml().unwrap_or_default();

    Deployment {
        metadata: ObjectMeta {
            labels: Some(labels.clone()),
            ..metadata(&desired.deployment.name, Some(&desired.namespace))
        },
        spec: Some(DeploymentSpec {
            replicas: Some(desired.deployment.replicas),
            selector: LabelSelector {
                match_labels: Some(pod_labels),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: desired.pod.name.clone(),
                        image: Some(desired.deployment.image_reference()),
                        ports: Some(vec![
                            container_port("http", HTTP_PORT),
                            container_port("https", HTTPS_PORT),
                        ]),
                        env: Some(vec![EnvVar {
                            name: PROXY_CONFIG_ENV.to_string(),
                            value: Some(bootstrap),
                            ..Default::default()
                        }]),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        container_port: port,
        ..Default::default()
    }
}

/// LoadBalancer service exposing the proxy pods on 80 and 443
pub fn create_service(desired: &DesiredClusterState) -> Service {
    Service {
        metadata: metadata(&desired.service, Some(&desired.namespace)),
        spec: Some(ServiceSpec {
            selector: Some(desired.pod.labels.clone()),
            type_: Some("LoadBalancer".to_string()),
            ports: Some(vec![
                service_port("http", HTTP_PORT),
                service_port("https", HTTPS_PORT),
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn service_port(name: &str, port: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        protocol: Some("TCP".to_string()),
        port,
        target_port: Some(IntOrString::Int(port)),
        ..Default::default()
    }
}
