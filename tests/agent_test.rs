//! End-to-end tests for the agent lifecycle
//!
//! These tests drive the daemon against an in-memory cluster: bootstrap,
//! reconciliation and polling, plus the fatal startup paths.

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, ServiceBackendPort,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::sync::Arc;

use ingress_proxy_agent::k8s::{
    AuthenticationResolver, InMemoryCluster, Outcome, StaticCredentials, UnavailableCredentials,
};
use ingress_proxy_agent::routing::PathType;
use ingress_proxy_agent::{AgentError, Config, Daemon, DaemonState, ExitPolicy, ResourceKind};

fn daemon(cluster: &Arc<InMemoryCluster>) -> Daemon {
    let resolver = AuthenticationResolver::new(
        Box::new(StaticCredentials::new(
            "external",
            cluster.clone(),
            "https://127.0.0.1:6443",
        )),
        Box::new(UnavailableCredentials::new("in-cluster", "not running in a pod")),
    );
    Daemon::new(&Config::default(), resolver, ExitPolicy::NoExit)
}

fn meta(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn ingress(name: &str, namespace: &str, class: &str, backend: IngressServiceBackend) -> Ingress {
    Ingress {
        metadata: meta(name, namespace),
        spec: Some(IngressSpec {
            ingress_class_name: Some(class.to_string()),
            rules: Some(vec![IngressRule {
                host: Some("shop.example.com".to_string()),
                http: Some(HTTPIngressRuleValue {
                    paths: vec![HTTPIngressPath {
                        path: Some("/cart".to_string()),
                        path_type: "Prefix".to_string(),
                        backend: IngressBackend {
                            service: Some(backend),
                            ..Default::default()
                        },
                    }],
                }),
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn named_port_backend(service: &str, port: &str) -> IngressServiceBackend {
    IngressServiceBackend {
        name: service.to_string(),
        port: Some(ServiceBackendPort {
            name: Some(port.to_string()),
            number: None,
        }),
    }
}

fn service_with_port(name: &str, port_name: &str, port: i32) -> Service {
    Service {
        metadata: meta(name, "shop"),
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                port,
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_empty_cluster_reports_four_created_steps() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut daemon = daemon(&cluster);

    // The reconcile report and the cluster's creation log, not the tracing output
    let report = daemon.bootstrap().await.unwrap();
    assert_eq!(report.count(Outcome::Created), 4);
    assert_eq!(report.count(Outcome::Detected), 0);
    assert_eq!(daemon.state(), DaemonState::Reconciled);

    let created: Vec<_> = cluster.created().into_iter().map(|(kind, _)| kind).collect();
    assert_eq!(
        created,
        vec![
            ResourceKind::Namespace,
            ResourceKind::IngressClass,
            ResourceKind::Deployment,
            ResourceKind::Service,
        ]
    );

    let summary = daemon.poll_once().await.unwrap();
    assert_eq!(daemon.state(), DaemonState::Polling);
    assert_eq!(daemon.cache().len(), 1);
    assert!(summary.snapshot.routes().is_empty());
    assert_eq!(summary.snapshot.content_hash().len(), 64);
    assert!(summary.changed);
    assert_eq!(summary.counts.ingresses, Some(0));
    assert_eq!(summary.counts.services, Some(1));
}

#[tokio::test]
async fn test_poll_reports_object_counts() {
    let cluster = Arc::new(InMemoryCluster::new());
    for name in ["proxy-settings", "feature-flags"] {
        cluster.insert_config_map(ConfigMap {
            metadata: meta(name, "shop"),
            ..Default::default()
        });
    }
    cluster.insert_secret(Secret {
        metadata: meta("tls-cert", "shop"),
        ..Default::default()
    });

    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    let summary = daemon.poll_once().await.unwrap();

    assert_eq!(summary.counts.config_maps, Some(2));
    assert_eq!(summary.counts.secrets, Some(1));
    assert_eq!(summary.counts.services, Some(1));
    assert_eq!(summary.counts.ingresses, Some(0));

    cluster.deny(ResourceKind::Secret);
    let degraded = daemon.poll_once().await.unwrap();
    assert_eq!(degraded.counts.secrets, None);
    assert_eq!(degraded.counts.config_maps, Some(2));
}

#[tokio::test]
async fn test_second_run_detects_everything() {
    let cluster = Arc::new(InMemoryCluster::new());
    daemon(&cluster).bootstrap().await.unwrap();

    let report = daemon(&cluster).bootstrap().await.unwrap();
    assert_eq!(report.count(Outcome::Detected), 4);
    assert_eq!(report.count(Outcome::Created), 0);
    assert_eq!(cluster.namespace_count(), 1);
    assert_eq!(cluster.created().len(), 4);
}

#[tokio::test]
async fn test_existing_deployment_replicas_are_adopted() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert_deployment(
        "j8a",
        Deployment {
            metadata: meta("deployment-j8a", "j8a"),
            spec: Some(DeploymentSpec {
                replicas: Some(5),
                ..Default::default()
            }),
            ..Default::default()
        },
    );

    let mut daemon = daemon(&cluster);
    assert_eq!(daemon.desired().deployment.replicas, 3);

    let report = daemon.bootstrap().await.unwrap();
    assert_eq!(report.steps[2].kind, ResourceKind::Deployment);
    assert_eq!(report.steps[2].outcome, Outcome::Detected);
    assert_eq!(daemon.desired().deployment.replicas, 5);

    let stored = cluster.deployment("j8a", "deployment-j8a").unwrap();
    assert_eq!(stored.spec.unwrap().replicas, Some(5));
}

#[tokio::test]
async fn test_named_port_resolves_to_service_port() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert_service("shop", service_with_port("web", "http", 8080));
    cluster.insert_ingress(ingress(
        "storefront",
        "shop",
        "ingress-j8a",
        named_port_backend("web", "http"),
    ));

    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    let summary = daemon.poll_once().await.unwrap();

    let routes = summary.snapshot.routes();
    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].resource, "web.shop.svc.cluster.local:8080");
    assert!(routes[0].resource.ends_with(":8080"));
    assert_eq!(routes[0].path_type, PathType::Prefix);
    assert_eq!(routes[0].host, "shop.example.com");
    assert_eq!(summary.skipped, 0);
}

#[tokio::test]
async fn test_other_ingress_classes_are_ignored() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert_service("shop", service_with_port("web", "http", 8080));
    cluster.insert_ingress(ingress(
        "storefront",
        "shop",
        "nginx",
        named_port_backend("web", "http"),
    ));

    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    let summary = daemon.poll_once().await.unwrap();

    assert!(summary.snapshot.routes().is_empty());
    assert_eq!(summary.counts.ingresses, Some(1));
}

#[tokio::test]
async fn test_unresolvable_path_is_skipped() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert_ingress(ingress(
        "storefront",
        "shop",
        "ingress-j8a",
        named_port_backend("missing", "http"),
    ));

    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    let summary = daemon.poll_once().await.unwrap();

    assert!(summary.snapshot.routes().is_empty());
    assert_eq!(summary.skipped, 1);
}

#[tokio::test]
async fn test_unchanged_polls_share_a_hash() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert_service("shop", service_with_port("web", "http", 8080));
    cluster.insert_ingress(ingress(
        "storefront",
        "shop",
        "ingress-j8a",
        named_port_backend("web", "http"),
    ));

    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    let first = daemon.poll_once().await.unwrap();
    let second = daemon.poll_once().await.unwrap();

    assert_eq!(
        first.snapshot.content_hash(),
        second.snapshot.content_hash()
    );
    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(daemon.cache().len(), 2);
    assert_eq!(
        daemon.cache().current().content_hash(),
        second.snapshot.content_hash()
    );
}

#[tokio::test]
async fn test_failed_ingress_list_keeps_previous_snapshot() {
    let cluster = Arc::new(InMemoryCluster::new());
    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    daemon.poll_once().await.unwrap();

    cluster.deny(ResourceKind::Ingress);
    let err = daemon.poll_once().await.unwrap_err();
    assert!(matches!(err, AgentError::IngressList(_)));
    assert_eq!(daemon.cache().len(), 1);
}

#[tokio::test]
async fn test_failed_service_list_falls_back_to_default_namespace() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.insert_ingress(ingress(
        "storefront",
        "shop",
        "ingress-j8a",
        IngressServiceBackend {
            name: "web".to_string(),
            port: Some(ServiceBackendPort {
                name: None,
                number: Some(9090),
            }),
        },
    ));

    let mut daemon = daemon(&cluster);
    daemon.bootstrap().await.unwrap();
    cluster.deny(ResourceKind::Service);

    let summary = daemon.poll_once().await.unwrap();
    assert_eq!(summary.counts.services, None);
    assert_eq!(
        summary.snapshot.routes()[0].resource,
        "web.default.svc.cluster.local:9090"
    );
}

#[tokio::test]
async fn test_old_cluster_is_fatal() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.set_version("1", "21");
    let mut daemon = daemon(&cluster);

    let err = daemon.bootstrap().await.unwrap_err();
    assert!(matches!(
        err,
        AgentError::VersionUnsupported { major: 1, minor: 21, .. }
    ));
    assert_eq!(daemon.state(), DaemonState::Authenticated);
    assert!(cluster.created().is_empty());
}

#[tokio::test]
async fn test_denied_secrets_are_fatal() {
    let cluster = Arc::new(InMemoryCluster::new());
    cluster.deny(ResourceKind::Secret);
    let mut daemon = daemon(&cluster);

    let err = daemon.bootstrap().await.unwrap_err();
    match &err {
        AgentError::Permission { denied, .. } => assert_eq!(denied, &vec![ResourceKind::Secret]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("secret"));
    assert_eq!(daemon.state(), DaemonState::VersionChecked);
    assert!(cluster.created().is_empty());
}

#[tokio::test]
async fn test_no_credentials_is_fatal() {
    let resolver = AuthenticationResolver::new(
        Box::new(UnavailableCredentials::new("external", "no kubeconfig")),
        Box::new(UnavailableCredentials::new("in-cluster", "not running in a pod")),
    );
    let mut daemon = Daemon::new(&Config::default(), resolver, ExitPolicy::NoExit);

    let err = daemon.bootstrap().await.unwrap_err();
    match err {
        AgentError::Authentication {
            external,
            in_cluster,
        } => {
            assert!(external.contains("no kubeconfig"));
            assert!(in_cluster.contains("not running in a pod"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(daemon.state(), DaemonState::Init);
    assert!(daemon.connection().is_none());
}
