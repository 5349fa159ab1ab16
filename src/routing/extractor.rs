//! Ingress to route extraction
//!
//! Turns the ingress list of one poll into an ordered route list. Backends are
//! resolved against the service list fetched in the same poll, so a single
//! cycle costs one list call per kind rather than one get per backend.

use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::{Ingress, IngressServiceBackend};
use tracing::{debug, warn};

use super::route::{PathType, Route};
use crate::error::RouteError;

/// Annotation used to select an ingress class before `spec.ingressClassName`
pub const LEGACY_CLASS_ANNOTATION: &str = "kubernetes.io/ingress.class";

pub const DEFAULT_NAMESPACE: &str = "default";
pub const CLUSTER_DOMAIN: &str = "svc.cluster.local";

/// Result of extracting routes from one ingress listing
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Extraction {
    pub routes: Vec<Route>,
    /// Paths that could not be resolved, in listing order
    pub skipped: Vec<RouteError>,
    /// Ingresses belonging to another (or no) ingress class
    pub ignored: usize,
}

pub struct RouteExtractor {
    ingress_class: String,
}

impl RouteExtractor {
    pub fn new(ingress_class: impl Into<String>) -> Self {
        Self {
            ingress_class: ingress_class.into(),
        }
    }

    /// True when the ingress explicitly opts in to our class
    pub fn is_ours(&self, ingress: &Ingress) -> bool {
        declared_class(ingress) == Some(self.ingress_class.as_str())
    }

    pub fn extract(&self, ingresses: &[Ingress], services: &[Service]) -> Extraction {
        let index = ServiceIndex { services };
        let mut extraction = Extraction::default();

        for ingress in ingresses {
            if !self.is_ours(ingress) {
                extraction.ignored += 1;
                continue;
            }
            extract_ingress(ingress, &index, &mut extraction);
        }

        debug!(
            routes = extraction.routes.len(),
            skipped = extraction.skipped.len(),
            ignored = extraction.ignored,
            "Extracted routes"
        );
        extraction
    }
}

fn declared_class(ingress: &Ingress) -> Option<&str> {
    ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.ingress_class_name.as_deref())
        .or_else(|| {
            ingress
                .metadata
                .annotations
                .as_ref()
                .and_then(|a| a.get(LEGACY_CLASS_ANNOTATION))
                .map(String::as_str)
        })
}

fn extract_ingress(ingress: &Ingress, index: &ServiceIndex<'_>, out: &mut Extraction) {
    let name = ingress.metadata.name.as_deref().unwrap_or("unknown");
    let namespace = ingress
        .metadata
        .namespace
        .as_deref()
        .unwrap_or(DEFAULT_NAMESPACE);

    let rules = ingress
        .spec
        .as_ref()
        .and_then(|spec| spec.rules.as_ref())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for rule in rules {
        let Some(http) = &rule.http else {
            continue;
        };
        let host = rule.host.clone().unwrap_or_default();

        for path in &http.paths {
            let resolved = match &path.backend.service {
                Some(backend) => resolve_backend(backend, namespace, index),
                None => Err(RouteError::MissingServiceBackend {
                    ingress: format!("{namespace}/{name}"),
                }),
            };

            match resolved {
                Ok(resource) => out.routes.push(Route::new(
                    path.path.clone().unwrap_or_else(|| "/".to_string()),
                    host.clone(),
                    PathType::from_ingress(Some(path.path_type.as_str())),
                    resource,
                )),
                Err(e) => {
                    warn!(ingress = %name, namespace = %namespace, error = %e, "Skipping ingress path");
                    out.skipped.push(e);
                }
            }
        }
    }
}

/// Resolve a service backend to `<dns name>:<port>`
fn resolve_backend(
    backend: &IngressServiceBackend,
    namespace: &str,
    index: &ServiceIndex<'_>,
) -> Result<String, RouteError> {
    let service = index.find(&backend.name, namespace);
    let port = resolve_port(backend, service, namespace)?;
    Ok(format!("{}:{}", service_dns_name(&backend.name, service), port))
}

/// Numeric port for a backend
///
/// A numeric port is taken as is. A named port is looked up in the ports of
/// the matching service.
pub fn resolve_port(
    backend: &IngressServiceBackend,
    service: Option<&Service>,
    namespace: &str,
) -> Result<i32, RouteError> {
    let port = backend.port.as_ref();

    if let Some(name) = port.and_then(|p| p.name.as_deref()).filter(|n| !n.is_empty()) {
        let service = service.ok_or_else(|| RouteError::ServiceNotFound {
            service: backend.name.clone(),
            namespace: namespace.to_string(),
        })?;
        return service
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .and_then(|ports| ports.iter().find(|p| p.name.as_deref() == Some(name)))
            .map(|p| p.port)
            .ok_or_else(|| RouteError::NamedPortNotFound {
                service: backend.name.clone(),
                port: name.to_string(),
            });
    }

    port.and_then(|p| p.number)
        .ok_or_else(|| RouteError::MissingPort {
            service: backend.name.clone(),
        })
}

/// Cluster-internal DNS name of a backend service
///
/// Falls back to the `default` namespace when the service was not found.
pub fn service_dns_name(name: &str, service: Option<&Service>) -> String {
    let namespace = service
        .and_then(|s| s.metadata.namespace.as_deref())
        .filter(|ns| !ns.is_empty())
        .unwrap_or(DEFAULT_NAMESPACE);
    format!("{name}.{namespace}.{CLUSTER_DOMAIN}")
}

struct ServiceIndex<'a> {
    services: &'a [Service],
}

impl<'a> ServiceIndex<'a> {
    /// Same-namespace match first, then the first service with that name anywhere
    fn find(&self, name: &str, namespace: &str) -> Option<&'a Service> {
        let named = |s: &&Service| s.metadata.name.as_deref() == Some(name);
        self.services
            .iter()
            .filter(named)
            .find(|s| s.metadata.namespace.as_deref() == Some(namespace))
            .or_else(|| self.services.iter().find(named))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ServicePort, ServiceSpec};
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressSpec,
        ServiceBackendPort,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn service(name: &str, namespace: &str, ports: &[(&str, i32)]) -> Service {
        Service {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(
                    ports
                        .iter()
                        .map(|(n, p)| ServicePort {
                            name: Some(n.to_string()),
                            port: *p,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn path(path: &str, path_type: &str, backend: &str, port: ServiceBackendPort) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some(path.to_string()),
            path_type: path_type.to_string(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend {
                    name: backend.to_string(),
                    port: Some(port),
                }),
                ..Default::default()
            },
        }
    }

    fn named(name: &str) -> ServiceBackendPort {
        ServiceBackendPort {
            name: Some(name.to_string()),
            number: None,
        }
    }

    fn numbered(number: i32) -> ServiceBackendPort {
        ServiceBackendPort {
            name: None,
            number: Some(number),
        }
    }

    fn ingress(class: Option<&str>, host: Option<&str>, paths: Vec<HTTPIngressPath>) -> Ingress {
        Ingress {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: Some(IngressSpec {
                ingress_class_name: class.map(str::to_string),
                rules: Some(vec![IngressRule {
                    host: host.map(str::to_string),
                    http: Some(HTTPIngressRuleValue { paths }),
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_named_port_resolves_to_service_port() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let services = vec![service("web", "default", &[("http", 8080)])];
        let ingresses = vec![ingress(
            Some("ingress-j8a"),
            None,
            vec![path("/", "ImplementationSpecific", "web", named("http"))],
        )];

        let extraction = extractor.extract(&ingresses, &services);
        assert!(extraction.skipped.is_empty());
        assert_eq!(
            extraction.routes,
            vec![Route::new(
                "/",
                "",
                PathType::Prefix,
                "web.default.svc.cluster.local:8080"
            )]
        );
    }

    #[test]
    fn test_numeric_port_needs_no_lookup() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let ingresses = vec![ingress(
            Some("ingress-j8a"),
            Some("example.org"),
            vec![path("/api", "Exact", "api", numbered(9000))],
        )];

        let extraction = extractor.extract(&ingresses, &[]);
        let route = &extraction.routes[0];
        assert_eq!(route.resource, "api.default.svc.cluster.local:9000");
        assert_eq!(route.host, "example.org");
        assert_eq!(route.path_type, PathType::Exact);
    }

    #[test]
    fn test_unresolvable_named_port_skips_only_that_path() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let services = vec![service("web", "default", &[("http", 8080)])];
        let ingresses = vec![ingress(
            Some("ingress-j8a"),
            None,
            vec![
                path("/broken", "Prefix", "web", named("grpc")),
                path("/", "Prefix", "web", named("http")),
            ],
        )];

        let extraction = extractor.extract(&ingresses, &services);
        assert_eq!(extraction.routes.len(), 1);
        assert_eq!(extraction.routes[0].path, "/");
        assert_eq!(
            extraction.skipped,
            vec![RouteError::NamedPortNotFound {
                service: "web".to_string(),
                port: "grpc".to_string(),
            }]
        );
    }

    #[test]
    fn test_named_port_without_service_fails() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let ingresses = vec![ingress(
            Some("ingress-j8a"),
            None,
            vec![path("/", "Prefix", "missing", named("http"))],
        )];

        let extraction = extractor.extract(&ingresses, &[]);
        assert!(extraction.routes.is_empty());
        assert!(matches!(
            extraction.skipped[0],
            RouteError::ServiceNotFound { .. }
        ));
    }

    #[test]
    fn test_ingress_without_class_is_ignored() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let ingresses = vec![
            ingress(None, None, vec![path("/", "Prefix", "web", numbered(80))]),
            ingress(Some("nginx"), None, vec![path("/", "Prefix", "web", numbered(80))]),
        ];

        let extraction = extractor.extract(&ingresses, &[]);
        assert!(extraction.routes.is_empty());
        assert_eq!(extraction.ignored, 2);
    }

    #[test]
    fn test_legacy_class_annotation_is_honoured() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let mut legacy = ingress(None, None, vec![path("/", "Prefix", "web", numbered(80))]);
        legacy.metadata.annotations = Some(
            [(LEGACY_CLASS_ANNOTATION.to_string(), "ingress-j8a".to_string())]
                .into_iter()
                .collect(),
        );

        assert!(extractor.is_ours(&legacy));
        assert_eq!(extractor.extract(&[legacy], &[]).routes.len(), 1);
    }

    #[test]
    fn test_dns_name_uses_service_namespace() {
        let svc = service("web", "shop", &[]);
        assert_eq!(
            service_dns_name("web", Some(&svc)),
            "web.shop.svc.cluster.local"
        );
        assert_eq!(service_dns_name("web", None), "web.default.svc.cluster.local");
    }

    #[test]
    fn test_service_lookup_prefers_ingress_namespace() {
        let services = vec![
            service("web", "other", &[("http", 1111)]),
            service("web", "default", &[("http", 8080)]),
        ];
        let index = ServiceIndex {
            services: &services,
        };

        let found = index.find("web", "default").unwrap();
        assert_eq!(found.metadata.namespace.as_deref(), Some("default"));

        let fallback = index.find("web", "elsewhere").unwrap();
        assert_eq!(fallback.metadata.namespace.as_deref(), Some("other"));
    }

    #[test]
    fn test_missing_service_backend() {
        let extractor = RouteExtractor::new("ingress-j8a");
        let mut resource_backed = ingress(Some("ingress-j8a"), None, vec![path("/", "Prefix", "web", numbered(80))]);
        if let Some(rules) = resource_backed.spec.as_mut().and_then(|s| s.rules.as_mut()) {
            if let Some(http) = rules[0].http.as_mut() {
                http.paths[0].backend.service = None;
            }
        }

        let extraction = extractor.extract(&[resource_backed], &[]);
        assert_eq!(
            extraction.skipped,
            vec![RouteError::MissingServiceBackend {
                ingress: "default/web".to_string(),
            }]
        );
    }
}
