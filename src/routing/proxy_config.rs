//! Configuration document consumed by the proxy
//!
//! The proxy reads a YAML document with a downstream listener, a list of
//! routes and a map of named upstream resources. The agent produces one at
//! deployment time (a placeholder) and one for every routing table change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::cache::RouteTable;
use super::route::{PathType, Route};

/// Environment variable the proxy reads its configuration from
pub const PROXY_CONFIG_ENV: &str = "J8ACFG_YML";

pub const DOWNSTREAM_HTTP_PORT: u16 = 80;

const PLACEHOLDER_RESOURCE: &str = "placeholder";
const PLACEHOLDER_PORT: u16 = 59999;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub connection: Connection,
    pub routes: Vec<ProxyRoute>,
    pub resources: BTreeMap<String, Vec<Upstream>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub downstream: Downstream,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Downstream {
    pub http: Listener,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRoute {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_type: Option<PathType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub resource: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Upstream {
    pub url: UpstreamUrl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamUrl {
    pub scheme: String,
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    fn with_routes(routes: Vec<ProxyRoute>, resources: BTreeMap<String, Vec<Upstream>>) -> Self {
        Self {
            connection: Connection {
                downstream: Downstream {
                    http: Listener {
                        port: DOWNSTREAM_HTTP_PORT,
                    },
                },
            },
            routes,
            resources,
        }
    }

    /// Placeholder configuration injected into a freshly created deployment
    pub fn bootstrap() -> Self {
        let route = ProxyRoute {
            path: "/".to_string(),
            path_type: None,
            host: None,
            resource: PLACEHOLDER_RESOURCE.to_string(),
        };
        let resources = [(
            PLACEHOLDER_RESOURCE.to_string(),
            vec![Upstream::http("localhost", PLACEHOLDER_PORT)],
        )]
        .into_iter()
        .collect();

        Self::with_routes(vec![route], resources)
    }

    /// Configuration serving every route of a snapshot
    ///
    /// Routes whose resource is not a `host:port` address are left out.
    pub fn from_table(table: &RouteTable) -> Self {
        let mut routes = Vec::with_capacity(table.routes().len());
        let mut resources = BTreeMap::new();

        for route in table.routes() {
            let Some((host, port)) = route.backend() else {
                continue;
            };
            let name = resource_name(host, port);
            resources
                .entry(name.clone())
                .or_insert_with(|| vec![Upstream::http(host, port)]);
            routes.push(ProxyRoute::from_route(route, name));
        }

        Self::with_routes(routes, resources)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

impl ProxyRoute {
    fn from_route(route: &Route, resource: String) -> Self {
        Self {
            path: route.path.clone(),
            path_type: Some(route.path_type),
            host: (!route.is_wildcard_host()).then(|| route.host.clone()),
            resource,
        }
    }
}

impl Upstream {
    fn http(host: &str, port: u16) -> Self {
        Self {
            url: UpstreamUrl {
                scheme: "http".to_string(),
                host: host.to_string(),
                port,
            },
        }
    }
}

/// `web.shop.svc.cluster.local` + 8080 becomes `web-shop-8080`
fn resource_name(host: &str, port: u16) -> String {
    let mut labels = host.split('.').take(2);
    match (labels.next(), labels.next()) {
        (Some(service), Some(namespace)) => format!("{service}-{namespace}-{port}"),
        (Some(service), None) => format!("{service}-{port}"),
        _ => format!("upstream-{port}"),
    }
}
