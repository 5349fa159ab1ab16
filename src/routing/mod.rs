//! Route derivation and the versioned routing table
//!
//! Ingresses are turned into `Route`s, collected into immutable
//! content-addressed `RouteTable` snapshots and rendered for the proxy.

mod cache;
mod extractor;
mod proxy_config;
mod route;

pub use cache::{content_hash, RouteCache, RouteTable};
pub use extractor::{
    resolve_port, service_dns_name, Extraction, RouteExtractor, CLUSTER_DOMAIN,
    DEFAULT_NAMESPACE, LEGACY_CLASS_ANNOTATION,
};
pub use proxy_config::{ProxyConfig, ProxyRoute, Upstream, PROXY_CONFIG_ENV};
pub use route::{PathType, Route};
