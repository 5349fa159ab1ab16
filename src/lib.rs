//! Ingress Proxy Agent Library
//!
//! Provisions a reverse-proxy deployment in the cluster and keeps a versioned
//! routing table derived from the cluster's Ingress objects.

pub mod config;
pub mod daemon;
pub mod error;
pub mod k8s;
pub mod models;
pub mod routing;

pub use config::Config;
pub use daemon::{Daemon, DaemonState, ExitPolicy, ObjectCounts, PollSummary};
pub use error::{AgentError, ClusterError, ResourceKind, RouteError};

/// Agent version reported at startup
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
