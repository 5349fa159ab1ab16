//! Agent control loop
//!
//! Startup walks `Init -> Authenticated -> VersionChecked -> PermissionsChecked
//! -> Reconciled`; any failure on the way is fatal. After that the daemon polls
//! forever: list ingresses, extract routes, append a snapshot to the route
//! cache, log cluster object counts, sleep.

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use strum::Display;
use tracing::{debug, error, info, instrument, warn};

use crate::config::Config;
use crate::error::{cause_chain, AgentError};
use crate::k8s::{
    check_permissions, check_version, AuthenticationResolver, ClusterConnection,
    ReconcileReport, ResourceReconciler,
};
use crate::models::DesiredClusterState;
use crate::routing::{ProxyConfig, RouteCache, RouteExtractor, RouteTable};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum DaemonState {
    Init,
    Authenticated,
    VersionChecked,
    PermissionsChecked,
    Reconciled,
    Polling,
}

/// What a fatal error does to the process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitPolicy {
    /// Log and exit with status 1
    Exit,
    /// Log and hand the error back to the caller
    NoExit,
}

/// Cluster object counts reported every poll; `None` when the list failed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ObjectCounts {
    pub config_maps: Option<usize>,
    pub services: Option<usize>,
    pub secrets: Option<usize>,
    pub ingresses: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct PollSummary {
    pub snapshot: Arc<RouteTable>,
    /// Ingress paths that could not be resolved this cycle
    pub skipped: usize,
    /// True when the snapshot hash differs from the previous one
    pub changed: bool,
    pub counts: ObjectCounts,
}

pub struct Daemon {
    resolver: AuthenticationResolver,
    desired: DesiredClusterState,
    extractor: RouteExtractor,
    cache: Arc<RouteCache>,
    poll_interval: Duration,
    exit_policy: ExitPolicy,
    state: DaemonState,
    connection: Option<ClusterConnection>,
}

impl Daemon {
    pub fn new(config: &Config, resolver: AuthenticationResolver, exit_policy: ExitPolicy) -> Self {
        Self {
            resolver,
            desired: DesiredClusterState::from(config),
            extractor: RouteExtractor::new(config.ingress_class.clone()),
            cache: Arc::new(RouteCache::new(config.history_limit)),
            poll_interval: config.poll_interval(),
            exit_policy,
            state: DaemonState::Init,
            connection: None,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn desired(&self) -> &DesiredClusterState {
        &self.desired
    }

    pub fn connection(&self) -> Option<&ClusterConnection> {
        self.connection.as_ref()
    }

    /// Shared handle for readers of the current routing table
    pub fn cache(&self) -> Arc<RouteCache> {
        Arc::clone(&self.cache)
    }

    fn advance(&mut self, next: DaemonState) {
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
    }

    /// Authenticate, check version and permissions, then reconcile once
    pub async fn bootstrap(&mut self) -> Result<ReconcileReport, AgentError> {
        match self.try_bootstrap().await {
            Ok(report) => Ok(report),
            Err(e) => Err(self.fatal(e)),
        }
    }

    async fn try_bootstrap(&mut self) -> Result<ReconcileReport, AgentError> {
        let mut connection = self.resolver.authenticate().await?;
        self.advance(DaemonState::Authenticated);

        check_version(&mut connection).await?;
        self.advance(DaemonState::VersionChecked);

        let api = Arc::clone(&connection.api);
        self.connection = Some(connection);

        check_permissions(api.as_ref()).await?;
        self.advance(DaemonState::PermissionsChecked);

        let report = ResourceReconciler::new(api.as_ref(), &mut self.desired)
            .reconcile()
            .await?;
        self.advance(DaemonState::Reconciled);

        Ok(report)
    }

    /// Run one polling cycle against the bootstrapped connection
    #[instrument(skip(self))]
    pub async fn poll_once(&mut self) -> Result<PollSummary, AgentError> {
        let api = match &self.connection {
            Some(connection) if self.state >= DaemonState::Reconciled => {
                Arc::clone(&connection.api)
            }
            _ => return Err(AgentError::NotBootstrapped),
        };
        self.advance(DaemonState::Polling);

        let ingresses = api
            .list_ingresses()
            .await
            .map_err(AgentError::IngressList)?;

        let services = match api.list_services().await {
            Ok(services) => Some(services),
            Err(e) => {
                warn!(error = %e, "Unable to list services, backend lookups fall back to defaults");
                None
            }
        };

        let extraction = self
            .extractor
            .extract(&ingresses, services.as_deref().unwrap_or_default());

        let previous = (!self.cache.is_empty()).then(|| self.cache.current());
        let snapshot = self.cache.update(extraction.routes);
        let changed = previous
            .map(|p| p.content_hash() != snapshot.content_hash())
            .unwrap_or(true);

        if changed {
            announce(&snapshot);
        }

        let counts = ObjectCounts {
            config_maps: count(api.list_config_maps().await, "config maps"),
            services: services.as_ref().map(Vec::len),
            secrets: count(api.list_secrets().await, "secrets"),
            ingresses: Some(ingresses.len()),
        };
        info!(
            config_maps = counts.config_maps,
            services = counts.services,
            secrets = counts.secrets,
            ingresses = counts.ingresses,
            "Detected cluster objects"
        );

        Ok(PollSummary {
            snapshot,
            skipped: extraction.skipped.len(),
            changed,
            counts,
        })
    }

    /// Bootstrap, then poll until the process is stopped
    pub async fn run(mut self) -> Result<(), AgentError> {
        let report = self.bootstrap().await?;
        info!(
            steps = report.steps.len(),
            replicas = self.desired.deployment.replicas,
            "Cluster resources reconciled"
        );

        loop {
            if let Err(e) = self.poll_once().await {
                error!(error = %cause_chain(&e), "Polling cycle failed");
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn fatal(&self, err: AgentError) -> AgentError {
        error!(state = %self.state, cause = %cause_chain(&err), "Shutdown");
        if self.exit_policy == ExitPolicy::Exit {
            std::process::exit(1);
        }
        err
    }
}

fn count<T, E: std::fmt::Display>(listed: Result<Vec<T>, E>, what: &str) -> Option<usize> {
    match listed {
        Ok(items) => Some(items.len()),
        Err(e) => {
            error!(error = %e, "Unable to list {}", what);
            None
        }
    }
}

fn announce(snapshot: &RouteTable) {
    info!(
        hash = %snapshot.content_hash(),
        routes = snapshot.routes().len(),
        "Routing table changed"
    );
    match ProxyConfig::from_table(snapshot).to_yaml() {
        Ok(document) => debug!(config = %document, "Rendered proxy configuration"),
        Err(e) => warn!(error = %e, "Unable to render proxy configuration"),
    }
}
