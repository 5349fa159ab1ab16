//! One-shot create-or-detect reconciliation of the proxy deployment
//!
//! Each step tries to create its object and, if that fails, reads the
//! existing one instead. Steps run in a fixed order because the namespaced
//! objects need the namespace. The first step that can neither create nor read
//! its object aborts the pass.

use serde::Serialize;
use std::future::Future;
use strum::Display;
use tracing::{info, instrument, warn};

use super::client::ClusterApi;
use super::resources;
use crate::error::{AgentError, ClusterError, ResourceKind};
use crate::models::DesiredClusterState;

/// Objects the reconciler provisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Namespace,
    IngressClass,
    Deployment,
    Service,
}

impl Step {
    pub fn kind(self) -> ResourceKind {
        match self {
            Step::Namespace => ResourceKind::Namespace,
            Step::IngressClass => ResourceKind::IngressClass,
            Step::Deployment => ResourceKind::Deployment,
            Step::Service => ResourceKind::Service,
        }
    }
}

/// Reconciliation order; namespace first
pub const RECONCILE_ORDER: [Step; 4] = [
    Step::Namespace,
    Step::IngressClass,
    Step::Deployment,
    Step::Service,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Outcome {
    Created,
    Detected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileStep {
    pub kind: ResourceKind,
    pub name: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub steps: Vec<ReconcileStep>,
}

impl ReconcileReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.steps.iter().filter(|s| s.outcome == outcome).count()
    }
}

pub struct ResourceReconciler<'a> {
    api: &'a dyn ClusterApi,
    desired: &'a mut DesiredClusterState,
}

impl<'a> ResourceReconciler<'a> {
    pub fn new(api: &'a dyn ClusterApi, desired: &'a mut DesiredClusterState) -> Self {
        Self { api, desired }
    }

    /// Run every step in `RECONCILE_ORDER`, stopping at the first fatal one
    #[instrument(skip(self), fields(namespace = %self.desired.namespace))]
    pub async fn reconcile(&mut self) -> Result<ReconcileReport, AgentError> {
        let mut report = ReconcileReport::default();
        for step in RECONCILE_ORDER {
            let result = self.step(step).await?;
            report.steps.push(result);
        }
        Ok(report)
    }

    pub async fn step(&mut self, step: Step) -> Result<ReconcileStep, AgentError> {
        match step {
            Step::Namespace => self.namespace().await,
            Step::IngressClass => self.ingress_class().await,
            Step::Deployment => self.deployment().await,
            Step::Service => self.service().await,
        }
    }

    async fn namespace(&mut self) -> Result<ReconcileStep, AgentError> {
        let api = self.api;
        let name = self.desired.namespace.clone();
        let spec = resources::create_namespace(self.desired);

        let (outcome, _) = create_or_detect(
            ResourceKind::Namespace,
            &name,
            api.create_namespace(&spec),
            || api.get_namespace(&name),
        )
        .await?;
        Ok(finished(ResourceKind::Namespace, name, outcome))
    }

    async fn ingress_class(&mut self) -> Result<ReconcileStep, AgentError> {
        let api = self.api;
        let name = self.desired.ingress_class.clone();
        let spec = resources::create_ingress_class(self.desired);

        let (outcome, _) = create_or_detect(
            ResourceKind::IngressClass,
            &name,
            api.create_ingress_class(&spec),
            || api.get_ingress_class(&name),
        )
        .await?;
        Ok(finished(ResourceKind::IngressClass, name, outcome))
    }

    /// Create the deployment, or adopt the replica count of an existing one
    async fn deployment(&mut self) -> Result<ReconcileStep, AgentError> {
        let api = self.api;
        let namespace = self.desired.namespace.clone();
        let name = self.desired.deployment.name.clone();
        let spec = resources::create_deployment(self.desired);

        let (outcome, existing) = create_or_detect(
            ResourceKind::Deployment,
            &name,
            api.create_deployment(&namespace, &spec),
            || api.get_deployment(&namespace, &name),
        )
        .await?;

        if outcome == Outcome::Detected {
            let observed = existing.spec.as_ref().and_then(|s| s.replicas);
            if let Some(observed) = observed {
                let desired = self.desired.deployment.replicas;
                if observed != desired {
                    info!(
                        deployment = %name,
                        desired,
                        observed,
                        "Adopting replica count of existing deployment"
                    );
                    self.desired.deployment.replicas = observed;
                }
            }
        }

        Ok(finished(ResourceKind::Deployment, name, outcome))
    }

    async fn service(&mut self) -> Result<ReconcileStep, AgentError> {
        let api = self.api;
        let namespace = self.desired.namespace.clone();
        let name = self.desired.service.clone();
        let spec = resources::create_service(self.desired);

        let (outcome, _) = create_or_detect(
            ResourceKind::Service,
            &name,
            api.create_service(&namespace, &spec),
            || api.get_service(&namespace, &name),
        )
        .await?;
        Ok(finished(ResourceKind::Service, name, outcome))
    }
}

fn finished(kind: ResourceKind, name: String, outcome: Outcome) -> ReconcileStep {
    ReconcileStep {
        kind,
        name,
        outcome,
    }
}

/// One create, then at most one get
async fn create_or_detect<T, C, G, GF>(
    kind: ResourceKind,
    name: &str,
    create: C,
    get: G,
) -> Result<(Outcome, T), AgentError>
where
    C: Future<Output = Result<T, ClusterError>>,
    G: FnOnce() -> GF,
    GF: Future<Output = Result<T, ClusterError>>,
{
    match create.await {
        Ok(created) => {
            info!(kind = %kind, name, "Created");
            return Ok((Outcome::Created, created));
        }
        Err(e) if e.is_conflict() => {}
        Err(e) => warn!(kind = %kind, name, error = %e, "Create failed, looking for existing object"),
    }

    match get().await {
        Ok(existing) => {
            info!(kind = %kind, name, "Detected");
            Ok((Outcome::Detected, existing))
        }
        Err(source) => Err(AgentError::Reconciliation {
            kind,
            name: name.to_string(),
            source,
        }),
    }
}
