use crate::{
    diff, is_already_exists,
    recorder::{reasons, Recorder},
    render::{self, ImagePullPolicy},
    secrets, service, Cluster,
};
use function_controller_core::{Lister, ResourceId};
use function_controller_k8s_api::{
    self as k8s, events::EventType, Deployment, Function, FunctionStatus, OwnerReference,
    ResourceExt,
};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct Config {
    pub image_pull_policy: ImagePullPolicy,

    /// Writes the Deployment's available replicas to the Function's status.
    pub update_status: bool,
}

/// Converges the resources owned by a single Function.
pub struct Reconciler<L, C, R> {
    cache: L,
    cluster: C,
    recorder: R,
    config: Config,
}

/// A failed reconcile that should be retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to read secret {name}: {source}")]
    Secret {
        name: String,
        #[source]
        source: k8s::Error,
    },

    #[error(transparent)]
    Kube(#[from] k8s::Error),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,

    /// The Function no longer exists or cannot be reconciled as declared.
    Skipped,

    /// A Deployment with the Function's name is controlled by something else.
    Conflict,
}

const SYNCED_MESSAGE: &str = "Function synced successfully";

// === impl Reconciler ===

impl<L, C, R> Reconciler<L, C, R>
where
    L: Lister<Function> + Lister<Deployment>,
    C: Cluster,
    R: Recorder,
{
    pub fn new(cache: L, cluster: C, recorder: R, config: Config) -> Self {
        Self {
            cache,
            cluster,
            recorder,
            config,
        }
    }

    pub async fn sync(&self, id: &ResourceId) -> Result<Outcome, Error> {
        let Some(function) = Lister::<Function>::get(&self.cache, &id.namespace, &id.name) else {
            tracing::debug!("Function no longer exists");
            return Ok(Outcome::Skipped);
        };

        if function.spec.name.is_empty() {
            tracing::warn!("Function must specify a deployment name");
            return Ok(Outcome::Skipped);
        }
        let Some(owner) = render::owner_reference(&function) else {
            tracing::warn!("Function has no uid");
            return Ok(Outcome::Skipped);
        };

        let name = &function.spec.name;
        let (outcome, deployment) =
            match Lister::<Deployment>::get(&self.cache, &id.namespace, name) {
                None => {
                    let created = self.create(&function, &owner).await?;
                    (Outcome::Created, created.map(Arc::new))
                }

                Some(deployment) => {
                    if !is_controlled_by(&deployment, &owner) {
                        tracing::warn!(deployment = %name, "Deployment is not controlled by this function");
                        let message = format!(
                            "Resource {name:?} already exists and is not managed by OpenFaaS"
                        );
                        self.recorder
                            .record(
                                &function,
                                EventType::Warning,
                                reasons::RESOURCE_EXISTS,
                                message,
                            )
                            .await;
                        return Ok(Outcome::Conflict);
                    }

                    if diff::needs_update(&function.spec, &deployment) {
                        let updated = self.update(&function, &owner, &deployment).await?;
                        (Outcome::Updated, Some(Arc::new(updated)))
                    } else {
                        (Outcome::Unchanged, Some(deployment))
                    }
                }
            };

        if self.config.update_status {
            if let Some(deployment) = deployment {
                self.update_status(&function, &deployment).await?;
            }
        }

        self.recorder
            .record(
                &function,
                EventType::Normal,
                reasons::SYNCED,
                SYNCED_MESSAGE.to_string(),
            )
            .await;
        Ok(outcome)
    }

    /// Creates the Function's Service and Deployment.
    ///
    /// Returns `None` if the Deployment was created concurrently by another
    /// writer.
    async fn create(
        &self,
        function: &Function,
        owner: &OwnerReference,
    ) -> Result<Option<Deployment>, Error> {
        let name = &function.spec.name;
        match self
            .cluster
            .create_service(&service::service(function, owner))
            .await
        {
            Ok(()) => tracing::info!(service = %name, "Created service"),
            Err(error) if is_already_exists(&error) => {
                tracing::debug!(service = %name, "Service already exists");
            }
            Err(error) => return Err(error.into()),
        }

        let secrets = self.resolve_secrets(function).await?;
        let desired = render::deployment(
            function,
            owner,
            &secrets,
            self.config.image_pull_policy,
        );
        match self.cluster.create_deployment(&desired).await {
            Ok(created) => {
                tracing::info!(deployment = %name, "Created deployment");
                Ok(Some(created))
            }
            Err(error) if is_already_exists(&error) => {
                tracing::debug!(deployment = %name, "Deployment already exists");
                Ok(None)
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update(
        &self,
        function: &Function,
        owner: &OwnerReference,
        current: &Deployment,
    ) -> Result<Deployment, Error> {
        // Secrets are fetched again in case they were rotated.
        let secrets = self.resolve_secrets(function).await?;
        let mut desired = render::deployment(
            function,
            owner,
            &secrets,
            self.config.image_pull_policy,
        );
        desired.metadata.resource_version = current.resource_version();

        let updated = self.cluster.update_deployment(&desired).await?;
        tracing::info!(deployment = %function.spec.name, "Updated deployment");
        Ok(updated)
    }

    async fn resolve_secrets(&self, function: &Function) -> Result<secrets::Secrets, Error> {
        let names = function.spec.secrets.as_deref().unwrap_or_default();
        let namespace = function.namespace().unwrap_or_default();
        secrets::resolve(&self.cluster, &namespace, names).await
    }

    async fn update_status(
        &self,
        function: &Function,
        deployment: &Deployment,
    ) -> Result<(), Error> {
        let available_replicas = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas)
            .unwrap_or(0);
        let current = function
            .status
            .as_ref()
            .map(|status| status.available_replicas);
        if current == Some(available_replicas) {
            return Ok(());
        }

        let status = FunctionStatus { available_replicas };
        self.cluster
            .patch_function_status(
                &function.namespace().unwrap_or_default(),
                &function.name_any(),
                &status,
            )
            .await?;
        tracing::debug!(available_replicas, "Updated function status");
        Ok(())
    }
}

/// Tests whether the Deployment's controller reference identifies the same
/// object as `owner`.
fn is_controlled_by(deployment: &Deployment, owner: &OwnerReference) -> bool {
    deployment
        .owner_references()
        .iter()
        .find(|r| r.controller == Some(true))
        .is_some_and(|r| r.kind == owner.kind && r.uid == owner.uid)
}
