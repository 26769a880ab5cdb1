use crate::metrics::{Cause, Ignored, IndexMetrics};
use ahash::AHashMap as HashMap;
use function_controller_core::{Lister, ResourceId, WorkQueue};
use function_controller_k8s_api::{Deployment, Function, ResourceExt};
use kubert::index::NamespacedRemoved;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::{
    sync::watch,
    time::{self, Duration, Instant, MissedTickBehavior},
};

pub(crate) const FUNCTION_KIND: &str = "Function";

pub type SharedIndex = Arc<RwLock<Index>>;

/// Holds the most recently observed Functions and Deployments, by namespace.
///
/// Every change that may require a Function to be reconciled enqueues that
/// Function's key.
pub struct Index {
    namespaces: HashMap<String, NamespaceIndex>,
    queue: WorkQueue<ResourceId>,
    synced: watch::Sender<Synced>,
    metrics: IndexMetrics,
}

#[derive(Debug, Default)]
struct NamespaceIndex {
    functions: HashMap<String, Arc<Function>>,
    deployments: HashMap<String, Arc<Deployment>>,
}

/// Tracks whether the initial list of each kind has been observed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Synced {
    pub functions: bool,
    pub deployments: bool,
}

/// A read handle on a [`SharedIndex`].
#[derive(Clone)]
pub struct Cache {
    index: SharedIndex,
    synced: watch::Receiver<Synced>,
}

// === impl Index ===

impl Index {
    pub fn shared(queue: WorkQueue<ResourceId>, metrics: IndexMetrics) -> SharedIndex {
        let (synced, _) = watch::channel(Synced::default());
        Arc::new(RwLock::new(Self {
            namespaces: HashMap::new(),
            queue,
            synced,
            metrics,
        }))
    }

    /// Enqueues every cached Function.
    ///
    /// Watches do not redeliver unchanged resources, so this is what brings
    /// back a Function whose owned resources drifted without a notification
    /// reaching the index.
    pub fn resync(&self) {
        let mut keys = 0;
        for (namespace, ns) in self.namespaces.iter() {
            for name in ns.functions.keys() {
                self.queue
                    .add(ResourceId::new(namespace.clone(), name.clone()));
                keys += 1;
            }
        }
        self.metrics.enqueued(Cause::Resync, keys);
        tracing::debug!(keys, "Resynced functions");
    }

    fn enqueue_owner(&self, deployment: &Deployment) {
        let Some(owner) = deployment
            .owner_references()
            .iter()
            .find(|owner| owner.controller == Some(true))
        else {
            self.metrics.ignored(Ignored::Unmanaged);
            return;
        };
        if owner.kind != FUNCTION_KIND {
            self.metrics.ignored(Ignored::Unmanaged);
            return;
        }

        let namespace = deployment.namespace().unwrap_or_default();
        let cached = self
            .namespaces
            .get(&namespace)
            .is_some_and(|ns| ns.functions.contains_key(&owner.name));
        if !cached {
            tracing::debug!(
                %namespace,
                function = %owner.name,
                deployment = %deployment.name_any(),
                "Ignoring orphaned deployment"
            );
            self.metrics.ignored(Ignored::Orphaned);
            return;
        }

        self.queue.add(ResourceId::new(namespace, owner.name.clone()));
        self.metrics.enqueued(Cause::OwnedDeployment, 1);
    }

    fn mark_synced(&self, update: impl FnOnce(&mut Synced)) {
        self.synced.send_modify(update);
    }

    /// Publishes the namespace's cache sizes and drops it once it is empty.
    fn update_namespace(&mut self, namespace: &str) {
        let (functions, deployments) = self
            .namespaces
            .get(namespace)
            .map_or((0, 0), |ns| (ns.functions.len(), ns.deployments.len()));
        self.metrics.set_sizes(namespace, functions, deployments);
        if functions == 0 && deployments == 0 {
            self.namespaces.remove(namespace);
        }
    }
}

fn resource_id(resource: &impl ResourceExt) -> Option<ResourceId> {
    let namespace = resource.namespace().filter(|ns| !ns.is_empty())?;
    let name = resource.meta().name.clone().filter(|n| !n.is_empty())?;
    Some(ResourceId::new(namespace, name))
}

impl kubert::index::IndexNamespacedResource<Function> for Index {
    fn apply(&mut self, function: Function) {
        let Some(id) = resource_id(&function) else {
            tracing::warn!(uid = ?function.uid(), "Function has no namespace or name");
            self.metrics.ignored(Ignored::Malformed);
            return;
        };

        self.namespaces
            .entry(id.namespace.clone())
            .or_default()
            .functions
            .insert(id.name.clone(), Arc::new(function));
        self.update_namespace(&id.namespace);
        self.queue.add(id);
        self.metrics.enqueued(Cause::Function, 1);
    }

    fn delete(&mut self, namespace: String, name: String) {
        // Owned resources are garbage collected by the API server.
        if let Some(ns) = self.namespaces.get_mut(&namespace) {
            ns.functions.remove(&name);
        }
        self.update_namespace(&namespace);
    }

    fn reset(&mut self, functions: Vec<Function>, removed: NamespacedRemoved) {
        for function in functions {
            <Self as kubert::index::IndexNamespacedResource<Function>>::apply(self, function);
        }
        for (namespace, names) in removed {
            for name in names {
                <Self as kubert::index::IndexNamespacedResource<Function>>::delete(
                    self,
                    namespace.clone(),
                    name,
                );
            }
        }
        self.mark_synced(|synced| synced.functions = true);
    }
}

impl kubert::index::IndexNamespacedResource<Deployment> for Index {
    fn apply(&mut self, deployment: Deployment) {
        let Some(id) = resource_id(&deployment) else {
            tracing::warn!(uid = ?deployment.uid(), "Deployment has no namespace or name");
            self.metrics.ignored(Ignored::Malformed);
            return;
        };

        let deployment = Arc::new(deployment);
        let prior = self
            .namespaces
            .entry(id.namespace.clone())
            .or_default()
            .deployments
            .insert(id.name, deployment.clone());
        self.update_namespace(&id.namespace);

        // Relists redeliver unchanged resources.
        if let Some(prior) = prior {
            if prior.resource_version().is_some()
                && prior.resource_version() == deployment.resource_version()
            {
                self.metrics.ignored(Ignored::Unchanged);
                return;
            }
        }

        self.enqueue_owner(&deployment);
    }

    fn delete(&mut self, namespace: String, name: String) {
        // The delete carries no payload, so the owner is resolved from the
        // last state observed for the Deployment.
        let Some(deployment) = self
            .namespaces
            .get_mut(&namespace)
            .and_then(|ns| ns.deployments.remove(&name))
        else {
            tracing::debug!(%namespace, %name, "Ignoring delete of unknown deployment");
            self.metrics.ignored(Ignored::UnknownDelete);
            return;
        };
        self.update_namespace(&namespace);
        self.enqueue_owner(&deployment);
    }

    fn reset(&mut self, deployments: Vec<Deployment>, removed: NamespacedRemoved) {
        for deployment in deployments {
            <Self as kubert::index::IndexNamespacedResource<Deployment>>::apply(self, deployment);
        }
        for (namespace, names) in removed {
            for name in names {
                <Self as kubert::index::IndexNamespacedResource<Deployment>>::delete(
                    self,
                    namespace.clone(),
                    name,
                );
            }
        }
        self.mark_synced(|synced| synced.deployments = true);
    }
}

/// Enqueues every cached Function once per `period`.
pub async fn run_resync(index: SharedIndex, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        index.read().resync();
    }
}

// === impl Cache ===

impl Cache {
    pub fn new(index: SharedIndex) -> Self {
        let synced = index.read().synced.subscribe();
        Self { index, synced }
    }

    /// Completes once the initial list of both Functions and Deployments has
    /// been observed.
    pub async fn synced(&self) -> Result<(), watch::error::RecvError> {
        self.synced
            .clone()
            .wait_for(|synced| synced.functions && synced.deployments)
            .await?;
        Ok(())
    }
}

impl Lister<Function> for Cache {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Function>> {
        self.index
            .read()
            .namespaces
            .get(namespace)?
            .functions
            .get(name)
            .cloned()
    }

    fn list(&self, namespace: &str) -> Vec<Arc<Function>> {
        self.index
            .read()
            .namespaces
            .get(namespace)
            .map(|ns| ns.functions.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Lister<Deployment> for Cache {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<Deployment>> {
        self.index
            .read()
            .namespaces
            .get(namespace)?
            .deployments
            .get(name)
            .cloned()
    }

    fn list(&self, namespace: &str) -> Vec<Arc<Deployment>> {
        self.index
            .read()
            .namespaces
            .get(namespace)
            .map(|ns| ns.deployments.values().cloned().collect())
            .unwrap_or_default()
    }
}
