use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

/// Observes how watch notifications turn into reconciles.
#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    functions: Family<NamespaceLabels, Gauge>,
    deployments: Family<NamespaceLabels, Gauge>,
    enqueues: Family<CauseLabels, Counter>,
    ignored: Family<ReasonLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct NamespaceLabels {
    namespace: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct CauseLabels {
    cause: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReasonLabels {
    reason: &'static str,
}

/// What caused a Function key to be enqueued.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Cause {
    Function,
    OwnedDeployment,
    Resync,
}

/// Why a notification did not enqueue anything.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Ignored {
    /// The object has no namespace or name.
    Malformed,
    /// The Deployment is not controlled by a Function.
    Unmanaged,
    /// The Deployment's controlling Function is not cached.
    Orphaned,
    /// A relist redelivered a Deployment at the same resourceVersion.
    Unchanged,
    /// A Deployment that was never observed was deleted.
    UnknownDelete,
}

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "functions",
            "Number of Functions in the cache",
            metrics.functions.clone(),
        );
        prom.register(
            "deployments",
            "Number of Deployments in the cache",
            metrics.deployments.clone(),
        );
        prom.register(
            "enqueues",
            "Count of Function keys enqueued by cause",
            metrics.enqueues.clone(),
        );
        prom.register(
            "ignored",
            "Count of notifications that enqueued nothing by reason",
            metrics.ignored.clone(),
        );
        metrics
    }

    pub(crate) fn set_sizes(&self, namespace: &str, functions: usize, deployments: usize) {
        let labels = NamespaceLabels {
            namespace: namespace.to_string(),
        };
        self.functions.get_or_create(&labels).set(functions as i64);
        self.deployments.get_or_create(&labels).set(deployments as i64);
    }

    pub(crate) fn enqueued(&self, cause: Cause, keys: u64) {
        let cause = match cause {
            Cause::Function => "function",
            Cause::OwnedDeployment => "deployment",
            Cause::Resync => "resync",
        };
        self.enqueues.get_or_create(&CauseLabels { cause }).inc_by(keys);
    }

    pub(crate) fn ignored(&self, reason: Ignored) {
        let reason = match reason {
            Ignored::Malformed => "malformed",
            Ignored::Unmanaged => "unmanaged",
            Ignored::Orphaned => "orphaned",
            Ignored::Unchanged => "unchanged",
            Ignored::UnknownDelete => "unknown_delete",
        };
        self.ignored.get_or_create(&ReasonLabels { reason }).inc();
    }
}
