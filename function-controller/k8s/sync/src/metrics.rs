use crate::Outcome;
use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Family<OutcomeLabels, Counter>,
    requeues: Counter,
    queue_depth: Gauge,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OutcomeLabels {
    outcome: &'static str,
}

impl ControllerMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();
        prom.register(
            "reconciles",
            "Count of completed reconciles by outcome",
            metrics.reconciles.clone(),
        );
        prom.register(
            "requeues",
            "Count of failed reconciles scheduled for a retry",
            metrics.requeues.clone(),
        );
        prom.register(
            "queue_depth",
            "Number of functions waiting to be reconciled",
            metrics.queue_depth.clone(),
        );
        metrics
    }

    pub(crate) fn reconciled(&self, outcome: &Result<Outcome, crate::Error>) {
        let outcome = match outcome {
            Ok(outcome) => outcome.as_str(),
            Err(_) => "error",
        };
        self.reconciles
            .get_or_create(&OutcomeLabels { outcome })
            .inc();
    }

    pub(crate) fn requeued(&self) {
        self.requeues.inc();
    }

    pub(crate) fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Conflict => "conflict",
        }
    }
}
