use crate::{metrics::ControllerMetrics, Cluster, Reconciler, Recorder};
use function_controller_core::{Lister, ResourceId, WorkQueue};
use function_controller_k8s_api::{Deployment, Function};
use std::sync::Arc;
use tracing::{info_span, Instrument};

/// Drains the work queue with a fixed pool of workers.
///
/// The queue never hands the same key to two workers at once, so reconciles
/// of a single Function are serialized.
pub struct Controller<L, C, R> {
    queue: WorkQueue<ResourceId>,
    reconciler: Arc<Reconciler<L, C, R>>,
    metrics: ControllerMetrics,
}

impl<L, C, R> Controller<L, C, R>
where
    L: Lister<Function> + Lister<Deployment> + Send + Sync + 'static,
    C: Cluster + 'static,
    R: Recorder + 'static,
{
    pub fn new(
        queue: WorkQueue<ResourceId>,
        reconciler: Reconciler<L, C, R>,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            queue,
            reconciler: Arc::new(reconciler),
            metrics,
        }
    }

    /// Runs `workers` workers until shutdown is signaled.
    ///
    /// On shutdown the queue stops accepting work. In-flight reconciles are
    /// allowed to complete before the shutdown handle is released.
    pub async fn run(self, workers: usize, shutdown: drain::Watch) {
        tracing::info!(workers, "Starting workers");
        let this = Arc::new(self);
        let handles = (0..workers)
            .map(|worker| {
                let this = this.clone();
                tokio::spawn(
                    async move { while this.process_next().await {} }
                        .instrument(info_span!("worker", id = worker)),
                )
            })
            .collect::<Vec<_>>();

        let release = shutdown.signaled().await;
        tracing::debug!("Shutting down workers");
        this.queue.shutdown();
        release
            .release_after(futures::future::join_all(handles))
            .await;
        tracing::info!("Workers stopped");
    }

    /// Reconciles the next key from the queue. Returns false once the queue
    /// has been shut down.
    pub(crate) async fn process_next(&self) -> bool {
        let Some(id) = self.queue.get().await else {
            return false;
        };
        self.metrics.set_queue_depth(self.queue.len());

        let result = self
            .reconciler
            .sync(&id)
            .instrument(info_span!("reconcile", function = %id))
            .await;
        self.metrics.reconciled(&result);
        match result {
            Ok(outcome) => {
                tracing::debug!(function = %id, ?outcome, "Reconciled");
                self.queue.forget(&id);
            }
            Err(error) => {
                let requeues = self.queue.num_requeues(&id);
                tracing::warn!(function = %id, %error, requeues, "Failed to reconcile; retrying");
                self.queue.add_rate_limited(id.clone());
                self.metrics.requeued();
            }
        }
        self.queue.done(&id);
        true
    }
}
