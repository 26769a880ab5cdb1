use crate::{
    core::{Backoff, ResourceId, WorkQueue},
    index::{self, Cache, Index, IndexMetrics},
    k8s::{Deployment, Function},
    sync::{self, Config, Controller, ControllerMetrics, ImagePullPolicy, Reconciler},
};
use anyhow::{bail, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::num::NonZeroUsize;
use tokio::time::{self, Duration};
use tracing::{info, info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "function-controller", about = "An OpenFaaS Function controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "function_controller=info,warn",
        env = "FUNCTION_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The namespace in which Functions are watched and their workloads
    /// created.
    #[clap(long, default_value = "openfaas-fn", env = "function_namespace")]
    function_namespace: String,

    #[clap(long, default_value = "Always", env = "image_pull_policy")]
    image_pull_policy: ImagePullPolicy,

    /// How often every cached Function is reconciled regardless of changes.
    /// Zero disables the periodic resync.
    #[clap(long, default_value = "30")]
    resync_interval_secs: u64,

    #[clap(long, default_value = "2")]
    workers: NonZeroUsize,

    #[clap(long, default_value = "60")]
    cache_sync_timeout_secs: u64,

    #[clap(long, default_value = "5")]
    backoff_base_ms: u64,

    #[clap(long, default_value = "1000")]
    backoff_max_secs: u64,

    /// Writes each Deployment's available replica count to its Function's
    /// status.
    #[clap(long)]
    update_status: bool,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            function_namespace,
            image_pull_policy,
            resync_interval_secs,
            workers,
            cache_sync_timeout_secs,
            backoff_base_ms,
            backoff_max_secs,
            update_status,
        } = self;

        let queue = WorkQueue::<ResourceId>::new(Backoff::new(
            Duration::from_millis(backoff_base_ms),
            Duration::from_secs(backoff_max_secs),
        ));

        let mut prom = <Registry>::default();
        let index_metrics = IndexMetrics::register(prom.sub_registry_with_prefix("index"));
        let index = Index::shared(queue.clone(), index_metrics);
        let controller_metrics =
            ControllerMetrics::register(prom.sub_registry_with_prefix("controller"));
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        info!(
            namespace = %function_namespace,
            %image_pull_policy,
            update_status,
            "Starting controller"
        );

        // Spawn resource watches.

        let functions = runtime
            .watch_namespaced::<Function>(function_namespace.clone(), watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), functions)
                .instrument(info_span!("functions")),
        );

        let deployments = runtime.watch_namespaced::<Deployment>(
            function_namespace.clone(),
            watcher::Config::default(),
        );
        tokio::spawn(
            kubert::index::namespaced(index.clone(), deployments)
                .instrument(info_span!("deployments")),
        );

        let cache = Cache::new(index.clone());
        info!("Waiting for caches to sync");
        match time::timeout(
            Duration::from_secs(cache_sync_timeout_secs),
            cache.synced(),
        )
        .await
        {
            Ok(Ok(())) => info!("Caches synced"),
            Ok(Err(_)) | Err(_) => bail!("failed to wait for caches to sync"),
        }

        if resync_interval_secs > 0 {
            tokio::spawn(
                index::run_resync(index, Duration::from_secs(resync_interval_secs))
                    .instrument(info_span!("resync")),
            );
        }

        let client = runtime.client();
        let reconciler = Reconciler::new(
            cache,
            sync::KubeCluster::new(client.clone()),
            sync::KubeRecorder::new(client),
            Config {
                image_pull_policy,
                update_status,
            },
        );
        let controller = Controller::new(queue, reconciler, controller_metrics);
        tokio::spawn(
            controller
                .run(workers.get(), runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait for
        // in-flight reconciles to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
