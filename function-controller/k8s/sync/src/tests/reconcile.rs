use super::fake::{
    error_response, mk_function, Call, FakeCache, FakeCluster, FakeRecorder, NS,
};
use crate::{
    metrics::ControllerMetrics,
    render::{self, ImagePullPolicy},
    Config, Controller, Error, Outcome, Reconciler, Secrets,
};
use function_controller_core::{Backoff, ResourceId, WorkQueue};
use function_controller_k8s_api::{
    Deployment, DeploymentStatus, Function, FunctionSpec, FunctionStatus, OwnerReference,
};
use pretty_assertions::assert_eq;
use prometheus_client::registry::Registry;
use tokio::time::{self, Duration};

type TestReconciler = Reconciler<FakeCache, FakeCluster, FakeRecorder>;

struct Harness {
    cache: FakeCache,
    cluster: FakeCluster,
    recorder: FakeRecorder,
}

fn harness() -> Harness {
    Harness {
        cache: FakeCache::default(),
        cluster: FakeCluster::default(),
        recorder: FakeRecorder::default(),
    }
}

impl Harness {
    fn reconciler(&self, config: Config) -> TestReconciler {
        Reconciler::new(
            self.cache.clone(),
            self.cluster.clone(),
            self.recorder.clone(),
            config,
        )
    }
}

fn id() -> ResourceId {
    ResourceId::new(NS.to_string(), "echo".to_string())
}

fn echo() -> Function {
    mk_function(FunctionSpec {
        name: "echo".to_string(),
        image: "functions/alpine:latest".to_string(),
        replicas: Some(1),
        ..Default::default()
    })
}

/// Renders the Deployment as the API server would return it.
fn rendered(function: &Function, resource_version: &str) -> Deployment {
    let owner = render::owner_reference(function).unwrap();
    let mut deployment =
        render::deployment(function, &owner, &Secrets::new(), ImagePullPolicy::Always);
    deployment.metadata.resource_version = Some(resource_version.to_string());
    deployment
}

fn synced() -> (String, String, String) {
    (
        "Normal".to_string(),
        "Synced".to_string(),
        "Function synced successfully".to_string(),
    )
}

#[tokio::test]
async fn creates_service_and_deployment() {
    let h = harness();
    h.cache.insert_function(echo());

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(
        h.cluster.calls(),
        vec![
            Call::CreateService("echo".to_string()),
            Call::CreateDeployment("echo".to_string()),
        ]
    );
    assert_eq!(h.recorder.events(), vec![synced()]);
}

#[tokio::test]
async fn second_pass_is_a_noop() {
    let h = harness();
    let function = echo();
    h.cache.insert_function(function.clone());
    let reconciler = h.reconciler(Config::default());

    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Created);
    h.cluster.take_calls();

    // The watch delivers the created deployment.
    h.cache.insert_deployment(rendered(&function, "1"));
    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Unchanged);
    assert_eq!(h.cluster.calls(), vec![]);
    assert_eq!(h.recorder.events(), vec![synced(), synced()]);
}

#[tokio::test]
async fn updates_a_drifted_deployment() {
    let h = harness();
    let function = echo();
    h.cache.insert_deployment(rendered(&function, "7"));

    let mut updated = function;
    updated.spec.image = "functions/alpine:3.20".to_string();
    updated.spec.replicas = Some(3);
    h.cache.insert_function(updated);

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Updated);
    assert_eq!(
        h.cluster.calls(),
        vec![Call::UpdateDeployment {
            name: "echo".to_string(),
            resource_version: Some("7".to_string()),
            image: Some("functions/alpine:3.20".to_string()),
            replicas: Some(3),
        }]
    );
}

#[tokio::test]
async fn unannotated_deployment_is_updated() {
    let h = harness();
    let function = echo();
    let mut deployment = rendered(&function, "3");
    deployment.metadata.annotations = None;
    h.cache.insert_deployment(deployment);
    h.cache.insert_function(function);

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Updated);
}

#[tokio::test]
async fn foreign_deployment_is_a_conflict() {
    let h = harness();
    let function = echo();
    let mut deployment = rendered(&function, "1");
    deployment.metadata.owner_references = None;
    h.cache.insert_deployment(deployment);
    h.cache.insert_function(function);

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Conflict);
    assert_eq!(h.cluster.calls(), vec![]);
    assert_eq!(
        h.recorder.events(),
        vec![(
            "Warning".to_string(),
            "ErrResourceExists".to_string(),
            "Resource \"echo\" already exists and is not managed by OpenFaaS".to_string(),
        )]
    );
}

#[tokio::test]
async fn deployment_owned_by_a_previous_function_is_a_conflict() {
    let h = harness();
    let function = echo();
    let mut deployment = rendered(&function, "1");
    deployment.metadata.owner_references = Some(vec![OwnerReference {
        uid: "0b1d7a22".to_string(),
        ..render::owner_reference(&function).unwrap()
    }]);
    h.cache.insert_deployment(deployment);
    h.cache.insert_function(function);

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Conflict);
}

#[tokio::test]
async fn tolerates_concurrent_creates() {
    let h = harness();
    h.cache.insert_function(echo());
    h.cluster
        .fail_service_creates(error_response(409, "AlreadyExists"));
    h.cluster
        .fail_deployment_creates(error_response(409, "AlreadyExists"));

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(h.recorder.events(), vec![synced()]);
}

#[tokio::test]
async fn service_errors_fail_before_the_deployment_is_created() {
    let h = harness();
    h.cache.insert_function(echo());
    h.cluster
        .fail_service_creates(error_response(500, "InternalError"));

    let error = h
        .reconciler(Config::default())
        .sync(&id())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Kube(_)), "{error:?}");
    assert_eq!(
        h.cluster.calls(),
        vec![Call::CreateService("echo".to_string())]
    );
    assert_eq!(h.recorder.events(), vec![]);
}

#[tokio::test]
async fn update_errors_propagate() {
    let h = harness();
    let function = echo();
    h.cache.insert_deployment(rendered(&function, "2"));
    let mut updated = function;
    updated.spec.replicas = Some(3);
    h.cache.insert_function(updated);
    h.cluster.fail_deployment_updates(error_response(409, "Conflict"));

    let error = h
        .reconciler(Config::default())
        .sync(&id())
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Kube(_)), "{error:?}");
}

#[tokio::test]
async fn missing_secret_fails_the_reconcile() {
    let h = harness();
    let mut function = echo();
    function.spec.secrets = Some(vec!["db-password".to_string()]);
    h.cache.insert_function(function);

    let error = h
        .reconciler(Config::default())
        .sync(&id())
        .await
        .unwrap_err();
    match error {
        Error::Secret { name, .. } => assert_eq!(name, "db-password"),
        error => panic!("unexpected error: {error:?}"),
    }
    assert_eq!(
        h.cluster.calls(),
        vec![Call::CreateService("echo".to_string())]
    );
}

#[tokio::test]
async fn skips_functions_that_cannot_be_reconciled() {
    let h = harness();
    let reconciler = h.reconciler(Config::default());

    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Skipped);

    let mut unnamed = echo();
    unnamed.spec.name = String::new();
    h.cache.insert_function(unnamed);
    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Skipped);

    let mut unsaved = echo();
    unsaved.metadata.uid = None;
    h.cache.insert_function(unsaved);
    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Skipped);

    assert_eq!(h.cluster.calls(), vec![]);
    assert_eq!(h.recorder.events(), vec![]);
}

#[tokio::test]
async fn patches_available_replicas_when_enabled() {
    let h = harness();
    let function = echo();
    let mut deployment = rendered(&function, "4");
    deployment.status = Some(DeploymentStatus {
        available_replicas: Some(2),
        ..Default::default()
    });
    h.cache.insert_deployment(deployment);
    h.cache.insert_function(function.clone());

    let config = Config {
        update_status: true,
        ..Default::default()
    };
    let reconciler = h.reconciler(config);
    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Unchanged);
    assert_eq!(
        h.cluster.take_calls(),
        vec![Call::PatchStatus {
            name: "echo".to_string(),
            available_replicas: 2,
        }]
    );

    // The watch delivers the patched status.
    let mut patched = function;
    patched.status = Some(FunctionStatus {
        available_replicas: 2,
    });
    h.cache.insert_function(patched);
    assert_eq!(reconciler.sync(&id()).await.unwrap(), Outcome::Unchanged);
    assert_eq!(h.cluster.calls(), vec![]);
}

#[tokio::test]
async fn status_is_left_alone_by_default() {
    let h = harness();
    let function = echo();
    let mut deployment = rendered(&function, "4");
    deployment.status = Some(DeploymentStatus {
        available_replicas: Some(2),
        ..Default::default()
    });
    h.cache.insert_deployment(deployment);
    h.cache.insert_function(function);

    let outcome = h.reconciler(Config::default()).sync(&id()).await.unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(h.cluster.calls(), vec![]);
}

#[tokio::test(start_paused = true)]
async fn failed_reconciles_are_retried_with_backoff() {
    let h = harness();
    h.cache.insert_function(echo());
    h.cluster
        .fail_deployment_creates(error_response(500, "InternalError"));

    let mut prom = Registry::default();
    let metrics = ControllerMetrics::register(&mut prom);
    let queue = WorkQueue::new(Backoff::new(
        Duration::from_secs(1),
        Duration::from_secs(60),
    ));
    let controller = Controller::new(queue.clone(), h.reconciler(Config::default()), metrics);

    let start = time::Instant::now();
    queue.add(id());
    assert!(controller.process_next().await);
    assert_eq!(queue.num_requeues(&id()), 1);
    assert!(queue.is_empty(), "retries must be delayed");

    assert!(controller.process_next().await);
    assert!(start.elapsed() >= Duration::from_secs(1));
    assert_eq!(queue.num_requeues(&id()), 2);

    h.cluster.clear_errors();
    assert!(controller.process_next().await);
    assert!(start.elapsed() >= Duration::from_secs(3));
    assert_eq!(queue.num_requeues(&id()), 0, "success must reset the backoff");

    let creates = h
        .cluster
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::CreateDeployment(_)))
        .count();
    assert_eq!(creates, 3);

    let mut text = String::new();
    prometheus_client::encoding::text::encode(&mut text, &prom).unwrap();
    assert!(
        text.contains("reconciles_total{outcome=\"error\"} 2"),
        "{text}"
    );
    assert!(
        text.contains("reconciles_total{outcome=\"created\"} 1"),
        "{text}"
    );
    assert!(text.contains("requeues_total 2"), "{text}");
}

#[tokio::test]
async fn workers_stop_on_shutdown() {
    let h = harness();
    h.cache.insert_function(echo());
    let queue = WorkQueue::new(Backoff::default());
    let controller = Controller::new(
        queue.clone(),
        h.reconciler(Config::default()),
        ControllerMetrics::default(),
    );

    let (signal, watch) = drain::channel();
    let workers = tokio::spawn(controller.run(2, watch));

    queue.add(id());
    time::timeout(Duration::from_secs(5), async {
        while h.recorder.events().is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("function must be reconciled");

    signal.drain().await;
    workers.await.expect("workers must not panic");
    assert!(queue.is_shutdown());
    assert_eq!(h.recorder.events(), vec![synced()]);
}
