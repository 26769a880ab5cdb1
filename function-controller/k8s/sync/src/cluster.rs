use crate::CONTROLLER_NAME;
use async_trait::async_trait;
use function_controller_k8s_api::{
    self as k8s, Deployment, Function, FunctionStatus, ResourceExt, Secret, Service,
};

/// The mutating calls a reconcile may issue against the API server.
#[async_trait]
pub trait Cluster: Send + Sync {
    async fn create_service(&self, service: &Service) -> Result<(), k8s::Error>;

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, k8s::Error>;

    /// Replaces a Deployment. The write is rejected with a conflict if the
    /// deployment's `resourceVersion` is stale.
    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, k8s::Error>;

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, k8s::Error>;

    async fn patch_function_status(
        &self,
        namespace: &str,
        name: &str,
        status: &FunctionStatus,
    ) -> Result<(), k8s::Error>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: k8s::Client,
}

pub fn is_already_exists(error: &k8s::Error) -> bool {
    matches!(error, k8s::Error::Api(rsp) if rsp.reason == "AlreadyExists")
}

pub fn is_not_found(error: &k8s::Error) -> bool {
    matches!(error, k8s::Error::Api(rsp) if rsp.code == 404)
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: k8s::Client) -> Self {
        Self { client }
    }

    fn post_params() -> k8s::PostParams {
        k8s::PostParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl Cluster for KubeCluster {
    async fn create_service(&self, service: &Service) -> Result<(), k8s::Error> {
        let namespace = service.namespace().unwrap_or_default();
        k8s::Api::<Service>::namespaced(self.client.clone(), &namespace)
            .create(&Self::post_params(), service)
            .await?;
        Ok(())
    }

    async fn create_deployment(&self, deployment: &Deployment) -> Result<Deployment, k8s::Error> {
        let namespace = deployment.namespace().unwrap_or_default();
        k8s::Api::<Deployment>::namespaced(self.client.clone(), &namespace)
            .create(&Self::post_params(), deployment)
            .await
    }

    async fn update_deployment(&self, deployment: &Deployment) -> Result<Deployment, k8s::Error> {
        let namespace = deployment.namespace().unwrap_or_default();
        k8s::Api::<Deployment>::namespaced(self.client.clone(), &namespace)
            .replace(&deployment.name_any(), &Self::post_params(), deployment)
            .await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Secret, k8s::Error> {
        k8s::Api::<Secret>::namespaced(self.client.clone(), namespace)
            .get(name)
            .await
    }

    async fn patch_function_status(
        &self,
        namespace: &str,
        name: &str,
        status: &FunctionStatus,
    ) -> Result<(), k8s::Error> {
        let patch = k8s::Patch::Merge(serde_json::json!({ "status": status }));
        let params = k8s::PatchParams {
            field_manager: Some(CONTROLLER_NAME.to_string()),
            ..Default::default()
        };
        k8s::Api::<Function>::namespaced(self.client.clone(), namespace)
            .patch_status(name, &params, &patch)
            .await?;
        Ok(())
    }
}
