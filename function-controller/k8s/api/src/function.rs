use kube::CustomResource;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Describes a serverless function and the workload that should run it.
///
/// Field order is significant: a JSON rendering of the spec is stored on the
/// owned Deployment and compared against on the next reconcile.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, CustomResource)]
#[kube(
    group = "openfaas.com",
    version = "v1alpha2",
    kind = "Function",
    namespaced,
    status = "FunctionStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Name of the Deployment and Service that run this function.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub image: String,

    pub replicas: Option<i32>,

    /// Process invocation passed to the function's watchdog as `fprocess`.
    #[serde(default)]
    pub handler: String,

    pub annotations: Option<BTreeMap<String, String>>,

    pub labels: Option<BTreeMap<String, String>>,

    pub environment: Option<BTreeMap<String, String>>,

    /// Node selector terms of the form `key=value`.
    pub constraints: Option<Vec<String>>,

    /// Names of Secrets in the function's namespace.
    pub secrets: Option<Vec<String>>,

    pub limits: Option<FunctionResources>,

    pub requests: Option<FunctionResources>,

    #[serde(default)]
    pub read_only_root_filesystem: bool,
}

/// Memory and CPU quantities, e.g. `128Mi` and `500m`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct FunctionResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    #[serde(default)]
    pub available_replicas: i32,
}
