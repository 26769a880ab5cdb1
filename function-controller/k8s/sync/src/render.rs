//! Renders the Deployment that runs a Function.

use crate::secrets::{self, Secrets};
use function_controller_k8s_api::{
    quantity, Container, ContainerPort, Deployment, DeploymentSpec, DeploymentStrategy,
    EmptyDirVolumeSource, EnvVar, ExecAction, Function, FunctionResources, FunctionSpec,
    IntOrString, LabelSelector, ObjectMeta, OwnerReference, PodSpec, PodTemplateSpec, Probe,
    Quantity, Resource, ResourceExt, ResourceRequirements, RollingUpdateDeployment,
    SecurityContext, Volume, VolumeMount,
};
use std::{collections::BTreeMap, fmt, str::FromStr};

/// Holds the JSON rendering of the spec that produced a Deployment.
pub const SPEC_ANNOTATION: &str = "com.openfaas.function.spec";
pub const SCRAPE_ANNOTATION: &str = "prometheus.io.scrape";

pub const FUNCTION_PORT: i32 = 8080;

const LOCK_FILE: &str = "/tmp/.lock";
const TEMP_VOLUME: &str = "temp";
const REVISION_HISTORY_LIMIT: i32 = 5;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ImagePullPolicy {
    #[default]
    Always,
    IfNotPresent,
    Never,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid image pull policy {0:?}: must be Always, IfNotPresent or Never")]
pub struct InvalidImagePullPolicy(String);

// === impl ImagePullPolicy ===

impl ImagePullPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "Always",
            Self::IfNotPresent => "IfNotPresent",
            Self::Never => "Never",
        }
    }
}

impl FromStr for ImagePullPolicy {
    type Err = InvalidImagePullPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Always" => Ok(Self::Always),
            "IfNotPresent" => Ok(Self::IfNotPresent),
            "Never" => Ok(Self::Never),
            s => Err(InvalidImagePullPolicy(s.to_string())),
        }
    }
}

impl fmt::Display for ImagePullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns a controller reference to the Function, or `None` if the Function
/// has not been persisted and so cannot own anything.
pub fn owner_reference(function: &Function) -> Option<OwnerReference> {
    Some(OwnerReference {
        api_version: Function::api_version(&()).to_string(),
        kind: Function::kind(&()).to_string(),
        name: function.metadata.name.clone()?,
        uid: function.metadata.uid.clone()?,
        controller: Some(true),
        block_owner_deletion: Some(true),
    })
}

pub fn deployment(
    function: &Function,
    owner: &OwnerReference,
    secrets: &Secrets,
    pull_policy: ImagePullPolicy,
) -> Deployment {
    let spec = &function.spec;
    let annotations = annotations(spec);

    let resources = match resources(spec) {
        Ok(resources) => resources,
        Err(error) => {
            tracing::warn!(function = %spec.name, %error, "Failed to parse function resources");
            None
        }
    };

    let probe = probe();
    let container = Container {
        name: spec.name.clone(),
        image: Some(spec.image.clone()),
        ports: Some(vec![ContainerPort {
            container_port: FUNCTION_PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        image_pull_policy: Some(pull_policy.to_string()),
        env: Some(env(spec)),
        resources,
        liveness_probe: Some(probe.clone()),
        readiness_probe: Some(probe),
        ..Default::default()
    };

    let mut deployment = Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: function.namespace(),
            annotations: Some(annotations.clone()),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: spec.replicas,
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(0)),
                    max_surge: Some(IntOrString::Int(1)),
                }),
            }),
            selector: LabelSelector {
                match_labels: Some(BTreeMap::from([
                    ("app".to_string(), spec.name.clone()),
                    ("controller".to_string(), function.name_any()),
                ])),
                ..Default::default()
            },
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(function)),
                    annotations: Some(annotations),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    node_selector: node_selector(spec.constraints.as_deref().unwrap_or_default()),
                    containers: vec![container],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    };

    configure_read_only_root_filesystem(function, &mut deployment);
    secrets::update_secrets(function, &mut deployment, secrets);

    deployment
}

/// Labels applied to a Function's pods. User labels override the defaults.
pub(crate) fn labels(function: &Function) -> BTreeMap<String, String> {
    let name = &function.spec.name;
    let mut labels = BTreeMap::from([
        ("faas_function".to_string(), name.clone()),
        ("app".to_string(), name.clone()),
        ("controller".to_string(), function.name_any()),
    ]);
    if let Some(user) = &function.spec.labels {
        labels.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    labels
}

pub(crate) fn annotations(spec: &FunctionSpec) -> BTreeMap<String, String> {
    // The function's watchdog does not expose metrics.
    let mut annotations = BTreeMap::from([(SCRAPE_ANNOTATION.to_string(), "false".to_string())]);
    if let Some(user) = &spec.annotations {
        annotations.extend(user.iter().map(|(k, v)| (k.clone(), v.clone())));
    }

    match serde_json::to_string(spec) {
        Ok(json) => {
            annotations.insert(SPEC_ANNOTATION.to_string(), json);
        }
        Err(error) => {
            tracing::error!(function = %spec.name, %error, "Failed to serialize function spec");
        }
    }

    annotations
}

fn env(spec: &FunctionSpec) -> Vec<EnvVar> {
    let fprocess = Some(&spec.handler)
        .filter(|handler| !handler.is_empty())
        .map(|handler| ("fprocess", handler));
    let environment = spec.environment.iter().flatten();

    fprocess
        .into_iter()
        .chain(environment.map(|(name, value)| (name.as_str(), value)))
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect()
}

fn probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["cat".to_string(), LOCK_FILE.to_string()]),
        }),
        initial_delay_seconds: Some(3),
        timeout_seconds: Some(1),
        period_seconds: Some(5),
        success_threshold: Some(1),
        failure_threshold: Some(2),
        ..Default::default()
    }
}

/// Parses `key=value` constraints, skipping any that are not of that form.
pub(crate) fn node_selector(constraints: &[String]) -> Option<BTreeMap<String, String>> {
    let selector = constraints
        .iter()
        .filter_map(|constraint| {
            let mut parts = constraint.split('=');
            match (parts.next(), parts.next(), parts.next()) {
                (Some(key), Some(value), None) => Some((key.to_string(), value.to_string())),
                _ => None,
            }
        })
        .collect::<BTreeMap<_, _>>();
    Some(selector).filter(|s| !s.is_empty())
}

fn resources(spec: &FunctionSpec) -> Result<Option<ResourceRequirements>, quantity::ParseError> {
    let limits = spec.limits.as_ref().map(resource_list).transpose()?;
    let requests = spec.requests.as_ref().map(resource_list).transpose()?;

    let limits = limits.filter(|l| !l.is_empty());
    let requests = requests.filter(|r| !r.is_empty());
    if limits.is_none() && requests.is_none() {
        return Ok(None);
    }

    Ok(Some(ResourceRequirements {
        limits,
        requests,
        ..Default::default()
    }))
}

fn resource_list(
    resources: &FunctionResources,
) -> Result<BTreeMap<String, Quantity>, quantity::ParseError> {
    let mut list = BTreeMap::new();
    for (name, value) in [("memory", &resources.memory), ("cpu", &resources.cpu)] {
        if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
            list.insert(name.to_string(), quantity::parse(value)?);
        }
    }
    Ok(list)
}

/// Makes the container's root filesystem read-only when the Function asks for
/// it, giving it a writable `/tmp` instead.
///
/// Any previous temp volume and mount are replaced, so this may be applied to
/// a Deployment any number of times.
pub fn configure_read_only_root_filesystem(function: &Function, deployment: &mut Deployment) {
    let Some(pod) = pod_spec_mut(deployment) else {
        return;
    };
    let Some(container) = pod.containers.first_mut() else {
        return;
    };

    let read_only = function.spec.read_only_root_filesystem;
    container
        .security_context
        .get_or_insert_with(SecurityContext::default)
        .read_only_root_filesystem = Some(read_only);

    remove_volume(&mut pod.volumes, TEMP_VOLUME);
    remove_volume_mount(&mut container.volume_mounts, TEMP_VOLUME);

    if read_only {
        pod.volumes.get_or_insert_with(Vec::new).push(Volume {
            name: TEMP_VOLUME.to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
        container
            .volume_mounts
            .get_or_insert_with(Vec::new)
            .push(VolumeMount {
                name: TEMP_VOLUME.to_string(),
                mount_path: "/tmp".to_string(),
                read_only: Some(false),
                ..Default::default()
            });
    }
}

pub(crate) fn pod_spec_mut(deployment: &mut Deployment) -> Option<&mut PodSpec> {
    deployment.spec.as_mut()?.template.spec.as_mut()
}

pub(crate) fn remove_volume(volumes: &mut Option<Vec<Volume>>, name: &str) {
    if let Some(vs) = volumes {
        vs.retain(|v| v.name != name);
        if vs.is_empty() {
            *volumes = None;
        }
    }
}

pub(crate) fn remove_volume_mount(mounts: &mut Option<Vec<VolumeMount>>, name: &str) {
    if let Some(ms) = mounts {
        ms.retain(|m| m.name != name);
        if ms.is_empty() {
            *mounts = None;
        }
    }
}
