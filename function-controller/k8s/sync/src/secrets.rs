use crate::{
    render::{pod_spec_mut, remove_volume, remove_volume_mount},
    Cluster, Error,
};
use function_controller_k8s_api::{
    Deployment, Function, KeyToPath, LocalObjectReference, ProjectedVolumeSource, Secret,
    SecretProjection, Volume, VolumeMount, VolumeProjection,
};
use std::collections::{BTreeMap, BTreeSet};

/// The Secrets a Function references, by name.
pub type Secrets = BTreeMap<String, Secret>;

pub const SECRETS_MOUNT_PATH: &str = "/var/openfaas/secrets";

const DOCKER_CONFIG_TYPES: [&str; 2] = [
    "kubernetes.io/dockerconfigjson",
    "kubernetes.io/dockercfg",
];

/// Fetches every named Secret from the namespace.
///
/// Fails if any one of them cannot be read.
pub async fn resolve<C>(cluster: &C, namespace: &str, names: &[String]) -> Result<Secrets, Error>
where
    C: Cluster + ?Sized,
{
    let mut secrets = Secrets::new();
    for name in names {
        if secrets.contains_key(name) {
            continue;
        }
        let secret = cluster
            .get_secret(namespace, name)
            .await
            .map_err(|source| Error::Secret {
                name: name.clone(),
                source,
            })?;
        secrets.insert(name.clone(), secret);
    }
    Ok(secrets)
}

pub(crate) fn volume_name(function: &Function) -> String {
    format!("{}-projected-secrets", function.spec.name)
}

/// Mounts the Function's secrets into the Deployment's first container,
/// replacing any previously rendered secrets volume.
///
/// Registry credentials become image pull secrets instead of files.
pub(crate) fn update_secrets(function: &Function, deployment: &mut Deployment, secrets: &Secrets) {
    let volume_name = volume_name(function);
    let Some(pod) = pod_spec_mut(deployment) else {
        return;
    };
    let Some(container) = pod.containers.first_mut() else {
        return;
    };
    remove_volume(&mut pod.volumes, &volume_name);
    remove_volume_mount(&mut container.volume_mounts, &volume_name);
    pod.image_pull_secrets = None;

    let mut seen = BTreeSet::new();
    let mut sources = Vec::new();
    let mut pull_secrets = Vec::new();
    for name in function.spec.secrets.iter().flatten() {
        if !seen.insert(name) {
            continue;
        }
        let Some(secret) = secrets.get(name) else {
            tracing::warn!(function = %function.spec.name, secret = %name, "Secret was not resolved");
            continue;
        };

        if secret
            .type_
            .as_deref()
            .is_some_and(|t| DOCKER_CONFIG_TYPES.contains(&t))
        {
            pull_secrets.push(LocalObjectReference { name: name.clone() });
            continue;
        }

        let items = secret
            .data
            .iter()
            .flatten()
            .map(|(key, _)| KeyToPath {
                key: key.clone(),
                path: key.clone(),
                ..Default::default()
            })
            .collect();
        sources.push(VolumeProjection {
            secret: Some(SecretProjection {
                name: name.clone(),
                items: Some(items),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    if !pull_secrets.is_empty() {
        pod.image_pull_secrets = Some(pull_secrets);
    }
    if sources.is_empty() {
        return;
    }

    pod.volumes.get_or_insert_with(Vec::new).push(Volume {
        name: volume_name.clone(),
        projected: Some(ProjectedVolumeSource {
            sources: Some(sources),
            ..Default::default()
        }),
        ..Default::default()
    });
    container
        .volume_mounts
        .get_or_insert_with(Vec::new)
        .push(VolumeMount {
            name: volume_name,
            mount_path: SECRETS_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
}
