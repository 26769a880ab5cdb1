use crate::render::{self, SPEC_ANNOTATION};
use function_controller_k8s_api::{Deployment, FunctionResources, FunctionSpec, ResourceExt};
use std::collections::{BTreeMap, BTreeSet};

/// Determines whether a Deployment was rendered from a spec other than
/// `spec`.
///
/// The spec that produced the Deployment is read back from its annotation. A
/// missing or unreadable annotation always requires an update.
pub fn needs_update(spec: &FunctionSpec, deployment: &Deployment) -> bool {
    let Some(json) = deployment.annotations().get(SPEC_ANNOTATION) else {
        tracing::debug!("Deployment has no function spec annotation");
        return true;
    };

    let prior = match serde_json::from_str::<FunctionSpec>(json) {
        Ok(prior) => prior,
        Err(error) => {
            tracing::warn!(%error, "Failed to parse previous function spec");
            return true;
        }
    };

    let changed = changed_fields(&prior, spec);
    if changed.is_empty() {
        tracing::trace!("No changes detected");
        return false;
    }
    tracing::debug!(?changed, "Function spec changed");
    true
}

/// Lists the spec fields that differ between `prior` and `current`.
///
/// An absent map or list is equal to an empty one. Secrets compare as sets.
/// Constraints compare by the node selector they render to, so a repeated key
/// resolves the same way it does on the Deployment.
pub fn changed_fields(prior: &FunctionSpec, current: &FunctionSpec) -> Vec<&'static str> {
    let FunctionSpec {
        name,
        image,
        replicas,
        handler,
        annotations,
        labels,
        environment,
        constraints,
        secrets,
        limits,
        requests,
        read_only_root_filesystem,
    } = current;

    let mut changed = Vec::new();
    let mut check = |field: &'static str, equal: bool| {
        if !equal {
            changed.push(field);
        }
    };

    check("name", prior.name == *name);
    check("image", prior.image == *image);
    check("replicas", prior.replicas == *replicas);
    check("handler", prior.handler == *handler);
    check("annotations", map(&prior.annotations) == map(annotations));
    check("labels", map(&prior.labels) == map(labels));
    check("environment", map(&prior.environment) == map(environment));
    check(
        "constraints",
        node_selector(&prior.constraints) == node_selector(constraints),
    );
    check("secrets", set(&prior.secrets) == set(secrets));
    check("limits", resources(&prior.limits) == resources(limits));
    check("requests", resources(&prior.requests) == resources(requests));
    check(
        "readOnlyRootFilesystem",
        prior.read_only_root_filesystem == *read_only_root_filesystem,
    );

    changed
}

fn map(m: &Option<BTreeMap<String, String>>) -> Option<&BTreeMap<String, String>> {
    m.as_ref().filter(|m| !m.is_empty())
}

fn set(l: &Option<Vec<String>>) -> BTreeSet<&str> {
    l.iter().flatten().map(String::as_str).collect()
}

fn node_selector(l: &Option<Vec<String>>) -> Option<BTreeMap<String, String>> {
    render::node_selector(l.as_deref().unwrap_or_default())
}

fn resources(r: &Option<FunctionResources>) -> (Option<&str>, Option<&str>) {
    fn value(v: &Option<String>) -> Option<&str> {
        v.as_deref().filter(|v| !v.is_empty())
    }

    match r {
        Some(FunctionResources { memory, cpu }) => (value(memory), value(cpu)),
        None => (None, None),
    }
}
