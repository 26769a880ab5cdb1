use crate::render::{FUNCTION_PORT, SCRAPE_ANNOTATION};
use function_controller_k8s_api::{
    Function, IntOrString, ObjectMeta, OwnerReference, ResourceExt, Service, ServicePort,
    ServiceSpec,
};
use std::collections::BTreeMap;

/// Renders the ClusterIP Service that fronts a Function's pods.
///
/// The Service is only ever created. It does not depend on anything a
/// Function update can change other than its name.
pub(crate) fn service(function: &Function, owner: &OwnerReference) -> Service {
    let name = &function.spec.name;
    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: function.namespace(),
            annotations: Some(BTreeMap::from([(
                SCRAPE_ANNOTATION.to_string(),
                "false".to_string(),
            )])),
            owner_references: Some(vec![owner.clone()]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(BTreeMap::from([(
                "faas_function".to_string(),
                name.clone(),
            )])),
            ports: Some(vec![ServicePort {
                name: Some("http".to_string()),
                protocol: Some("TCP".to_string()),
                port: FUNCTION_PORT,
                target_port: Some(IntOrString::Int(FUNCTION_PORT)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
