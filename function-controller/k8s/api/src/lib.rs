#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod function;
pub mod quantity;

pub use self::function::{Function, FunctionResources, FunctionSpec, FunctionStatus};
pub use k8s_openapi::{
    api::{
        self,
        apps::v1::{
            Deployment, DeploymentSpec, DeploymentStatus, DeploymentStrategy,
            RollingUpdateDeployment,
        },
        core::v1::{
            Container, ContainerPort, EmptyDirVolumeSource, EnvVar, ExecAction, KeyToPath,
            LocalObjectReference, PodSpec, PodTemplateSpec, Probe, ProjectedVolumeSource,
            ResourceRequirements, Secret, SecretProjection, SecurityContext, Service,
            ServicePort, ServiceSpec, Volume, VolumeMount, VolumeProjection,
        },
    },
    apimachinery::pkg::{
        api::resource::Quantity,
        apis::meta::v1::{LabelSelector, OwnerReference},
        util::intstr::IntOrString,
    },
    ByteString,
};
pub use kube::{
    api::{Api, ObjectMeta, Patch, PatchParams, PostParams, ResourceExt},
    error::ErrorResponse,
    runtime::{events, watcher},
    Client, Error, Resource,
};
