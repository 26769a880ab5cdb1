#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Converges the Deployment and Service owned by each Function.

mod cluster;
mod controller;
mod diff;
mod metrics;
mod reconcile;
mod recorder;
pub mod render;
mod secrets;
mod service;


pub use self::{
    cluster::{is_already_exists, is_not_found, Cluster, KubeCluster},
    controller::Controller,
    diff::{changed_fields, needs_update},
    metrics::ControllerMetrics,
    reconcile::{Config, Error, Outcome, Reconciler},
    recorder::{reasons, KubeRecorder, Recorder},
    render::ImagePullPolicy,
    secrets::{resolve as resolve_secrets, Secrets},
};

/// Identifies this controller as a field manager and event reporter.
pub const CONTROLLER_NAME: &str = "function-controller";
