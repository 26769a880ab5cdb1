#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Caches Functions and the Deployments they own, and routes watch
//! notifications for either kind to the reconcile queue as Function keys.

mod index;
mod metrics;


pub use self::{
    index::{run_resync, Cache, Index, SharedIndex, Synced},
    metrics::IndexMetrics,
};
