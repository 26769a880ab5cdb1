#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
pub mod queue;
mod resource_id;

pub use self::{
    backoff::Backoff,
    queue::WorkQueue,
    resource_id::{ParseError, ResourceId},
};
use std::sync::Arc;

/// Reads the most recently observed state of a namespaced resource kind.
///
/// Lookups reflect every watch notification that has already been delivered
/// to the cache, but may lag behind the API server.
pub trait Lister<T> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<T>>;

    fn list(&self, namespace: &str) -> Vec<Arc<T>>;
}
