#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use function_controller_core as core;
pub use function_controller_k8s_api as k8s;
pub use function_controller_k8s_index as index;
pub use function_controller_k8s_sync as sync;

mod args;

pub use self::args::Args;
