use crate::CONTROLLER_NAME;
use async_trait::async_trait;
use function_controller_k8s_api::{
    events::{self, EventType, Reporter},
    Client, Function, Resource,
};

pub mod reasons {
    pub const SYNCED: &str = "Synced";
    pub const RESOURCE_EXISTS: &str = "ErrResourceExists";
}

const ACTION: &str = "Reconcile";

/// Publishes the outcome of a reconcile as an Event on the Function.
///
/// Recording is best-effort: failures are logged and never fail a reconcile.
#[async_trait]
pub trait Recorder: Send + Sync {
    async fn record(&self, function: &Function, type_: EventType, reason: &str, message: String);
}

pub struct KubeRecorder {
    recorder: events::Recorder,
}

impl KubeRecorder {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("HOSTNAME").ok(),
        };
        Self {
            recorder: events::Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl Recorder for KubeRecorder {
    async fn record(&self, function: &Function, type_: EventType, reason: &str, message: String) {
        let event = events::Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: ACTION.to_string(),
            secondary: None,
        };
        if let Err(error) = self
            .recorder
            .publish(&event, &function.object_ref(&()))
            .await
        {
            tracing::warn!(%error, reason, "Failed to publish event");
        }
    }
}
