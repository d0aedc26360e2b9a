use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};

use crate::store::StoreError;

pub const REASON_SYNCED: &str = "Synced";
pub const MESSAGE_SYNCED: &str = "WarmImage synced successfully";
pub const ACTION_RECONCILE: &str = "Reconcile";

/// Destination for events attached to reconciled objects.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError>;
}

/// [`EventSink`] publishing `events.k8s.io` events through a kube `Recorder`.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn record(
        &self,
        reference: &ObjectReference,
        type_: EventType,
        reason: &str,
        message: &str,
    ) -> Result<(), StoreError> {
        self.recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(message.into()),
                    action: ACTION_RECONCILE.into(),
                    secondary: None,
                },
                reference,
            )
            .await?;
        Ok(())
    }
}
