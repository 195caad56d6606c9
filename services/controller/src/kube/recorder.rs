//! [`EventRecorder`] publishing core/v1 Events.

use cellmesh_events::{Event, EventRecorder, ObjectRef};
use k8s_openapi::api::core::v1::{Event as KubeEvent, EventSource, ObjectReference};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use kube::api::{Api, PostParams};
use kube::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

/// Component name reported as the event source.
pub const REPORTING_COMPONENT: &str = "mesh-controller";

/// Buffers events and creates them from a background task.
#[derive(Clone)]
pub struct KubeRecorder {
    tx: mpsc::UnboundedSender<(ObjectRef, Event)>,
}

impl KubeRecorder {
    /// Start the delivery task. It ends once every recorder clone is dropped.
    pub fn spawn(client: Client) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<(ObjectRef, Event)>();
        let handle = tokio::spawn(async move {
            while let Some((regarding, event)) = rx.recv().await {
                let api: Api<KubeEvent> = Api::namespaced(client.clone(), &regarding.namespace);
                if let Err(e) = api
                    .create(&PostParams::default(), &to_kube_event(&regarding, &event))
                    .await
                {
                    warn!(regarding = %regarding, reason = %event.reason, error = %e, "Failed to publish event");
                }
            }
        });
        (Self { tx }, handle)
    }
}

impl EventRecorder for KubeRecorder {
    fn record(&self, regarding: &ObjectRef, event: Event) {
        if self.tx.send((regarding.clone(), event)).is_err() {
            warn!(regarding = %regarding, "Event delivery task has stopped");
        }
    }
}

fn to_kube_event(regarding: &ObjectRef, event: &Event) -> KubeEvent {
    let time = Time(event.occurred_at);
    KubeEvent {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}.", regarding.name)),
            namespace: Some(regarding.namespace.clone()),
            ..ObjectMeta::default()
        },
        involved_object: ObjectReference {
            api_version: Some(regarding.api_version.clone()),
            kind: Some(regarding.kind.clone()),
            name: Some(regarding.name.clone()),
            namespace: Some(regarding.namespace.clone()),
            uid: (!regarding.uid.is_empty()).then(|| regarding.uid.clone()),
            ..ObjectReference::default()
        },
        reason: Some(event.reason.clone()),
        message: Some(event.message.clone()),
        type_: Some(event.event_type.as_str().to_string()),
        first_timestamp: Some(time.clone()),
        last_timestamp: Some(time),
        count: Some(1),
        source: Some(EventSource {
            component: Some(REPORTING_COMPONENT.to_string()),
            host: None,
        }),
        reporting_component: Some(REPORTING_COMPONENT.to_string()),
        ..KubeEvent::default()
    }
}

#[cfg(test)]
mod tests {
    use cellmesh_events::reasons;

    use super::*;

    #[test]
    fn test_event_conversion() {
        let regarding = ObjectRef {
            api_version: "mesh.cellery.io/v1alpha2".to_string(),
            kind: "Cell".to_string(),
            namespace: "default".to_string(),
            name: "hr".to_string(),
            uid: String::new(),
        };
        let event = Event::warning(reasons::SYNC_FAILED, "Service: boom");

        let kube_event = to_kube_event(&regarding, &event);
        assert_eq!(kube_event.metadata.generate_name.as_deref(), Some("hr."));
        assert_eq!(kube_event.involved_object.kind.as_deref(), Some("Cell"));
        assert_eq!(kube_event.involved_object.uid, None);
        assert_eq!(kube_event.type_.as_deref(), Some("Warning"));
        assert_eq!(kube_event.reason.as_deref(), Some("SyncFailed"));
    }
}
