//! Emits Kubernetes events for drain activity
//!
//! Publishing is fire and forget: a failed event is logged as a warning and
//! must never fail the drain it describes.

use k8s_openapi::api::core::v1::{Node, ObjectReference};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::{event, Level};

use crate::error::Error;

/// The component name drain events are reported under
const COMPONENT: &str = "rescheduler";

/// Publishes drain events on the node being drained
pub struct DrainEvents {
    /// The recorder events are published through
    recorder: Recorder,
    /// The namespace events are written into
    namespace: String,
}

impl DrainEvents {
    /// Build a new drain event publisher
    ///
    /// # Arguments
    ///
    /// * `client` - Kubernetes client
    /// * `namespace` - The namespace this controller reports events into
    pub fn new(client: &kube::Client, namespace: &str) -> Self {
        let reporter = Reporter {
            controller: COMPONENT.to_owned(),
            instance: None,
        };
        DrainEvents {
            recorder: Recorder::new(client.clone(), reporter),
            namespace: namespace.to_owned(),
        }
    }

    /// Build a reference to a node for the event api
    fn node_ref(&self, node: &Node) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_owned()),
            kind: Some("Node".to_owned()),
            name: node.metadata.name.clone(),
            uid: node.metadata.uid.clone(),
            namespace: Some(self.namespace.clone()),
            ..Default::default()
        }
    }

    /// Publish a single event, logging any failure
    async fn publish(&self, node: &Node, type_: EventType, reason: &str, note: String) {
        let ev = Event {
            type_,
            reason: reason.to_owned(),
            note: Some(note),
            action: "Drain".to_owned(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&ev, &self.node_ref(node)).await {
            event!(
                Level::WARN,
                error = error.to_string(),
                msg = "Failed to publish event"
            );
        }
    }

    /// Record that a drain has started
    ///
    /// # Arguments
    ///
    /// * `node` - The node being drained
    /// * `pods` - How many pods are being evicted
    pub async fn drain_started(&self, node: &Node, pods: usize) {
        self.publish(
            node,
            EventType::Normal,
            "DrainStarted",
            format!("Evicting {pods} pods so they reschedule onto spot nodes"),
        )
        .await;
    }

    /// Record that a drain completed
    pub async fn drain_succeeded(&self, node: &Node) {
        self.publish(
            node,
            EventType::Normal,
            "DrainSucceeded",
            "All movable pods were evicted".to_owned(),
        )
        .await;
    }

    /// Record that a drain failed
    ///
    /// # Arguments
    ///
    /// * `node` - The node the drain failed on
    /// * `error` - The failure
    pub async fn drain_failed(&self, node: &Node, error: &Error) {
        self.publish(
            node,
            EventType::Warning,
            "DrainFailed",
            format!("Drain failed: {error}"),
        )
        .await;
    }
}
