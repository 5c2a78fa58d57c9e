//! Kubernetes Events for Workspace reconciliation
//!
//! Events are fire-and-forget: a failed publish is logged and otherwise
//! ignored so it never fails a reconcile.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Publishes Kubernetes Events about managed resources
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish an Event on `resource_ref`
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Create a publisher reporting as `controller_name`
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
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Event reasons, shown in the REASON column of `kubectl get events`
pub mod reasons {
    /// Credentials or client could not be set up
    pub const CANNOT_CONNECT: &str = "CannotConnectToProvider";
    /// Reading the Coder workspace failed
    pub const CANNOT_OBSERVE: &str = "CannotObserveExternalResource";
    /// Coder workspace created
    pub const CREATED: &str = "CreatedExternalResource";
    /// Creating the Coder workspace failed
    pub const CANNOT_CREATE: &str = "CannotCreateExternalResource";
    /// Coder workspace rebuilt with new parameters
    pub const UPDATED: &str = "UpdatedExternalResource";
    /// Updating the Coder workspace failed
    pub const CANNOT_UPDATE: &str = "CannotUpdateExternalResource";
    /// Coder workspace deleted
    pub const DELETED: &str = "DeletedExternalResource";
    /// Deleting the Coder workspace failed
    pub const CANNOT_DELETE: &str = "CannotDeleteExternalResource";
    /// Writing the connection secret failed
    pub const CANNOT_PUBLISH: &str = "CannotPublishConnectionDetails";
}

/// Event actions, shown in the ACTION column of `kubectl get events`
pub mod actions {
    /// Connecting to Coder
    pub const CONNECT: &str = "Connect";
    /// Observing the Coder workspace
    pub const OBSERVE: &str = "Observe";
    /// Creating the Coder workspace
    pub const CREATE: &str = "Create";
    /// Updating the Coder workspace
    pub const UPDATE: &str = "Update";
    /// Deleting the Coder workspace
    pub const DELETE: &str = "Delete";
    /// Publishing connection details
    pub const PUBLISH: &str = "PublishConnectionDetails";
}
