//! Workspace controller
//!
//! The controller drives each Workspace through observe, then create, update
//! or delete, against Coder:
//!
//! - [`Connector`] resolves credentials and builds a fresh client per reconcile
//! - [`WorkspaceExternal`] implements the four operations on Coder
//! - [`reconcile`] ties them to the Kubernetes object (finalizer, status,
//!   connection secret, events)

mod connector;
mod external;
mod managed;
mod workspace;

use std::time::Duration;

pub use connector::{
    ClientFactory, Connecter, Connector, CredentialSource, Credentials, HttpClientFactory,
    KubeCredentialSource,
};
pub use external::{
    ConnectionDetails, ExternalClient, ExternalCreation, ExternalObservation, ExternalUpdate,
    WorkspaceExternal,
};
pub use managed::Managed;
pub use workspace::{error_policy, reconcile, Context, ContextBuilder, KubeClient, KubeClientImpl};

/// Tunables for the Workspace controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Requeue delay for a Workspace that is in sync
    pub poll_interval: Duration,
    /// Per-request timeout for Coder API calls
    pub request_timeout: Duration,
    /// Workspaces reconciled at the same time
    pub max_concurrent_reconciles: u16,
    /// Requeue delay after a retryable error
    pub error_requeue: Duration,
    /// Requeue delay after a create, update or delete was issued
    pub change_requeue: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            max_concurrent_reconciles: 10,
            error_requeue: Duration::from_secs(15),
            change_requeue: Duration::from_secs(10),
        }
    }
}
