//! provider-coder - Kubernetes controller for Coder workspaces
//!
//! Users declare a cluster-scoped `Workspace` resource and the controller
//! keeps a matching workspace alive in a Coder deployment: it creates it,
//! rebuilds it when parameters drift, and deletes it when the resource goes
//! away.
//!
//! # Modules
//!
//! - [`crd`] - Custom Resource Definitions (Workspace, Token, ProviderConfig)
//! - [`coder`] - Typed client for the Coder REST API
//! - [`controller`] - Connector, external client, and reconcile loop
//! - [`events`] - Kubernetes Event publishing
//! - [`retry`] - Exponential backoff for startup calls
//! - [`error`] - Error types for the provider

#![deny(missing_docs)]

pub mod coder;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod retry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Identity Constants
// =============================================================================

/// API group for every CRD served by this provider
pub const API_GROUP: &str = "coder.crossplane.io";

/// Finalizer guarding Workspaces until the Coder workspace is gone
pub const FINALIZER: &str = "finalizer.managedresource.crossplane.io";

/// Annotation recording `owner/workspace` once the workspace is created
pub const EXTERNAL_NAME_ANNOTATION: &str = "crossplane.io/external-name";

/// Field manager for server-side apply and status patches
pub const FIELD_MANAGER: &str = "provider-coder";

/// Controller name reported on Kubernetes Events
pub const CONTROLLER_NAME: &str = "provider-coder-workspace";
