//! Error types for the Coder provider
//!
//! Every failure a reconcile can hit maps to one variant here. The controller's
//! error policy uses [`Error::is_retryable`] to decide between a quick requeue
//! (transient) and waiting for the Workspace to change (permanent).

use thiserror::Error;

/// Main error type for provider operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The managed handle is not a kind this reconciler can drive
    #[error("unsupported resource: {kind} is not a Workspace custom resource")]
    UnsupportedResource {
        /// Kind of the handle that was passed in
        kind: String,
    },

    /// Credentials for the ProviderConfig could not be resolved
    #[error("cannot resolve credentials from ProviderConfig {provider_config}: {message}")]
    CredentialResolution {
        /// Name of the referenced ProviderConfig
        provider_config: String,
        /// Description of what failed
        message: String,
    },

    /// A Coder client could not be built from valid credentials
    #[error("cannot create Coder client: {message}")]
    ClientConstruction {
        /// Description of what failed
        message: String,
    },

    /// A user, organization or template referenced by the Workspace was not found
    #[error("cannot resolve {kind} {name}: {message}")]
    ReferenceResolution {
        /// Kind of the reference (user, organization, template)
        kind: String,
        /// Name or id that was looked up
        name: String,
        /// Description of what failed
        message: String,
    },

    /// Workspace creation returned a non-success status
    #[error("cannot create workspace {workspace}: HTTP {status}: {message}")]
    RemoteCreate {
        /// External name of the workspace
        workspace: String,
        /// HTTP status returned by Coder
        status: u16,
        /// Response body or description
        message: String,
    },

    /// Workspace update build returned a non-success status
    #[error("cannot update workspace {workspace}: HTTP {status}: {message}")]
    RemoteUpdate {
        /// External name of the workspace
        workspace: String,
        /// HTTP status returned by Coder
        status: u16,
        /// Response body or description
        message: String,
    },

    /// Workspace deletion build returned a non-success status
    #[error("cannot delete workspace {workspace}: HTTP {status}: {message}")]
    RemoteDelete {
        /// External name of the workspace
        workspace: String,
        /// HTTP status returned by Coder
        status: u16,
        /// Response body or description
        message: String,
    },

    /// A read request was rejected with a client error other than 404
    #[error("request to {path} failed: HTTP {status}: {message}")]
    RemoteRead {
        /// API path that was requested
        path: String,
        /// HTTP status returned by Coder
        status: u16,
        /// Response body or description
        message: String,
    },

    /// Timeout, connection failure or 5xx from Coder
    #[error("transient network error during {operation}: {message}")]
    TransientNetwork {
        /// Operation that was in flight
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// A response body could not be decoded
    #[error("serialization error during {operation}: {message}")]
    Serialization {
        /// Operation whose response failed to decode
        operation: String,
        /// Description of what failed
        message: String,
    },

    /// The Workspace object itself is malformed
    #[error("validation error for {workspace}: {message}")]
    Validation {
        /// Name of the Workspace
        workspace: String,
        /// Description of what's invalid
        message: String,
    },

    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },
}

impl Error {
    /// Create an unsupported-resource error for the given kind
    pub fn unsupported(kind: impl Into<String>) -> Self {
        Self::UnsupportedResource { kind: kind.into() }
    }

    /// Create a credential resolution error
    pub fn credentials(provider_config: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::CredentialResolution {
            provider_config: provider_config.into(),
            message: msg.into(),
        }
    }

    /// Create a client construction error
    pub fn client_construction(msg: impl Into<String>) -> Self {
        Self::ClientConstruction {
            message: msg.into(),
        }
    }

    /// Create a reference resolution error
    pub fn reference(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ReferenceResolution {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a transient network error
    pub fn transient(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::TransientNetwork {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error
    pub fn serialization(operation: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            operation: operation.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error for a Workspace
    pub fn validation(workspace: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            workspace: workspace.into(),
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Transient network failures and missing credentials are retried on the
    /// next poll, as is a 409 on a build (another build is still active).
    /// Lookup misses and other 4xx rejections need a change to the Workspace
    /// (or to Coder) before a retry can succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::TransientNetwork { .. } => true,
            Error::CredentialResolution { .. } => true,
            Error::RemoteUpdate { status: 409, .. } | Error::RemoteDelete { status: 409, .. } => {
                true
            }
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::UnsupportedResource { .. }
            | Error::ClientConstruction { .. }
            | Error::ReferenceResolution { .. }
            | Error::RemoteCreate { .. }
            | Error::RemoteUpdate { .. }
            | Error::RemoteDelete { .. }
            | Error::RemoteRead { .. }
            | Error::Serialization { .. }
            | Error::Validation { .. } => false,
        }
    }

    /// Check if this error is a transient network failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::TransientNetwork { .. })
    }

    /// HTTP status carried by a remote rejection, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::RemoteCreate { status, .. }
            | Error::RemoteUpdate { status, .. }
            | Error::RemoteDelete { status, .. }
            | Error::RemoteRead { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Short machine-readable reason used for status conditions
    pub fn reason(&self) -> &'static str {
        match self {
            Error::UnsupportedResource { .. } => "UnsupportedResource",
            Error::CredentialResolution { .. } => "CredentialResolutionError",
            Error::ClientConstruction { .. } => "ClientConstructionError",
            Error::ReferenceResolution { .. } => "ReferenceResolutionError",
            Error::RemoteCreate { .. } => "RemoteCreateError",
            Error::RemoteUpdate { .. } => "RemoteUpdateError",
            Error::RemoteDelete { .. } => "RemoteDeleteError",
            Error::RemoteRead { .. } => "RemoteReadError",
            Error::TransientNetwork { .. } => "TransientNetworkError",
            Error::Serialization { .. } => "SerializationError",
            Error::Validation { .. } => "ValidationError",
            Error::Kube { .. } => "KubernetesError",
        }
    }
}
