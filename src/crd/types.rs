//! Supporting types shared by the provider's CRDs
//!
//! These follow the managed-resource conventions: a provider config reference,
//! a connection secret reference, a deletion policy, and `Ready`/`Synced`
//! conditions on status.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type reporting whether the external resource is usable
pub const CONDITION_READY: &str = "Ready";

/// Condition type reporting whether the last reconcile succeeded
pub const CONDITION_SYNCED: &str = "Synced";

/// Name of the ProviderConfig used when a Workspace does not reference one
pub const DEFAULT_PROVIDER_CONFIG: &str = "default";

/// What happens to the external resource when the managed resource is deleted
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum DeletionPolicy {
    /// Delete the external resource
    #[default]
    Delete,
    /// Leave the external resource in place
    Orphan,
}

/// Reference to a cluster-scoped ProviderConfig
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct ProviderConfigReference {
    /// Name of the ProviderConfig
    pub name: String,
}

impl Default for ProviderConfigReference {
    fn default() -> Self {
        Self {
            name: DEFAULT_PROVIDER_CONFIG.to_string(),
        }
    }
}

/// Reference to a Secret in a specific namespace
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretReference {
    /// Name of the secret
    pub name: String,
    /// Namespace of the secret
    pub namespace: String,
}

/// Selects a single key of a Secret
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct SecretKeySelector {
    /// Name of the secret
    pub name: String,
    /// Namespace of the secret
    pub namespace: String,
    /// Key within the secret's data
    pub key: String,
}

/// Status of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (Ready, Synced)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    pub reason: String,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// The external resource exists and is usable
    pub fn available() -> Self {
        Self::new(CONDITION_READY, ConditionStatus::True, "Available", "")
    }

    /// The external resource is being created
    pub fn creating() -> Self {
        Self::new(CONDITION_READY, ConditionStatus::False, "Creating", "")
    }

    /// The external resource is being deleted
    pub fn deleting() -> Self {
        Self::new(CONDITION_READY, ConditionStatus::False, "Deleting", "")
    }

    /// The external resource exists but cannot be used
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(CONDITION_READY, ConditionStatus::False, "Unavailable", message)
    }

    /// The last reconcile completed without error
    pub fn reconcile_success() -> Self {
        Self::new(CONDITION_SYNCED, ConditionStatus::True, "ReconcileSuccess", "")
    }

    /// The last reconcile failed
    pub fn reconcile_error(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(CONDITION_SYNCED, ConditionStatus::False, reason, message)
    }

    /// Equal ignoring the transition timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Insert or replace a condition by type
///
/// The previous transition time is kept when the condition's status did not
/// change, so repeated reconciles do not churn the status subresource.
pub fn set_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time;
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}
