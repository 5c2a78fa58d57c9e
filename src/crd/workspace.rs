//! Workspace Custom Resource Definition
//!
//! A Workspace is a managed resource: its `forProvider` block is the desired
//! state of one Coder workspace, and its status mirrors what Coder reports.

use std::collections::BTreeMap;
use std::fmt;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    set_condition, Condition, DeletionPolicy, ProviderConfigReference, SecretReference,
};
use crate::coder::is_delete_in_progress;
use crate::{Error, EXTERNAL_NAME_ANNOTATION};

/// Owner used when the Workspace names no user
pub const CURRENT_USER: &str = "me";

/// Configurable fields of a Coder workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct WorkspaceParameters {
    /// Coder user that owns the workspace
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,

    /// Image the workspace runs
    #[serde(default)]
    pub image_id: String,

    /// Tag of the image
    #[serde(default)]
    pub image_tag: String,

    /// Coder organization the workspace is created in
    #[serde(default)]
    pub org_id: String,

    /// CPU cores, as Coder accepts fractional values
    #[serde(default)]
    pub cpu_cores: String,

    /// Memory in GB
    #[serde(default)]
    pub memory_gb: String,

    /// Disk size in GB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<i64>,

    /// Number of GPUs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpus: Option<i64>,

    /// Run the workspace in a container VM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_container_vm: Option<bool>,

    /// Resource pool to schedule into
    #[serde(default)]
    pub resource_pool_id: String,

    /// Namespace the workspace runs in on the Coder side
    #[serde(default)]
    pub namespace: String,

    /// Start the workspace automatically
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostart_enabled: Option<bool>,

    /// Create the workspace for another user (admins only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_user_id: Option<String>,

    /// Template id, used directly when set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    /// Template name, resolved within the organization when no id is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
}

impl WorkspaceParameters {
    /// User whose workspace namespace this Workspace lives in
    ///
    /// `for_user_id` wins over `username`; with neither the session's own user
    /// is used.
    pub fn owner(&self) -> String {
        let raw = self
            .for_user_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .or(Some(self.username.as_str()).filter(|s| !s.is_empty()));

        match raw {
            Some(name) => normalize_user(name),
            None => CURRENT_USER.to_string(),
        }
    }

    /// Desired rich parameter values keyed by parameter name
    ///
    /// Empty strings are left out so template defaults apply. Identity fields
    /// (user, organization, template) are not build parameters.
    pub fn desired_parameters(&self) -> BTreeMap<String, String> {
        let mut params = BTreeMap::new();
        let mut put = |name: &str, value: String| {
            if !value.is_empty() {
                params.insert(name.to_string(), value);
            }
        };

        put("image_id", self.image_id.clone());
        put("image_tag", self.image_tag.clone());
        put("cpu_cores", self.cpu_cores.clone());
        put("memory_gb", self.memory_gb.clone());
        put("disk_gb", optional(self.disk_gb));
        put("gpus", optional(self.gpus));
        put("use_container_vm", optional(self.use_container_vm));
        put("resource_pool_id", self.resource_pool_id.clone());
        put("namespace", self.namespace.clone());
        put("autostart_enabled", optional(self.autostart_enabled));

        params
    }
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// Normalize a user name the way Coder stores it
pub fn normalize_user(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '.')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Desired state of a Workspace
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "coder.crossplane.io",
    version = "v1alpha1",
    kind = "Workspace",
    plural = "workspaces",
    status = "WorkspaceStatus",
    namespaced = false,
    category = "crossplane",
    category = "managed",
    category = "coderworkspaces",
    printcolumn = r#"{"name":"READY","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"SYNCED","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"EXTERNAL-NAME","type":"string","jsonPath":".metadata.annotations.crossplane\\.io/external-name"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSpec {
    /// Parameters sent to Coder
    pub for_provider: WorkspaceParameters,

    /// ProviderConfig holding the Coder URL and credentials
    #[serde(default)]
    pub provider_config_ref: ProviderConfigReference,

    /// Secret that receives connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,

    /// Whether deleting the Workspace deletes the Coder workspace
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

/// Observable fields of a Coder workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct WorkspaceObservation {
    /// Coder's id for the workspace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_id: Option<String>,

    /// Owner name reported by Coder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,

    /// Template the workspace was built from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,

    /// Status of the latest build
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_stat: String,

    /// Transition of the latest build (`start`, `stop` or `delete`)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub latest_transition: String,

    /// Last time the workspace was used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
}

/// Observed state of a Workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    /// What Coder reported on the last observe
    #[serde(default)]
    pub at_provider: WorkspaceObservation,

    /// Ready and Synced conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// Generation of the spec this status reflects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl WorkspaceObservation {
    /// Whether the latest build is a delete that has not finished
    pub fn is_deleting(&self) -> bool {
        is_delete_in_progress(&self.latest_transition, &self.latest_stat)
    }
}

impl WorkspaceStatus {
    /// Set a condition, replacing any existing one of the same type
    pub fn with_condition(mut self, condition: Condition) -> Self {
        set_condition(&mut self.conditions, condition);
        self
    }

    /// Replace the observation
    pub fn with_observation(mut self, observation: WorkspaceObservation) -> Self {
        self.at_provider = observation;
        self
    }

    /// Record the generation this status reflects
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Look up a condition by type
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    /// Equal ignoring condition timestamps
    pub fn same_state(&self, other: &WorkspaceStatus) -> bool {
        self.at_provider == other.at_provider
            && self.observed_generation == other.observed_generation
            && self.conditions.len() == other.conditions.len()
            && self
                .conditions
                .iter()
                .all(|c| other.condition(&c.type_).is_some_and(|o| c.same_state(o)))
    }
}

/// Identity of a Coder workspace: `owner/workspace`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ExternalName {
    /// Normalized owner user name, or `me`
    pub owner: String,
    /// Workspace name
    pub workspace: String,
}

impl ExternalName {
    /// Parse an `owner/workspace` annotation value
    pub fn parse(value: &str) -> Option<Self> {
        let (owner, workspace) = value.split_once('/')?;
        if owner.is_empty() || workspace.is_empty() || workspace.contains('/') {
            return None;
        }
        Some(Self {
            owner: owner.to_string(),
            workspace: workspace.to_string(),
        })
    }
}

impl fmt::Display for ExternalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.workspace)
    }
}

impl Workspace {
    /// External name of the Coder workspace this object manages
    ///
    /// The annotation wins when present. Otherwise the name is derived from the
    /// owner and the object's cluster-unique name.
    pub fn external_name(&self) -> Result<ExternalName, Error> {
        let name = self.name_any();
        match self.annotations().get(EXTERNAL_NAME_ANNOTATION) {
            Some(value) if !value.is_empty() => ExternalName::parse(value).ok_or_else(|| {
                Error::validation(
                    &name,
                    format!("annotation {EXTERNAL_NAME_ANNOTATION}={value} is not owner/workspace"),
                )
            }),
            _ => Ok(ExternalName {
                owner: self.spec.for_provider.owner(),
                workspace: name,
            }),
        }
    }

    /// Whether the external-name annotation is already set
    pub fn has_external_name(&self) -> bool {
        self.annotations()
            .get(EXTERNAL_NAME_ANNOTATION)
            .is_some_and(|v| !v.is_empty())
    }
}
