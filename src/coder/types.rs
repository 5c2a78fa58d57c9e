//! Wire types for the Coder `/api/v2` endpoints the provider calls

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A Coder user
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CoderUser {
    /// User id (UUID)
    pub id: String,
    /// Login name
    pub username: String,
    /// Organizations the user belongs to
    #[serde(default)]
    pub organization_ids: Vec<String>,
}

/// A workspace template
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CoderTemplate {
    /// Template id
    pub id: String,
    /// Template name, unique within an organization
    pub name: String,
    /// Owning organization
    #[serde(default)]
    pub organization_id: String,
}

/// Transition requested by a workspace build
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BuildTransition {
    /// Start (or restart with new parameters)
    #[default]
    Start,
    /// Stop
    Stop,
    /// Tear down
    Delete,
}

impl BuildTransition {
    /// Wire name of the transition
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildTransition::Start => "start",
            BuildTransition::Stop => "stop",
            BuildTransition::Delete => "delete",
        }
    }
}

/// Whether a build with this wire transition and status is still tearing the
/// workspace down
pub fn is_delete_in_progress(transition: &str, status: &str) -> bool {
    transition == BuildTransition::Delete.as_str()
        && matches!(status, "pending" | "starting" | "running" | "deleting" | "canceling")
}

/// A workspace build
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct WorkspaceBuild {
    /// Build id
    pub id: String,
    /// Job status, e.g. `running`, `deleting`, `deleted`
    #[serde(default)]
    pub status: String,
    /// What the build does
    #[serde(default)]
    pub transition: BuildTransition,
}

impl WorkspaceBuild {
    /// Whether this build tears the workspace down
    pub fn is_delete(&self) -> bool {
        self.transition == BuildTransition::Delete
    }

    /// Whether this build finished tearing the workspace down
    pub fn is_deleted(&self) -> bool {
        self.is_delete() && self.status == "deleted"
    }

    /// Whether a delete build is still queued or tearing the workspace down
    ///
    /// A delete that ended `failed` or `canceled` is not in progress.
    pub fn is_deleting(&self) -> bool {
        is_delete_in_progress(self.transition.as_str(), &self.status)
    }
}

/// A Coder workspace
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct CoderWorkspace {
    /// Workspace id
    pub id: String,
    /// Workspace name
    pub name: String,
    /// Owner user name
    #[serde(default)]
    pub owner_name: String,
    /// Template the workspace was built from
    #[serde(default)]
    pub template_id: String,
    /// Most recent build
    pub latest_build: WorkspaceBuild,
    /// RFC 3339 timestamp of last use
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<String>,
}

/// One rich parameter value
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct WorkspaceBuildParameter {
    /// Parameter name as declared by the template
    pub name: String,
    /// Value, always a string on the wire
    pub value: String,
}

impl WorkspaceBuildParameter {
    /// Convert a name/value map into wire parameters
    pub fn from_map(values: &BTreeMap<String, String>) -> Vec<Self> {
        values
            .iter()
            .map(|(name, value)| Self {
                name: name.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// Body of `POST /organizations/{org}/members/{user}/workspaces`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CreateWorkspaceRequest {
    /// Template to build from
    pub template_id: String,
    /// Workspace name
    pub name: String,
    /// Initial parameter values
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rich_parameter_values: Vec<WorkspaceBuildParameter>,
}

/// Body of `POST /workspaces/{id}/builds`
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct CreateWorkspaceBuildRequest {
    /// Requested transition
    pub transition: BuildTransition,
    /// Parameters that change with this build
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rich_parameter_values: Vec<WorkspaceBuildParameter>,
}
