//! Observe, Create, Update and Delete against Coder
//!
//! [`WorkspaceExternal`] is built fresh by the connector on every reconcile and
//! holds nothing but a client and the deployment URL. Every decision it makes
//! comes from the Workspace it is handed and what Coder returns.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use super::managed::Managed;
use crate::coder::{
    BuildTransition, CoderApi, CoderUser, CoderWorkspace, CreateWorkspaceBuildRequest,
    CreateWorkspaceRequest, WorkspaceBuildParameter,
};
use crate::crd::{ExternalName, WorkspaceObservation, WorkspaceParameters};
use crate::{Error, Result};

/// Key/value pairs written to the connection secret
pub type ConnectionDetails = BTreeMap<String, String>;

/// Result of observing the external resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalObservation {
    /// Coder has a live workspace under the external name
    pub resource_exists: bool,
    /// The workspace's parameters match the desired ones
    pub resource_up_to_date: bool,
    /// Details to publish for consumers
    pub connection_details: ConnectionDetails,
    /// Observed attributes for `status.atProvider`
    pub at_provider: Option<WorkspaceObservation>,
}

impl ExternalObservation {
    /// Observation of a resource that does not exist
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Result of creating the external resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalCreation {
    /// Details to publish for consumers
    pub connection_details: ConnectionDetails,
}

/// Result of updating the external resource
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExternalUpdate {
    /// Details to publish for consumers
    pub connection_details: ConnectionDetails,
}

/// Client for one kind of external resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ExternalClient: Send + Sync {
    /// Read the external resource without changing it
    async fn observe(&self, managed: &Managed) -> Result<ExternalObservation>;

    /// Create the external resource; succeeds if it already exists
    async fn create(&self, managed: &Managed) -> Result<ExternalCreation>;

    /// Push diverging parameters to the external resource
    async fn update(&self, managed: &Managed) -> Result<ExternalUpdate>;

    /// Delete the external resource; succeeds if it is already gone
    async fn delete(&self, managed: &Managed) -> Result<()>;
}

/// External client for Coder workspaces
pub struct WorkspaceExternal {
    api: Arc<dyn CoderApi>,
    endpoint: String,
}

impl WorkspaceExternal {
    /// Wrap an API client; `endpoint` is the Coder URL used in connection details
    pub fn new(api: Arc<dyn CoderApi>, endpoint: impl Into<String>) -> Self {
        Self {
            api,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        }
    }

    /// Details for consumers; the owner Coder reports wins over `me`
    fn connection_details(
        &self,
        ext: &ExternalName,
        remote: Option<&CoderWorkspace>,
    ) -> ConnectionDetails {
        let owner = remote
            .map(|w| w.owner_name.as_str())
            .filter(|o| !o.is_empty())
            .unwrap_or(&ext.owner);

        let mut details = ConnectionDetails::new();
        details.insert(
            "endpoint".to_string(),
            format!("{}/@{}/{}", self.endpoint, owner, ext.workspace),
        );
        details.insert("owner".to_string(), owner.to_string());
        details.insert("workspace".to_string(), ext.workspace.clone());
        if let Some(remote) = remote {
            details.insert("workspaceId".to_string(), remote.id.clone());
        }
        details
    }

    /// Fetch the workspace, treating a finished delete build as absent
    async fn live_workspace(&self, ext: &ExternalName) -> Result<Option<CoderWorkspace>> {
        let remote = self.api.get_workspace(&ext.owner, &ext.workspace).await?;
        Ok(remote.filter(|ws| !ws.latest_build.is_deleted()))
    }

    async fn resolve_user(&self, owner: &str) -> Result<CoderUser> {
        self.api
            .get_user(owner)
            .await?
            .ok_or_else(|| Error::reference("user", owner, "not found"))
    }

    async fn resolve_template(&self, params: &WorkspaceParameters, org: &str) -> Result<String> {
        if let Some(id) = params.template_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }

        let name = params
            .template
            .as_deref()
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::reference("template", "", "neither template_id nor template is set")
            })?;

        let templates = self.api.list_templates(org).await?;
        let mut matches = templates.into_iter().filter(|t| t.name == name);
        match (matches.next(), matches.next()) {
            (Some(template), None) => Ok(template.id),
            (None, _) => Err(Error::reference(
                "template",
                name,
                format!("not found in organization {org}"),
            )),
            (Some(_), Some(_)) => Err(Error::reference(
                "template",
                name,
                format!("matches more than one template in organization {org}"),
            )),
        }
    }
}

/// Pick the organization to create in
///
/// The desired org must be one the user belongs to. Without one, the user
/// must belong to exactly one organization.
fn resolve_organization(user: &CoderUser, desired: &str) -> Result<String> {
    if !desired.is_empty() {
        if user.organization_ids.iter().any(|id| id == desired) {
            return Ok(desired.to_string());
        }
        return Err(Error::reference(
            "organization",
            desired,
            format!("user {} is not a member", user.username),
        ));
    }

    match user.organization_ids.as_slice() {
        [only] => Ok(only.clone()),
        ids => Err(Error::reference(
            "organization",
            "",
            format!(
                "user {} belongs to {} organizations and org_id is not set",
                user.username,
                ids.len()
            ),
        )),
    }
}

/// Desired parameters whose remote value is missing or different
fn diverging_parameters(
    desired: &BTreeMap<String, String>,
    actual: &[WorkspaceBuildParameter],
) -> BTreeMap<String, String> {
    desired
        .iter()
        .filter(|(name, value)| {
            !actual
                .iter()
                .any(|p| &p.name == *name && &p.value == *value)
        })
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

fn observation(ws: &CoderWorkspace) -> WorkspaceObservation {
    WorkspaceObservation {
        workspace_id: Some(ws.id.clone()),
        owner: Some(ws.owner_name.clone()).filter(|o| !o.is_empty()),
        template_id: Some(ws.template_id.clone()).filter(|t| !t.is_empty()),
        latest_stat: ws.latest_build.status.clone(),
        latest_transition: ws.latest_build.transition.as_str().to_string(),
        last_used_at: ws.last_used_at.clone(),
    }
}

#[async_trait]
impl ExternalClient for WorkspaceExternal {
    async fn observe(&self, managed: &Managed) -> Result<ExternalObservation> {
        let ws = managed.as_workspace()?;
        let ext = ws.external_name()?;

        let Some(remote) = self.live_workspace(&ext).await? else {
            debug!(workspace = %ext, "workspace not found in Coder");
            return Ok(ExternalObservation::absent());
        };

        // A workspace being torn down is left alone until it is gone
        let up_to_date = if remote.latest_build.is_deleting() {
            true
        } else {
            let actual = self.api.get_build_parameters(&remote.latest_build.id).await?;
            let diff = diverging_parameters(&ws.spec.for_provider.desired_parameters(), &actual);
            if !diff.is_empty() {
                let names: Vec<&String> = diff.keys().collect();
                debug!(workspace = %ext, diverging = ?names, "parameters drifted");
            }
            diff.is_empty()
        };

        Ok(ExternalObservation {
            resource_exists: true,
            resource_up_to_date: up_to_date,
            connection_details: self.connection_details(&ext, Some(&remote)),
            at_provider: Some(observation(&remote)),
        })
    }

    async fn create(&self, managed: &Managed) -> Result<ExternalCreation> {
        let ws = managed.as_workspace()?;
        let ext = ws.external_name()?;
        let params = &ws.spec.for_provider;

        if let Some(existing) = self.live_workspace(&ext).await? {
            info!(workspace = %ext, "workspace already exists, skipping create");
            return Ok(ExternalCreation {
                connection_details: self.connection_details(&ext, Some(&existing)),
            });
        }

        let user = self.resolve_user(&ext.owner).await?;
        let org = resolve_organization(&user, &params.org_id)?;
        let template_id = self.resolve_template(params, &org).await?;

        let request = CreateWorkspaceRequest {
            template_id,
            name: ext.workspace.clone(),
            rich_parameter_values: WorkspaceBuildParameter::from_map(&params.desired_parameters()),
        };

        let created = match self.api.create_workspace(&org, &user.id, &request).await {
            Ok(created) => {
                info!(workspace = %ext, id = %created.id, "created workspace");
                Some(created)
            }
            Err(e) if e.status() == Some(409) => {
                info!(workspace = %ext, "workspace created concurrently, treating as success");
                self.live_workspace(&ext).await?
            }
            Err(e) => return Err(e),
        };

        Ok(ExternalCreation {
            connection_details: self.connection_details(&ext, created.as_ref()),
        })
    }

    async fn update(&self, managed: &Managed) -> Result<ExternalUpdate> {
        let ws = managed.as_workspace()?;
        let ext = ws.external_name()?;

        let Some(remote) = self.live_workspace(&ext).await? else {
            info!(workspace = %ext, "workspace vanished before update");
            return Ok(ExternalUpdate::default());
        };

        let actual = self.api.get_build_parameters(&remote.latest_build.id).await?;
        let diff = diverging_parameters(&ws.spec.for_provider.desired_parameters(), &actual);
        if !diff.is_empty() {
            let request = CreateWorkspaceBuildRequest {
                transition: BuildTransition::Start,
                rich_parameter_values: WorkspaceBuildParameter::from_map(&diff),
            };
            let build = self.api.create_build(&remote.id, &request).await?;
            info!(
                workspace = %ext,
                build = %build.id,
                changed = diff.len(),
                "started update build"
            );
        }

        Ok(ExternalUpdate {
            connection_details: self.connection_details(&ext, Some(&remote)),
        })
    }

    async fn delete(&self, managed: &Managed) -> Result<()> {
        let ws = managed.as_workspace()?;
        let ext = ws.external_name()?;

        let remote = match self.live_workspace(&ext).await? {
            Some(remote) if !remote.latest_build.is_deleting() => remote,
            _ => {
                debug!(workspace = %ext, "workspace already gone or deleting");
                return Ok(());
            }
        };
        if remote.latest_build.is_delete() {
            info!(
                workspace = %ext,
                status = %remote.latest_build.status,
                "previous delete build did not finish, retrying"
            );
        }

        let request = CreateWorkspaceBuildRequest {
            transition: BuildTransition::Delete,
            rich_parameter_values: Vec::new(),
        };
        match self.api.create_build(&remote.id, &request).await {
            Ok(build) => {
                info!(workspace = %ext, build = %build.id, "started delete build");
                Ok(())
            }
            Err(e) if e.status() == Some(404) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
