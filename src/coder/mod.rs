//! Coder REST API
//!
//! [`CoderApi`] is the seam between the reconciler and Coder. [`CoderClient`]
//! implements it over HTTP; tests substitute `MockCoderApi`.

mod client;
mod types;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

pub use client::{CoderClient, API_PREFIX, SESSION_TOKEN_HEADER};
pub use types::{
    is_delete_in_progress, BuildTransition, CoderTemplate, CoderUser, CoderWorkspace,
    CreateWorkspaceBuildRequest, CreateWorkspaceRequest, WorkspaceBuild, WorkspaceBuildParameter,
};

use crate::Result;

/// The subset of the Coder API used to manage workspaces
///
/// Every method is a single HTTP request. Reads return `Ok(None)` on 404.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoderApi: Send + Sync {
    /// `GET /users/{name}`
    async fn get_user(&self, name: &str) -> Result<Option<CoderUser>>;

    /// `GET /organizations/{org}/templates`
    async fn list_templates(&self, organization_id: &str) -> Result<Vec<CoderTemplate>>;

    /// `GET /users/{owner}/workspace/{name}`
    async fn get_workspace(&self, owner: &str, name: &str) -> Result<Option<CoderWorkspace>>;

    /// `GET /workspacebuilds/{id}/parameters`
    async fn get_build_parameters(&self, build_id: &str) -> Result<Vec<WorkspaceBuildParameter>>;

    /// `POST /organizations/{org}/members/{user}/workspaces`
    async fn create_workspace(
        &self,
        organization_id: &str,
        user_id: &str,
        request: &CreateWorkspaceRequest,
    ) -> Result<CoderWorkspace>;

    /// `POST /workspaces/{id}/builds`
    async fn create_build(
        &self,
        workspace_id: &str,
        request: &CreateWorkspaceBuildRequest,
    ) -> Result<WorkspaceBuild>;
}
