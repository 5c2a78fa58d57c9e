//! HTTP implementation of [`CoderApi`]

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::types::{
    BuildTransition, CoderTemplate, CoderUser, CoderWorkspace, CreateWorkspaceBuildRequest,
    CreateWorkspaceRequest, WorkspaceBuild, WorkspaceBuildParameter,
};
use super::CoderApi;
use crate::{Error, Result};

/// Path prefix of every Coder endpoint
pub const API_PREFIX: &str = "/api/v2";

/// Header carrying the session token (`Coder-Session-Token`)
pub const SESSION_TOKEN_HEADER: &str = "coder-session-token";

/// Coder API client bound to one deployment and one session token
///
/// The token lives only in the client's default headers, marked sensitive so
/// it never shows up in debug output.
#[derive(Clone, Debug)]
pub struct CoderClient {
    http: reqwest::Client,
    base: Url,
    base_url: String,
}

impl CoderClient {
    /// Build a client for `endpoint` authenticating with `token`
    ///
    /// Fails with [`Error::ClientConstruction`] if the endpoint is not an
    /// absolute http(s) URL or the token is not a valid header value.
    pub fn new(endpoint: &str, token: &str, timeout: Duration) -> Result<Self> {
        let url = Url::parse(endpoint)
            .map_err(|e| Error::client_construction(format!("invalid Coder URL {endpoint}: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(Error::client_construction(format!(
                "Coder URL {endpoint} must be an absolute http(s) URL"
            )));
        }

        let mut token_value = HeaderValue::from_str(token).map_err(|_| {
            Error::client_construction("session token contains characters not allowed in a header")
        })?;
        token_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(HeaderName::from_static(SESSION_TOKEN_HEADER), token_value);
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::client_construction(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: endpoint.trim_end_matches('/').to_string(),
            base: url,
        })
    }

    /// Base URL without a trailing slash
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Endpoint URL under the API prefix; each segment is percent-encoded
    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::client_construction(format!("{} cannot be a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(API_PREFIX.split('/').filter(|s| !s.is_empty()))
            .extend(segments);
        Ok(url)
    }

    async fn get(&self, operation: &str, url: Url) -> Result<Response> {
        debug!(operation, path = url.path(), "GET");
        let response = self.http.get(url).send().await;
        check_transport(operation, response)
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        operation: &str,
        url: Url,
        body: &B,
    ) -> Result<Response> {
        debug!(operation, path = url.path(), "POST");
        let response = self.http.post(url).json(body).send().await;
        check_transport(operation, response)
    }

    /// GET that maps 404 to `None` and other 4xx to [`Error::RemoteRead`]
    async fn get_optional<T: DeserializeOwned>(
        &self,
        operation: &str,
        segments: &[&str],
    ) -> Result<Option<T>> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        let response = self.get(operation, url).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => decode(operation, response).await.map(Some),
            s => Err(Error::RemoteRead {
                path,
                status: s.as_u16(),
                message: body_text(response).await,
            }),
        }
    }

    async fn get_required<T: DeserializeOwned>(
        &self,
        operation: &str,
        segments: &[&str],
    ) -> Result<T> {
        let url = self.url(segments)?;
        let path = url.path().to_string();
        let response = self.get(operation, url).await?;
        let status = response.status();
        if status.is_success() {
            return decode(operation, response).await;
        }
        Err(Error::RemoteRead {
            path,
            status: status.as_u16(),
            message: body_text(response).await,
        })
    }
}

/// Map transport failures and server-side errors to [`Error::TransientNetwork`]
fn check_transport(
    operation: &str,
    response: std::result::Result<Response, reqwest::Error>,
) -> Result<Response> {
    let response = response.map_err(|e| {
        let kind = if e.is_timeout() {
            "timed out"
        } else if e.is_connect() {
            "connection failed"
        } else {
            "request failed"
        };
        Error::transient(operation, format!("{kind}: {e}"))
    })?;

    let status = response.status();
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        return Err(Error::transient(operation, format!("HTTP {status}")));
    }
    Ok(response)
}

async fn decode<T: DeserializeOwned>(operation: &str, response: Response) -> Result<T> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| Error::transient(operation, format!("failed to read response body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::serialization(operation, e.to_string()))
}

async fn body_text(response: Response) -> String {
    response.text().await.unwrap_or_default()
}

#[async_trait]
impl CoderApi for CoderClient {
    async fn get_user(&self, name: &str) -> Result<Option<CoderUser>> {
        self.get_optional("get_user", &["users", name]).await
    }

    async fn list_templates(&self, organization_id: &str) -> Result<Vec<CoderTemplate>> {
        self.get_required(
            "list_templates",
            &["organizations", organization_id, "templates"],
        )
        .await
    }

    async fn get_workspace(&self, owner: &str, name: &str) -> Result<Option<CoderWorkspace>> {
        self.get_optional("get_workspace", &["users", owner, "workspace", name]).await
    }

    async fn get_build_parameters(&self, build_id: &str) -> Result<Vec<WorkspaceBuildParameter>> {
        self.get_required(
            "get_build_parameters",
            &["workspacebuilds", build_id, "parameters"],
        )
        .await
    }

    async fn create_workspace(
        &self,
        organization_id: &str,
        user_id: &str,
        request: &CreateWorkspaceRequest,
    ) -> Result<CoderWorkspace> {
        let operation = "create_workspace";
        let url = self.url(&[
            "organizations",
            organization_id,
            "members",
            user_id,
            "workspaces",
        ])?;
        let response = self.post(operation, url, request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::RemoteCreate {
                workspace: request.name.clone(),
                status: status.as_u16(),
                message: body_text(response).await,
            });
        }
        decode(operation, response).await
    }

    async fn create_build(
        &self,
        workspace_id: &str,
        request: &CreateWorkspaceBuildRequest,
    ) -> Result<WorkspaceBuild> {
        let operation = match request.transition {
            BuildTransition::Delete => "delete_workspace",
            _ => "update_workspace",
        };
        let url = self.url(&["workspaces", workspace_id, "builds"])?;
        let response = self.post(operation, url, request).await?;
        let status = response.status();
        if !status.is_success() {
            let workspace = workspace_id.to_string();
            let status = status.as_u16();
            let message = body_text(response).await;
            return Err(match request.transition {
                BuildTransition::Delete => Error::RemoteDelete {
                    workspace,
                    status,
                    message,
                },
                _ => Error::RemoteUpdate {
                    workspace,
                    status,
                    message,
                },
            });
        }
        decode(operation, response).await
    }
}
