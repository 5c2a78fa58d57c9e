//! Credential resolution and client construction
//!
//! The [`Connector`] runs at the start of every reconcile: it checks the
//! managed kind, resolves the ProviderConfig's credentials, and asks the
//! injected [`ClientFactory`] for a Coder client. Nothing is cached between
//! reconciles.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
#[cfg(test)]
use mockall::automock;
use tracing::debug;
use zeroize::Zeroizing;

use super::external::{ExternalClient, WorkspaceExternal};
use super::managed::Managed;
use crate::coder::{CoderApi, CoderClient};
use crate::crd::{CredentialsSource, ProviderConfig, ProviderConfigReference};
use crate::{Error, Result};

/// Coder endpoint and session token for one reconcile
#[derive(Clone)]
pub struct Credentials {
    /// Base URL of the Coder deployment
    pub endpoint: String,
    /// Session token, wiped from memory on drop
    pub token: Zeroizing<String>,
}

impl Credentials {
    /// Bundle an endpoint with a token
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token: Zeroizing::new(token.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Resolves a ProviderConfig reference to credentials
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Look up the ProviderConfig and read its token
    async fn resolve(&self, reference: &ProviderConfigReference) -> Result<Credentials>;
}

/// Builds a Coder client from resolved credentials
#[cfg_attr(test, automock)]
pub trait ClientFactory: Send + Sync {
    /// Create a client bound to the credentials' endpoint and token
    fn new_client(&self, credentials: &Credentials) -> Result<Arc<dyn CoderApi>>;
}

/// Produces an external client for a managed resource
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Connecter: Send + Sync {
    /// Build an external client for `managed`
    async fn connect(&self, managed: &Managed) -> Result<Box<dyn ExternalClient>>;
}

/// Reads ProviderConfigs and their token sources from the cluster
pub struct KubeCredentialSource {
    client: Client,
}

impl KubeCredentialSource {
    /// Create a credential source using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn read_secret_key(
        &self,
        pc: &str,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> Result<String> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = api
            .get_opt(name)
            .await
            .map_err(|e| {
                Error::credentials(pc, format!("cannot read secret {namespace}/{name}: {e}"))
            })?
            .ok_or_else(|| Error::credentials(pc, format!("secret {namespace}/{name} not found")))?;

        let bytes = secret
            .data
            .as_ref()
            .and_then(|data| data.get(key))
            .ok_or_else(|| {
                Error::credentials(pc, format!("secret {namespace}/{name} has no key {key}"))
            })?;

        String::from_utf8(bytes.0.clone()).map_err(|_| {
            Error::credentials(pc, format!("secret {namespace}/{name} key {key} is not UTF-8"))
        })
    }
}

#[async_trait]
impl CredentialSource for KubeCredentialSource {
    async fn resolve(&self, reference: &ProviderConfigReference) -> Result<Credentials> {
        let pc_name = reference.name.as_str();
        let api: Api<ProviderConfig> = Api::all(self.client.clone());
        let pc = api
            .get_opt(pc_name)
            .await
            .map_err(|e| Error::credentials(pc_name, format!("cannot read ProviderConfig: {e}")))?
            .ok_or_else(|| Error::credentials(pc_name, "ProviderConfig not found"))?;

        let creds = &pc.spec.credentials;
        let token = match creds.source {
            CredentialsSource::Secret => {
                let selector = creds.secret_ref.as_ref().ok_or_else(|| {
                    Error::credentials(pc_name, "source is Secret but secretRef is not set")
                })?;
                self.read_secret_key(pc_name, &selector.namespace, &selector.name, &selector.key)
                    .await?
            }
            CredentialsSource::Environment => {
                let env = creds.env.as_ref().ok_or_else(|| {
                    Error::credentials(pc_name, "source is Environment but env is not set")
                })?;
                std::env::var(&env.name).map_err(|_| {
                    Error::credentials(pc_name, format!("env var {} is not set", env.name))
                })?
            }
            CredentialsSource::Filesystem => {
                let fs = creds.fs.as_ref().ok_or_else(|| {
                    Error::credentials(pc_name, "source is Filesystem but fs is not set")
                })?;
                tokio::fs::read_to_string(&fs.path).await.map_err(|e| {
                    Error::credentials(pc_name, format!("cannot read {}: {e}", fs.path))
                })?
            }
        };

        let token = Zeroizing::new(token);
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return Err(Error::credentials(pc_name, "session token is empty"));
        }

        debug!(provider_config = %pc_name, source = ?creds.source, "resolved credentials");
        Ok(Credentials::new(pc.spec.coder_url.clone(), trimmed))
    }
}

/// Builds [`CoderClient`]s with a fixed request timeout
pub struct HttpClientFactory {
    timeout: Duration,
}

impl HttpClientFactory {
    /// Create a factory whose clients time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ClientFactory for HttpClientFactory {
    fn new_client(&self, credentials: &Credentials) -> Result<Arc<dyn CoderApi>> {
        let client = CoderClient::new(&credentials.endpoint, &credentials.token, self.timeout)?;
        Ok(Arc::new(client))
    }
}

/// Connects managed resources to Coder
pub struct Connector {
    credentials: Arc<dyn CredentialSource>,
    factory: Arc<dyn ClientFactory>,
}

impl Connector {
    /// Create a connector from a credential source and a client factory
    pub fn new(credentials: Arc<dyn CredentialSource>, factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            credentials,
            factory,
        }
    }
}

#[async_trait]
impl Connecter for Connector {
    async fn connect(&self, managed: &Managed) -> Result<Box<dyn ExternalClient>> {
        managed.as_workspace()?;
        let credentials = self.credentials.resolve(managed.provider_config_ref()).await?;
        let api = self.factory.new_client(&credentials)?;
        debug!(
            kind = managed.kind(),
            name = %managed.name(),
            endpoint = %credentials.endpoint,
            "connected to Coder"
        );
        Ok(Box::new(WorkspaceExternal::new(api, credentials.endpoint.as_str())))
    }
}
