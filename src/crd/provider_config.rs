//! ProviderConfig Custom Resource Definition
//!
//! A ProviderConfig tells the provider where Coder lives and where to find the
//! session token used to talk to it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::SecretKeySelector;

/// Where the session token comes from
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum CredentialsSource {
    /// A key of a Kubernetes Secret
    #[default]
    Secret,
    /// An environment variable of the provider process
    Environment,
    /// A file mounted into the provider pod
    Filesystem,
}

/// Environment variable selector
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct EnvSelector {
    /// Variable name
    pub name: String,
}

/// File selector
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct FsSelector {
    /// Absolute path of the file
    pub path: String,
}

/// Credentials required to authenticate to Coder
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProviderCredentials {
    /// Source of the session token
    #[serde(default)]
    pub source: CredentialsSource,

    /// Secret key holding the token, used with `Secret`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<SecretKeySelector>,

    /// Environment variable holding the token, used with `Environment`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<EnvSelector>,

    /// File holding the token, used with `Filesystem`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsSelector>,
}

/// Configuration for connecting to a Coder deployment
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "coder.crossplane.io",
    version = "v1alpha1",
    kind = "ProviderConfig",
    plural = "providerconfigs",
    namespaced = false,
    category = "crossplane",
    category = "provider",
    category = "coder",
    printcolumn = r#"{"name":"URL","type":"string","jsonPath":".spec.coderUrl"}"#,
    printcolumn = r#"{"name":"SOURCE","type":"string","jsonPath":".spec.credentials.source"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    /// Base URL of the Coder deployment, e.g. `https://coder.example.com`
    pub coder_url: String,

    /// Where to read the session token
    pub credentials: ProviderCredentials,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_secret_credentials() {
        let yaml = r#"
apiVersion: coder.crossplane.io/v1alpha1
kind: ProviderConfig
metadata:
  name: default
spec:
  coderUrl: https://coder.example.com
  credentials:
    source: Secret
    secretRef:
      namespace: crossplane-system
      name: coder-creds
      key: token
"#;
        let pc: ProviderConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pc.spec.coder_url, "https://coder.example.com");
        assert_eq!(pc.spec.credentials.source, CredentialsSource::Secret);
        let selector = pc.spec.credentials.secret_ref.unwrap();
        assert_eq!(selector.key, "token");
        assert_eq!(selector.namespace, "crossplane-system");
    }

    #[test]
    fn parses_environment_credentials() {
        let yaml = r#"
coderUrl: http://coder.local
credentials:
  source: Environment
  env:
    name: CODER_SESSION_TOKEN
"#;
        let spec: ProviderConfigSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(spec.credentials.source, CredentialsSource::Environment);
        assert_eq!(spec.credentials.env.unwrap().name, "CODER_SESSION_TOKEN");
        assert!(spec.credentials.secret_ref.is_none());
    }
}
