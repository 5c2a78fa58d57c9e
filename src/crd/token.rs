//! Token Custom Resource Definition
//!
//! Served so manifests that declare Tokens are accepted. No external client
//! reconciles it; handing a Token to the connector fails as unsupported.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DeletionPolicy, ProviderConfigReference, SecretReference};

/// Configurable fields of a Token
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenParameters {
    /// Free-form configuration value
    #[serde(default)]
    pub configurable_field: String,
}

/// Desired state of a Token
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "coder.crossplane.io",
    version = "v1alpha1",
    kind = "Token",
    plural = "tokens",
    status = "TokenStatus",
    namespaced = false,
    category = "crossplane",
    category = "managed",
    category = "coderworkspaces",
    printcolumn = r#"{"name":"READY","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"SYNCED","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"AGE","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TokenSpec {
    /// Token parameters
    pub for_provider: TokenParameters,

    /// ProviderConfig holding the Coder URL and credentials
    #[serde(default)]
    pub provider_config_ref: ProviderConfigReference,

    /// Secret that receives connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretReference>,

    /// Deletion policy
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,
}

/// Observed state of a Token
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    /// Free-form observed value
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub observable_field: String,

    /// Ready and Synced conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
