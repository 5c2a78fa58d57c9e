//! Custom Resource Definitions served by the Coder provider
//!
//! All kinds live in the cluster-scoped `coder.crossplane.io/v1alpha1` API.

mod provider_config;
mod token;
mod types;
mod workspace;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

pub use provider_config::{
    CredentialsSource, EnvSelector, FsSelector, ProviderConfig, ProviderConfigSpec,
    ProviderCredentials,
};
pub use token::{Token, TokenParameters, TokenSpec, TokenStatus};
pub use types::{
    set_condition, Condition, ConditionStatus, DeletionPolicy, ProviderConfigReference,
    SecretKeySelector, SecretReference, CONDITION_READY, CONDITION_SYNCED,
    DEFAULT_PROVIDER_CONFIG,
};
pub use workspace::{
    normalize_user, ExternalName, Workspace, WorkspaceObservation, WorkspaceParameters,
    WorkspaceSpec, WorkspaceStatus, CURRENT_USER,
};

/// Every CRD this provider installs
pub fn all() -> Vec<CustomResourceDefinition> {
    vec![Workspace::crd(), Token::crd(), ProviderConfig::crd()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_crds_are_cluster_scoped_in_one_group() {
        let crds = all();
        assert_eq!(crds.len(), 3);
        for crd in &crds {
            assert_eq!(crd.spec.group, "coder.crossplane.io");
            assert_eq!(crd.spec.scope, "Cluster");
        }
        let names: Vec<_> = crds.iter().map(|c| c.spec.names.kind.as_str()).collect();
        assert_eq!(names, vec!["Workspace", "Token", "ProviderConfig"]);
    }

    #[test]
    fn workspace_crd_has_status_subresource() {
        let crd = Workspace::crd();
        let version = &crd.spec.versions[0];
        assert!(version
            .subresources
            .as_ref()
            .and_then(|s| s.status.as_ref())
            .is_some());
    }
}
