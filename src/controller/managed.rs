//! Handle over every managed resource kind this provider serves

use std::sync::Arc;

use kube::ResourceExt;

use crate::crd::{ProviderConfigReference, Token, Workspace};
use crate::{Error, Result};

/// A managed resource handed to the connector and external client
///
/// Only Workspaces have an external client. Other kinds are rejected with
/// [`Error::UnsupportedResource`] at the first operation that needs one.
#[derive(Clone, Debug)]
pub enum Managed {
    /// A Coder workspace
    Workspace(Arc<Workspace>),
    /// A Coder token
    Token(Arc<Token>),
}

impl Managed {
    /// Kind of the wrapped resource
    pub fn kind(&self) -> &'static str {
        match self {
            Managed::Workspace(_) => "Workspace",
            Managed::Token(_) => "Token",
        }
    }

    /// Name of the wrapped resource
    pub fn name(&self) -> String {
        match self {
            Managed::Workspace(ws) => ws.name_any(),
            Managed::Token(token) => token.name_any(),
        }
    }

    /// ProviderConfig the resource authenticates with
    pub fn provider_config_ref(&self) -> &ProviderConfigReference {
        match self {
            Managed::Workspace(ws) => &ws.spec.provider_config_ref,
            Managed::Token(token) => &token.spec.provider_config_ref,
        }
    }

    /// The Workspace, or `UnsupportedResource` for any other kind
    pub fn as_workspace(&self) -> Result<&Workspace> {
        match self {
            Managed::Workspace(ws) => Ok(ws),
            other => Err(Error::unsupported(other.kind())),
        }
    }
}

impl From<Arc<Workspace>> for Managed {
    fn from(ws: Arc<Workspace>) -> Self {
        Managed::Workspace(ws)
    }
}
