//! Role label patches and their application to pods

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, Patch, PatchParams},
    Client,
};
use tracing::info;

use super::member::PodIdentity;
use super::probe::Role;
use crate::error::{Error, Result};

/// Default label key carrying the replication role
pub const DEFAULT_ROLE_LABEL: &str = "redmart.com/mongo-role";

/// Field manager recorded on label patches
pub const FIELD_MANAGER: &str = "mongo-labeler";

pub const LABEL_PRIMARY: &str = "primary";
pub const LABEL_SECONDARY: &str = "secondary";
pub const LABEL_UNKNOWN: &str = "unknown";

/// What to do with a member whose probe failed
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum UnknownRolePolicy {
    /// Leave the pod untouched so it keeps its last known label
    #[default]
    Skip,
    /// Overwrite the role label with `unknown`
    Label,
}

/// Label value for `role`, or `None` when the pod must not be patched
pub fn label_value(role: Role, policy: UnknownRolePolicy) -> Option<&'static str> {
    match (role, policy) {
        (Role::Leader, _) => Some(LABEL_PRIMARY),
        (Role::Follower, _) => Some(LABEL_SECONDARY),
        (Role::Unknown, UnknownRolePolicy::Label) => Some(LABEL_UNKNOWN),
        (Role::Unknown, UnknownRolePolicy::Skip) => None,
    }
}

/// Desired role label on one pod
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelPatch {
    pub identity: PodIdentity,
    pub label_key: String,
    pub label_value: String,
}

impl LabelPatch {
    /// Build the patch for `role`, or `None` if the policy says to leave the pod alone
    pub fn for_role(
        identity: &PodIdentity,
        label_key: &str,
        role: Role,
        policy: UnknownRolePolicy,
    ) -> Option<Self> {
        label_value(role, policy).map(|value| Self {
            identity: identity.clone(),
            label_key: label_key.to_string(),
            label_value: value.to_string(),
        })
    }

    /// JSON merge patch touching only the role label
    pub fn body(&self) -> serde_json::Value {
        serde_json::json!({
            "metadata": {
                "labels": {
                    self.label_key.as_str(): self.label_value
                }
            }
        })
    }
}

/// Writes role labels to pods
#[async_trait]
pub trait LabelReconciler: Send + Sync {
    async fn reconcile(&self, patch: &LabelPatch) -> Result<()>;
}

/// Applies label patches through the kube client
#[derive(Clone)]
pub struct KubeLabelReconciler {
    client: Client,
}

impl KubeLabelReconciler {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LabelReconciler for KubeLabelReconciler {
    async fn reconcile(&self, patch: &LabelPatch) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &patch.identity.namespace);

        info!(
            "Applying label '{}={}' to {}",
            patch.label_key, patch.label_value, patch.identity
        );

        pods.patch(
            &patch.identity.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch.body()),
        )
        .await
        .map_err(|e| Error::patch(&patch.identity, e))?;

        Ok(())
    }
}
