//! Member discovery against the Kubernetes Pod API

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Api, ListParams},
    Client, ResourceExt,
};
use tracing::{debug, error, info, warn};

use super::member::ClusterMember;
use crate::error::{Error, Result};

/// Lists the current candidate members of the replica set
#[async_trait]
pub trait MemberDiscoverer: Send + Sync {
    /// One snapshot of the pods matching `selector` in `namespace`.
    ///
    /// Order of the returned members is not significant.
    async fn discover(&self, namespace: &str, selector: &str) -> Result<Vec<ClusterMember>>;
}

/// Discovers members by listing pods through the kube client
#[derive(Clone)]
pub struct KubeDiscoverer {
    client: Client,
    mongo_port: u16,
}

impl KubeDiscoverer {
    pub fn new(client: Client, mongo_port: u16) -> Self {
        Self { client, mongo_port }
    }

    /// Check once at startup that the pods can be listed at all.
    ///
    /// Bad credentials, missing RBAC and selectors the API server rejects
    /// surface here instead of failing every cycle.
    pub async fn preflight(&self, namespace: &str, selector: &str) -> Result<()> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);

        match pods
            .list(&ListParams::default().labels(selector).limit(1))
            .await
        {
            Ok(_) => {
                info!("Pod API reachable in namespace {}", namespace);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Cannot list pods matching '{}' in namespace {}: {:?}",
                    selector, namespace, e
                );
                Err(Error::ConfigError(format!(
                    "cannot list pods matching '{}' in namespace {}: {}",
                    selector, namespace, e
                )))
            }
        }
    }
}

#[async_trait]
impl MemberDiscoverer for KubeDiscoverer {
    async fn discover(&self, namespace: &str, selector: &str) -> Result<Vec<ClusterMember>> {
        debug!(
            "Listing pods matching '{}' in namespace {}",
            selector, namespace
        );

        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = pods
            .list(&ListParams::default().labels(selector))
            .await
            .map_err(|e| Error::discovery(namespace, selector, e))?;

        Ok(members_from_pods(&list.items, namespace, self.mongo_port))
    }
}

/// Convert a pod listing into members, dropping pods that cannot be addressed
pub fn members_from_pods(pods: &[Pod], namespace: &str, mongo_port: u16) -> Vec<ClusterMember> {
    pods.iter()
        .filter_map(|pod| {
            let member = ClusterMember::from_pod(pod, namespace, mongo_port);
            if member.is_none() {
                if pod.metadata.deletion_timestamp.is_some() {
                    debug!("Skipping terminating pod {}", pod.name_any());
                } else {
                    warn!(
                        "Skipping pod {}: cannot derive a stable network name",
                        pod.name_any()
                    );
                }
            }
            member
        })
        .collect()
}
