//! Cluster member identity and endpoint derivation

use std::fmt;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

/// Name and namespace of a member pod; enough to address a patch
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PodIdentity {
    pub name: String,
    pub namespace: String,
}

impl PodIdentity {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for PodIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Network address used to reach a member's database
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One candidate database instance, built fresh from each pod listing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterMember {
    pub identity: PodIdentity,
    pub endpoint: Endpoint,
}

impl ClusterMember {
    /// Build a member from a listed pod.
    ///
    /// Returns `None` when the pod is being deleted or when no governing
    /// service name can be recovered from it.
    pub fn from_pod(pod: &Pod, default_namespace: &str, port: u16) -> Option<Self> {
        if pod.metadata.deletion_timestamp.is_some() {
            return None;
        }

        let name = pod.metadata.name.as_deref()?;
        let namespace = pod
            .namespace()
            .unwrap_or_else(|| default_namespace.to_string());
        let service = workload_service_name(name, pod.metadata.generate_name.as_deref())?;

        Some(Self {
            identity: PodIdentity::new(name, namespace.clone()),
            endpoint: Endpoint {
                host: member_host(name, &service, &namespace),
                port,
            },
        })
    }
}

/// Cluster-internal DNS name of a StatefulSet pod: `<pod>.<service>.<namespace>`
pub fn member_host(pod_name: &str, service: &str, namespace: &str) -> String {
    format!("{}.{}.{}", pod_name, service, namespace)
}

/// Recover the owning workload's stable name for a pod.
///
/// StatefulSet pods carry `generateName: "<set>-"`; the trailing dash is
/// stripped. Without a generated name the ordinal suffix of the pod name is
/// removed instead (`db-2` -> `db`).
pub fn workload_service_name(pod_name: &str, generate_name: Option<&str>) -> Option<String> {
    if let Some(prefix) = generate_name {
        let stripped = prefix.strip_suffix('-').unwrap_or(prefix);
        if !stripped.is_empty() {
            return Some(stripped.to_string());
        }
    }

    let (base, ordinal) = pod_name.rsplit_once('-')?;
    if base.is_empty() || ordinal.is_empty() || !ordinal.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(base.to_string())
}
