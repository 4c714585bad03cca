//! Error types for the labeler
//!
//! Per-member failures (`Probe`, `Patch`) and per-cycle failures (`Discovery`)
//! are contained by the reconciliation loop. Everything else is a startup error.

use thiserror::Error;

use crate::labeler::PodIdentity;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API request failed
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Kubeconfig file could not be read or applied
    #[error("Kubeconfig error: {0}")]
    KubeconfigError(#[from] kube::config::KubeconfigError),

    /// In-cluster service account credentials are unavailable
    #[error("In-cluster config error: {0}")]
    InClusterError(#[from] kube::config::InClusterError),

    /// MongoDB driver error
    #[error("MongoDB error: {0}")]
    MongoError(#[from] mongodb::error::Error),

    /// Listing member pods failed
    #[error("Discovery of pods matching '{selector}' in namespace {namespace} failed: {message}")]
    Discovery {
        namespace: String,
        selector: String,
        message: String,
    },

    /// A single member could not be probed
    #[error("Probe of {endpoint} failed: {message}")]
    Probe { endpoint: String, message: String },

    /// The role label could not be written to a pod
    #[error("Failed to patch labels on pod {pod}: {message}")]
    Patch { pod: PodIdentity, message: String },

    /// Invalid startup configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// Build a `Discovery` error from a failed list call
    pub fn discovery(namespace: &str, selector: &str, cause: impl std::fmt::Display) -> Self {
        Error::Discovery {
            namespace: namespace.to_string(),
            selector: selector.to_string(),
            message: cause.to_string(),
        }
    }

    /// Build a `Patch` error from a failed patch call
    pub fn patch(pod: &PodIdentity, cause: impl std::fmt::Display) -> Self {
        Error::Patch {
            pod: pod.clone(),
            message: cause.to_string(),
        }
    }

    /// Whether the next attempt has a reasonable chance of succeeding.
    ///
    /// Conflicts, throttling and server-side failures are transient; bad
    /// requests, missing permissions and configuration errors are not.
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(resp)) => {
                matches!(resp.code, 409 | 429) || resp.code >= 500
            }
            Error::KubeError(_) => true,
            Error::MongoError(_) => true,
            Error::Discovery { .. } | Error::Probe { .. } | Error::Patch { .. } => true,
            Error::KubeconfigError(_) | Error::InClusterError(_) | Error::ConfigError(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
