//! Startup configuration
//!
//! All settings are resolved once in `main` and handed to the loop as an
//! immutable [`LabelerConfig`]; nothing is read from ambient globals later.

use std::path::PathBuf;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use tracing::info;

use crate::error::{Error, Result};
use crate::labeler::labels::{UnknownRolePolicy, DEFAULT_ROLE_LABEL};

pub const DEFAULT_NAMESPACE: &str = "mongo";
pub const DEFAULT_POD_SELECTOR: &str = "app=mongodb-replicaset";
pub const DEFAULT_UPDATE_PERIOD_SECS: u64 = 60;
pub const DEFAULT_MONGO_PORT: u16 = 27017;
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Settings of the reconciliation loop
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelerConfig {
    /// Namespace searched for replica set pods
    pub namespace: String,
    /// Label selector matching replica set pods
    pub pod_selector: String,
    /// Wait between the end of one cycle and the start of the next
    pub update_period: Duration,
    /// Probe and log, never patch
    pub dry_run: bool,
    pub mongo_port: u16,
    /// Upper bound on a single member probe
    pub probe_timeout: Duration,
    /// Label key that carries the role
    pub role_label: String,
    pub unknown_role_policy: UnknownRolePolicy,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            pod_selector: DEFAULT_POD_SELECTOR.to_string(),
            update_period: Duration::from_secs(DEFAULT_UPDATE_PERIOD_SECS),
            dry_run: false,
            mongo_port: DEFAULT_MONGO_PORT,
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
            role_label: DEFAULT_ROLE_LABEL.to_string(),
            unknown_role_policy: UnknownRolePolicy::default(),
        }
    }
}

impl LabelerConfig {
    /// Reject settings the loop could never work with
    pub fn validate(&self) -> Result<()> {
        validate_namespace(&self.namespace)?;
        validate_selector(&self.pod_selector)?;
        validate_label_key(&self.role_label)?;

        if self.update_period.is_zero() {
            return Err(Error::ConfigError(
                "update period must be at least one second".to_string(),
            ));
        }
        if self.probe_timeout.is_zero() {
            return Err(Error::ConfigError(
                "probe timeout must be at least one second".to_string(),
            ));
        }
        if self.mongo_port == 0 {
            return Err(Error::ConfigError("mongo port must not be 0".to_string()));
        }
        Ok(())
    }
}

/// How to reach the Kubernetes API server
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KubeClientOptions {
    /// Kubeconfig for out-of-cluster use; `None` means in-cluster credentials
    pub config_file: Option<PathBuf>,
    pub insecure_skip_tls_verify: bool,
}

impl KubeClientOptions {
    /// Resolve the client configuration from a kubeconfig file or the pod's
    /// service account
    pub async fn kube_config(&self) -> Result<kube::Config> {
        let mut config = match &self.config_file {
            Some(path) => {
                info!("Loading Kubernetes config from {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path)?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?
            }
            None => {
                info!("Loading in-cluster Kubernetes config");
                kube::Config::incluster()?
            }
        };

        info!("TLS verify: {}", !self.insecure_skip_tls_verify);
        if self.insecure_skip_tls_verify {
            config.accept_invalid_certs = true;
        }
        Ok(config)
    }

    pub async fn build_client(&self) -> Result<kube::Client> {
        let config = self.kube_config().await?;
        Ok(kube::Client::try_from(config)?)
    }
}

/// RFC 1123 label, as required for namespace names
fn validate_namespace(namespace: &str) -> Result<()> {
    if is_dns_label(namespace) {
        Ok(())
    } else {
        Err(Error::ConfigError(format!(
            "'{}' is not a valid namespace name",
            namespace
        )))
    }
}

fn is_dns_label(s: &str) -> bool {
    !s.is_empty()
        && s.len() <= 63
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !s.starts_with('-')
        && !s.ends_with('-')
}

/// Label key: optional DNS subdomain prefix, `/`, and a name of at most 63
/// alphanumerics, `-`, `_` or `.`
fn validate_label_key(key: &str) -> Result<()> {
    let (prefix, name) = match key.split_once('/') {
        Some((prefix, name)) => (Some(prefix), name),
        None => (None, key),
    };

    let name_ok = !name.is_empty()
        && name.len() <= 63
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
        && name.starts_with(|c: char| c.is_ascii_alphanumeric())
        && name.ends_with(|c: char| c.is_ascii_alphanumeric());

    let prefix_ok = prefix
        .map(|p| p.len() <= 253 && p.split('.').all(is_dns_label))
        .unwrap_or(true);

    if name_ok && prefix_ok {
        Ok(())
    } else {
        Err(Error::ConfigError(format!(
            "'{}' is not a valid label key",
            key
        )))
    }
}

/// Structural check of a label selector.
///
/// The API server remains the authority; this only catches selectors that
/// can never match anything, such as empty ones or dangling commas.
fn validate_selector(selector: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(Error::ConfigError(format!(
            "invalid pod selector '{}': {}",
            selector, reason
        )))
    };

    if selector.trim().is_empty() {
        return invalid("selector is empty");
    }

    for term in split_selector_terms(selector) {
        let term = term.trim();
        if term.is_empty() {
            return invalid("empty requirement");
        }

        let key = term
            .trim_start_matches('!')
            .split(|c: char| matches!(c, '=' | '!' | '<' | '>') || c.is_whitespace())
            .next()
            .unwrap_or_default();
        if validate_label_key(key).is_err() {
            return invalid(&format!("bad key in requirement '{}'", term));
        }
    }
    Ok(())
}

/// Split on commas that are not inside a set-based `in (...)` value list
fn split_selector_terms(selector: &str) -> Vec<&str> {
    let mut terms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (i, c) in selector.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                terms.push(&selector[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    terms.push(&selector[start..]);
    terms
}
