//! Labeler module for MongoDB replica set pods
//! This module contains pod discovery, role probing, label patching,
//! and the reconciliation loop that ties them together.

pub mod discovery;
pub mod labels;
pub mod member;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod probe;
mod reconciler;
pub mod scheduler;

pub use discovery::{KubeDiscoverer, MemberDiscoverer};
pub use labels::{KubeLabelReconciler, LabelPatch, LabelReconciler, UnknownRolePolicy};
pub use member::{ClusterMember, Endpoint, PodIdentity};
pub use probe::{MongoProber, Role, RoleObservation, RoleProber};
pub use reconciler::{CycleReport, Labeler, ShutdownSignal};
pub use scheduler::{SleepTicker, Ticker};
