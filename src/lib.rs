//! mongo-labeler: replication role labels for MongoDB pods on Kubernetes
//!
//! This crate discovers the pods of a MongoDB replica set, asks each member
//! whether it is the primary, and labels every pod with its current role so
//! that Services and monitoring can select the primary or the secondaries.

pub mod config;
pub mod error;
pub mod labeler;

#[cfg(feature = "metrics")]
pub mod server;

pub use crate::config::{KubeClientOptions, LabelerConfig};
pub use crate::error::{Error, Result};
