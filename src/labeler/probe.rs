//! Replication role probing over the MongoDB wire protocol
//!
//! Each probe opens a fresh direct connection to one member, asks it whether
//! it is the writable primary, and drops the connection. Any failure maps to
//! [`Role::Unknown`] so the caller never has to handle a probe error.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mongodb::bson::{doc, Document};
use mongodb::options::{ClientOptions, ServerAddress};
use mongodb::Client;
use tracing::{debug, error};

use super::member::{ClusterMember, Endpoint};
use crate::error::{Error, Result};

/// Application name reported to the server in the connection handshake
const APP_NAME: &str = "mongo-labeler";

/// Replication role of one member as seen by a single probe
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Leader,
    Follower,
    /// The probe failed; the member's role is not known this cycle
    Unknown,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Leader => "leader",
            Role::Follower => "follower",
            Role::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of probing one member
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleObservation {
    pub member: ClusterMember,
    pub role: Role,
}

/// Determines the replication role of a database endpoint
#[async_trait]
pub trait RoleProber: Send + Sync {
    /// Probe `endpoint`; failures are reported as [`Role::Unknown`]
    async fn probe(&self, endpoint: &Endpoint) -> Role;
}

/// Probes members with the official MongoDB driver
#[derive(Clone, Debug)]
pub struct MongoProber {
    timeout: Duration,
}

impl MongoProber {
    /// `timeout` bounds the whole probe: connect, server selection and command
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn client_options(&self, endpoint: &Endpoint) -> ClientOptions {
        let mut options = ClientOptions::default();
        options.hosts = vec![ServerAddress::Tcp {
            host: endpoint.host.clone(),
            port: Some(endpoint.port),
        }];
        // Talk to this member only; never route the command to the primary.
        options.direct_connection = Some(true);
        options.connect_timeout = Some(self.timeout);
        options.server_selection_timeout = Some(self.timeout);
        options.app_name = Some(APP_NAME.to_string());
        options
    }

    async fn query_status(&self, endpoint: &Endpoint) -> Result<Document> {
        let client = Client::with_options(self.client_options(endpoint))?;
        let reply = client
            .database("admin")
            .run_command(doc! { "isMaster": 1 }, None)
            .await?;
        Ok(reply)
    }

    async fn try_probe(&self, endpoint: &Endpoint) -> Result<Role> {
        debug!("Checking whether {} is primary or secondary", endpoint);

        let reply = tokio::time::timeout(self.timeout, self.query_status(endpoint))
            .await
            .map_err(|_| Error::Probe {
                endpoint: endpoint.to_string(),
                message: format!("no reply within {:?}", self.timeout),
            })??;

        role_from_reply(&reply).ok_or_else(|| Error::Probe {
            endpoint: endpoint.to_string(),
            message: "reply carries neither isWritablePrimary nor ismaster".to_string(),
        })
    }
}

#[async_trait]
impl RoleProber for MongoProber {
    async fn probe(&self, endpoint: &Endpoint) -> Role {
        match self.try_probe(endpoint).await {
            Ok(role) => role,
            Err(e) => {
                error!("Server {} not available: {}", endpoint, e);
                Role::Unknown
            }
        }
    }
}

/// Interpret an `isMaster`/`hello` reply.
///
/// Modern servers answer with `isWritablePrimary`, legacy ones with
/// `ismaster`. `None` means the reply is not a valid status document.
pub fn role_from_reply(reply: &Document) -> Option<Role> {
    let is_primary = reply
        .get_bool("isWritablePrimary")
        .or_else(|_| reply.get_bool("ismaster"))
        .ok()?;

    Some(if is_primary {
        Role::Leader
    } else {
        Role::Follower
    })
}
