// Operational alerting
//
// Alerts are stateful per topic: a sustained failure triggers once, repeats
// are de-duplicated, and the caller resets the topic when the condition
// clears. Topic strings are composed in a fixed field order so equal topics
// always compare equal regardless of builder call order.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Base topic for packets that exhausted their relay retries
pub const PACKET_RELAY_FAILURE: &str = "packet relay failure";
/// Base topic for persistence write failures
pub const STORE_WRITE_FAILURE: &str = "transaction store write failure";

/// An alert topic: a base string plus optional tunnel/chain/endpoint scopes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    base: String,
    tunnel_id: Option<u64>,
    chain_name: Option<String>,
    endpoint: Option<String>,
}

impl Topic {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.to_string(),
            tunnel_id: None,
            chain_name: None,
            endpoint: None,
        }
    }

    pub fn with_tunnel_id(mut self, tunnel_id: u64) -> Self {
        self.tunnel_id = Some(tunnel_id);
        self
    }

    pub fn with_chain_name(mut self, chain_name: &str) -> Self {
        self.chain_name = Some(chain_name.to_string());
        self
    }

    pub fn with_endpoint(mut self, endpoint: &str) -> Self {
        self.endpoint = Some(endpoint.to_string());
        self
    }
}

impl fmt::Display for Topic {
    // Fixed concatenation order: base, tunnel, chain, endpoint
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)?;
        if let Some(id) = self.tunnel_id {
            write!(f, " TUNNEL_ID-{id}")?;
        }
        if let Some(chain) = &self.chain_name {
            write!(f, " CHAIN-{chain}")?;
        }
        if let Some(endpoint) = &self.endpoint {
            write!(f, " ENDPOINT-{endpoint}")?;
        }
        Ok(())
    }
}

/// Alert transport consumed by chain providers
#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Raise (or re-raise) an alert for a topic
    async fn trigger(&self, topic: &Topic, detail: &str);

    /// Mark a topic's condition as cleared
    async fn reset(&self, topic: &Topic);
}

/// Tracing-backed sink that de-duplicates repeated triggers per topic
#[derive(Default)]
pub struct LogAlertSink {
    active: Mutex<HashSet<String>>,
}

impl LogAlertSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn trigger(&self, topic: &Topic, detail: &str) {
        let key = topic.to_string();
        let newly_raised = self.active.lock().await.insert(key.clone());
        if newly_raised {
            error!(topic = %key, detail, "alert raised");
        } else {
            debug!(topic = %key, detail, "alert still active");
        }
    }

    async fn reset(&self, topic: &Topic) {
        let key = topic.to_string();
        if self.active.lock().await.remove(&key) {
            info!(topic = %key, "alert resolved");
        }
    }
}
