//! Messaging substrate seam
//!
//! The bridge only needs subscribe, publish and request/reply query from the
//! substrate. Key expressions are `/`-separated chunks where `*` matches
//! exactly one chunk and `**` matches any number of chunks (including none).

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::TransportError;

/// One message delivered by the substrate
#[derive(Debug, Clone)]
pub struct TransportSample {
    /// Concrete key the message was published on
    pub key: String,
    pub payload: Vec<u8>,
}

impl TransportSample {
    pub fn new(key: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            payload: payload.into(),
        }
    }
}

/// Stream of samples for one subscription
pub type SampleStream = mpsc::UnboundedReceiver<TransportSample>;

/// A single reply to a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryReply {
    Ok(Vec<u8>),
    Err(String),
}

/// Messaging substrate
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to a key expression (wildcards allowed)
    async fn subscribe(&self, key_expr: &str) -> Result<SampleStream, TransportError>;

    /// Publish a payload on a concrete key
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Request/reply. An empty reply list means nobody answered in time.
    async fn query(
        &self,
        key_expr: &str,
        payload: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<Vec<QueryReply>, TransportError>;
}

/// Check whether `key` falls inside the key expression `expr`
pub fn key_expr_matches(expr: &str, key: &str) -> bool {
    let expr: Vec<&str> = expr.split('/').collect();
    let key: Vec<&str> = key.split('/').collect();
    chunks_match(&expr, &key)
}

fn chunks_match(expr: &[&str], key: &[&str]) -> bool {
    let Some((head, rest)) = expr.split_first() else {
        return key.is_empty();
    };

    if *head == "**" {
        if chunks_match(rest, key) {
            return true;
        }
        return !key.is_empty() && chunks_match(expr, &key[1..]);
    }

    match key.split_first() {
        Some((k, key_rest)) => (*head == "*" || head == k) && chunks_match(rest, key_rest),
        None => false,
    }
}
