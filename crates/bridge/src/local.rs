//! In-process messaging substrate
//!
//! Routes publishes to matching subscribers and queries to matching
//! queryables without leaving the process. Used for self-contained
//! deployments and for tests.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::transport::{key_expr_matches, QueryReply, SampleStream, Transport, TransportSample};
use crate::TransportError;

/// Responder for a queryable key expression: (queried key, payload) -> reply
pub type QueryHandler = Arc<dyn Fn(&str, Option<&[u8]>) -> QueryReply + Send + Sync>;

#[derive(Default)]
struct LocalState {
    subscribers: Vec<(String, mpsc::UnboundedSender<TransportSample>)>,
    queryables: Vec<(String, QueryHandler)>,
    subscribe_calls: usize,
}

/// In-process transport
#[derive(Default)]
pub struct LocalTransport {
    state: Mutex<LocalState>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer queries whose key intersects `key_expr`
    pub fn declare_queryable<F>(&self, key_expr: impl Into<String>, handler: F)
    where
        F: Fn(&str, Option<&[u8]>) -> QueryReply + Send + Sync + 'static,
    {
        let key_expr = key_expr.into();
        debug!("Declared queryable {}", key_expr);
        self.lock().queryables.push((key_expr, Arc::new(handler)));
    }

    /// Number of subscribe calls received so far
    pub fn subscribe_calls(&self) -> usize {
        self.lock().subscribe_calls
    }

    /// Number of subscribers still attached
    pub fn live_subscribers(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|(_, tx)| !tx.is_closed());
        state.subscribers.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn subscribe(&self, key_expr: &str) -> Result<SampleStream, TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.subscribe_calls += 1;
        state.subscribers.push((key_expr.to_string(), tx));
        Ok(rx)
    }

    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut state = self.lock();
        trace!("Local publish on {} ({} bytes)", key, payload.len());
        state.subscribers.retain(|(expr, tx)| {
            if !key_expr_matches(expr, key) {
                return !tx.is_closed();
            }
            tx.send(TransportSample::new(key, payload.clone())).is_ok()
        });
        Ok(())
    }

    async fn query(
        &self,
        key_expr: &str,
        payload: Option<Vec<u8>>,
        _timeout: Duration,
    ) -> Result<Vec<QueryReply>, TransportError> {
        let handlers: Vec<QueryHandler> = self
            .lock()
            .queryables
            .iter()
            .filter(|(expr, _)| key_expr_matches(expr, key_expr) || key_expr_matches(key_expr, expr))
            .map(|(_, handler)| handler.clone())
            .collect();

        Ok(handlers
            .iter()
            .map(|handler| handler(key_expr, payload.as_deref()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_matching_subscribers_only() {
        let transport = LocalTransport::new();
        let mut all = transport.subscribe("fleet/**").await.unwrap();
        let mut metrics = transport.subscribe("fleet/a/metrics").await.unwrap();

        transport
            .publish("fleet/a/metrics", b"1".to_vec())
            .await
            .unwrap();
        transport.publish("fleet/a/logs", b"2".to_vec()).await.unwrap();

        assert_eq!(all.recv().await.unwrap().key, "fleet/a/metrics");
        assert_eq!(all.recv().await.unwrap().key, "fleet/a/logs");
        assert_eq!(metrics.recv().await.unwrap().payload, b"1".to_vec());
        assert!(metrics.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dropped_subscribers_are_pruned() {
        let transport = LocalTransport::new();
        let rx = transport.subscribe("a/b").await.unwrap();
        assert_eq!(transport.live_subscribers(), 1);

        drop(rx);
        transport.publish("a/b", vec![0]).await.unwrap();
        assert_eq!(transport.live_subscribers(), 0);
        assert_eq!(transport.subscribe_calls(), 1);
    }

    #[tokio::test]
    async fn test_query_routes_to_queryables() {
        let transport = LocalTransport::new();
        transport.declare_queryable("daemon/api/**", |key, _| {
            QueryReply::Ok(format!("answer for {key}").into_bytes())
        });

        let replies = transport
            .query("daemon/api/nodes", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(
            replies,
            vec![QueryReply::Ok(b"answer for daemon/api/nodes".to_vec())]
        );

        let none = transport
            .query("other/key", None, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
