//! Topic bridge
//!
//! All substrate I/O goes through here. One ingestion task exists per
//! distinct subscribed key expression; samples are buffered per concrete key
//! and handed to every registered callback.

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace};

use crate::decode::{Decoded, DecoderSet};
use crate::topic::{is_valid_pattern, is_valid_topic, TopicScope};
use crate::transport::{QueryReply, SampleStream, Transport};
use crate::{BridgeError, Result};

/// Samples kept per topic
pub const BUFFER_CAPACITY: usize = 10;

/// One received message; immutable once built
#[derive(Debug, Clone)]
pub struct TopicSample {
    /// Concrete key the sample arrived on
    pub key: String,
    pub payload: Vec<u8>,
    /// Monotonic capture instant
    pub timestamp: Instant,
    /// Wall-clock receive time, for display and capture files
    pub received_at: DateTime<Local>,
}

impl TopicSample {
    pub fn new(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            payload,
            timestamp: Instant::now(),
            received_at: Local::now(),
        }
    }
}

/// Failure reported by a sample consumer
#[derive(Error, Debug)]
#[error("{0}")]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Consumer invoked for every sample of a subscription
pub type SampleCallback = Arc<dyn Fn(&TopicSample) -> std::result::Result<(), CallbackError> + Send + Sync>;

/// Per-key ring buffers plus the subscription that feeds each key
///
/// A concrete key is appended to by exactly one ingestion task. An exact
/// topic subscription owns its key; a pattern only claims keys nobody owns.
#[derive(Default)]
struct BufferState {
    samples: HashMap<String, VecDeque<Arc<TopicSample>>>,
    owners: HashMap<String, String>,
}

type Buffers = Arc<Mutex<BufferState>>;
type Callbacks = Arc<RwLock<Vec<SampleCallback>>>;

struct Subscription {
    callbacks: Callbacks,
    task: JoinHandle<()>,
}

/// Outcome of a request/reply query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    Replies(Vec<QueryReply>),
    NoResponders,
    Failed(String),
}

impl QueryOutcome {
    /// Text of the first successful reply, if any
    pub fn first_ok(&self) -> Option<String> {
        match self {
            QueryOutcome::Replies(replies) => replies.iter().find_map(|r| match r {
                QueryReply::Ok(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
                QueryReply::Err(_) => None,
            }),
            _ => None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.first_ok().is_some()
    }
}

impl fmt::Display for QueryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryOutcome::NoResponders => f.write_str("No response (timeout or no responders)"),
            QueryOutcome::Failed(e) => write!(f, "Query failed: {e}"),
            QueryOutcome::Replies(replies) => {
                let lines: Vec<String> = replies
                    .iter()
                    .map(|r| match r {
                        QueryReply::Ok(bytes) => String::from_utf8_lossy(bytes).into_owned(),
                        QueryReply::Err(e) => format!("Error: {e}"),
                    })
                    .collect();
                f.write_str(&lines.join("\n"))
            }
        }
    }
}

/// Multiplexes topics onto bounded buffers and in-process consumers
pub struct TopicBridge {
    transport: Arc<dyn Transport>,
    scope: TopicScope,
    decoders: DecoderSet,
    query_timeout: Duration,
    subscriptions: tokio::sync::Mutex<HashMap<String, Subscription>>,
    buffers: Buffers,
}

impl TopicBridge {
    pub fn new(transport: Arc<dyn Transport>, scope: TopicScope) -> Self {
        Self {
            transport,
            scope,
            decoders: DecoderSet::default(),
            query_timeout: Duration::from_secs(5),
            subscriptions: tokio::sync::Mutex::new(HashMap::new()),
            buffers: Arc::new(Mutex::new(BufferState::default())),
        }
    }

    /// Use a decoder set built from the topic mapping
    pub fn with_decoders(mut self, decoders: DecoderSet) -> Self {
        self.decoders = decoders;
        self
    }

    /// Default wait for daemon queries
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    pub fn scope(&self) -> &TopicScope {
        &self.scope
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    /// Fully qualified key for a topic suffix
    pub fn scoped_topic(&self, suffix: &str) -> String {
        self.scope.topic(suffix)
    }

    /// Subscribe to a topic, adding `callback` to its fan-out list
    ///
    /// Idempotent: a second call for the same topic never creates another
    /// substrate subscription.
    pub async fn subscribe(&self, topic: &str, callback: Option<SampleCallback>) -> Result<String> {
        if !is_valid_topic(topic) {
            return Err(BridgeError::InvalidTopic(topic.to_string()));
        }
        let key = self.scope.qualify(topic);
        self.attach(key.clone(), callback, true).await?;
        Ok(key)
    }

    /// Subscribe to a wildcard pattern; samples buffer under their concrete key
    pub async fn subscribe_pattern(
        &self,
        pattern: &str,
        callback: Option<SampleCallback>,
    ) -> Result<String> {
        if !is_valid_pattern(pattern) {
            return Err(BridgeError::InvalidTopic(pattern.to_string()));
        }
        let key_expr = self.scope.qualify(pattern);
        self.attach(key_expr.clone(), callback, false).await?;
        Ok(key_expr)
    }

    async fn attach(&self, key_expr: String, callback: Option<SampleCallback>, exact: bool) -> Result<()> {
        let mut subscriptions = self.subscriptions.lock().await;

        if let Some(existing) = subscriptions.get(&key_expr) {
            debug!("Already subscribed to {}", key_expr);
            if let Some(cb) = callback {
                write_callbacks(&existing.callbacks).push(cb);
            }
            return Ok(());
        }

        let stream = self.transport.subscribe(&key_expr).await?;
        if exact {
            lock_buffers(&self.buffers)
                .owners
                .insert(key_expr.clone(), key_expr.clone());
        }
        let callbacks: Callbacks = Arc::new(RwLock::new(callback.into_iter().collect()));
        let task = tokio::spawn(ingest(
            key_expr.clone(),
            stream,
            self.buffers.clone(),
            callbacks.clone(),
        ));

        info!("◆ Subscribed to {}", key_expr);
        subscriptions.insert(key_expr, Subscription { callbacks, task });
        Ok(())
    }

    /// Latest sample for a topic (suffix or full key)
    pub fn get_latest(&self, topic: &str) -> Option<Arc<TopicSample>> {
        self.get_latest_by_key(&self.scope.qualify(topic))
    }

    /// Latest sample for an exact concrete key
    pub fn get_latest_by_key(&self, key: &str) -> Option<Arc<TopicSample>> {
        lock_buffers(&self.buffers)
            .samples
            .get(key)
            .and_then(|buf| buf.back().cloned())
    }

    /// Up to `n` most recent samples, oldest first
    pub fn get_recent(&self, topic: &str, n: usize) -> Vec<Arc<TopicSample>> {
        let key = self.scope.qualify(topic);
        let buffers = lock_buffers(&self.buffers);
        match buffers.samples.get(&key) {
            Some(buf) => buf.iter().skip(buf.len().saturating_sub(n)).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Keys with buffered data and their sample counts
    pub fn buffered_topics(&self) -> BTreeMap<String, usize> {
        lock_buffers(&self.buffers)
            .samples
            .iter()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(k, buf)| (k.clone(), buf.len()))
            .collect()
    }

    /// Number of live substrate subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.subscriptions.lock().await.len()
    }

    /// Publish to a topic (suffix or full key)
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<()> {
        if !is_valid_topic(topic) {
            return Err(BridgeError::InvalidTopic(topic.to_string()));
        }
        let key = self.scope.qualify(topic);
        trace!("Publishing {} bytes to {}", payload.len(), key);
        self.transport.publish(&key, payload).await?;
        Ok(())
    }

    /// Health beacon for a node
    pub async fn publish_health(&self, node: &str) -> Result<()> {
        let key = self.scope.health_key(node);
        self.transport.publish(&key, node.as_bytes().to_vec()).await?;
        Ok(())
    }

    /// Request/reply with a bounded wait; never fails
    pub async fn query(&self, key: &str, payload: Option<Vec<u8>>, timeout: Duration) -> QueryOutcome {
        let result = tokio::time::timeout(timeout, self.transport.query(key, payload, timeout)).await;
        match result {
            Err(_) => QueryOutcome::NoResponders,
            Ok(Err(e)) => QueryOutcome::Failed(e.to_string()),
            Ok(Ok(replies)) if replies.is_empty() => QueryOutcome::NoResponders,
            Ok(Ok(replies)) => QueryOutcome::Replies(replies),
        }
    }

    /// Query the fleet daemon API
    pub async fn query_daemon(&self, endpoint: &str, payload: Option<Vec<u8>>) -> QueryOutcome {
        let key = self.scope.daemon_key(endpoint);
        debug!("Daemon query {}", key);
        self.query(&key, payload, self.query_timeout).await
    }

    /// Render a sample for humans and models
    pub fn decode_sample(&self, sample: &TopicSample) -> Decoded {
        self.decoders.decode(&sample.key, &sample.payload)
    }

    /// Abort every ingestion task and forget subscriptions
    pub async fn shutdown(&self) {
        let mut subscriptions = self.subscriptions.lock().await;
        for (key, sub) in subscriptions.drain() {
            sub.task.abort();
            debug!("Dropped subscription {}", key);
        }
        lock_buffers(&self.buffers).owners.clear();
        info!("Topic bridge stopped");
    }
}

async fn ingest(key_expr: String, mut stream: SampleStream, buffers: Buffers, callbacks: Callbacks) {
    while let Some(raw) = stream.recv().await {
        let sample = Arc::new(TopicSample::new(raw.key, raw.payload));

        {
            let mut state = lock_buffers(&buffers);
            let owned = *state
                .owners
                .entry(sample.key.clone())
                .or_insert_with(|| key_expr.clone())
                == key_expr;
            if owned {
                let buf = state
                    .samples
                    .entry(sample.key.clone())
                    .or_insert_with(|| VecDeque::with_capacity(BUFFER_CAPACITY));
                if buf.len() == BUFFER_CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(sample.clone());
            }
        }

        let consumers: Vec<SampleCallback> = read_callbacks(&callbacks).clone();
        for cb in consumers {
            match catch_unwind(AssertUnwindSafe(|| cb(&sample))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Callback error on {}: {}", sample.key, e),
                Err(_) => error!("Callback panicked on {}", sample.key),
            }
        }
    }
    debug!("Sample stream for {} ended", key_expr);
}

fn lock_buffers(buffers: &Mutex<BufferState>) -> std::sync::MutexGuard<'_, BufferState> {
    buffers.lock().unwrap_or_else(|e| e.into_inner())
}

fn read_callbacks(callbacks: &RwLock<Vec<SampleCallback>>) -> std::sync::RwLockReadGuard<'_, Vec<SampleCallback>> {
    callbacks.read().unwrap_or_else(|e| e.into_inner())
}

fn write_callbacks(callbacks: &RwLock<Vec<SampleCallback>>) -> std::sync::RwLockWriteGuard<'_, Vec<SampleCallback>> {
    callbacks.write().unwrap_or_else(|e| e.into_inner())
}
