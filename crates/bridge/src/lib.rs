//! Topic bridge for NodeWarden
//!
//! Owns every subscription to the messaging substrate, keeps a bounded buffer
//! of recent samples per topic and fans samples out to in-process consumers.

use thiserror::Error;

pub mod bridge;
pub mod decode;
pub mod local;
pub mod topic;
pub mod transport;

pub use bridge::{CallbackError, QueryOutcome, SampleCallback, TopicBridge, TopicSample, BUFFER_CAPACITY};
pub use decode::{Decoded, DecoderSet, ProtoWireDecoder, SchemaDecoder};
pub use local::LocalTransport;
pub use topic::{is_valid_pattern, is_valid_topic, TopicScope};
pub use transport::{key_expr_matches, QueryReply, SampleStream, Transport, TransportSample};

/// Substrate failures
#[derive(Error, Debug, Clone)]
pub enum TransportError {
    #[error("transport closed")]
    Closed,

    #[error("subscribe failed: {0}")]
    Subscribe(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("query failed: {0}")]
    Query(String),
}

/// Bridge errors
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("invalid topic name: {0}")]
    InvalidTopic(String),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
