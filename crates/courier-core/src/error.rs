use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum CourierError {
    /// Broker unreachable or connection dropped.
    #[error("connection error: {0}")]
    Connection(String),

    /// Pull-time broker fault.
    #[error("stream error: {0}")]
    Stream(String),

    /// Application logic failed while processing a message.
    #[error("processing error: {0}")]
    Processing(String),

    /// Acknowledge rejected (expired or already acknowledged handle).
    #[error("ack error: {0}")]
    Ack(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// A value could not be serialized (outgoing payload or report).
    #[error("encode error: {0}")]
    Encode(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("giving up after {failures} consecutive pull failures: {last}")]
    RetriesExhausted { failures: u32, last: String },

    #[error("admission gate closed")]
    GateClosed,
}

impl CourierError {
    pub fn connection(msg: impl std::fmt::Display) -> Self {
        Self::Connection(msg.to_string())
    }

    pub fn stream(msg: impl std::fmt::Display) -> Self {
        Self::Stream(msg.to_string())
    }

    pub fn processing(msg: impl std::fmt::Display) -> Self {
        Self::Processing(msg.to_string())
    }

    pub fn ack(msg: impl std::fmt::Display) -> Self {
        Self::Ack(msg.to_string())
    }

    pub fn publish(msg: impl std::fmt::Display) -> Self {
        Self::Publish(msg.to_string())
    }

    pub fn encode(msg: impl std::fmt::Display) -> Self {
        Self::Encode(msg.to_string())
    }

    /// Transient errors degrade to retry-with-backoff; everything else is
    /// either handled locally (processing, ack) or fatal (config).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Stream(_) | Self::Ack(_))
    }
}
