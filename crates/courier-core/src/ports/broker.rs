use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::MessageSource;
use crate::error::CourierError;

/// A stream definition: name plus the subject patterns it captures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSpec {
    pub name: String,
    pub subjects: Vec<String>,
}

impl StreamSpec {
    pub fn new(name: impl Into<String>, subjects: Vec<String>) -> Self {
        Self {
            name: name.into(),
            subjects,
        }
    }
}

/// A named durable pull consumer with explicit acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DurableSpec {
    pub stream: String,
    pub name: String,
    /// Unacknowledged messages become redeliverable after this long.
    pub ack_wait: Duration,
    /// How long one pull waits for messages before ending empty.
    pub fetch_expiry: Duration,
}

impl DurableSpec {
    pub fn new(stream: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            stream: stream.into(),
            name: name.into(),
            ack_wait: Duration::from_secs(30),
            fetch_expiry: Duration::from_secs(5),
        }
    }

    pub fn with_ack_wait(mut self, ack_wait: Duration) -> Self {
        self.ack_wait = ack_wait;
        self
    }

    pub fn with_fetch_expiry(mut self, fetch_expiry: Duration) -> Self {
        self.fetch_expiry = fetch_expiry;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerInfo {
    pub stream: String,
    pub name: String,
    pub durable_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishAck {
    pub stream: String,
    pub sequence: u64,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Create the stream, or return quietly if it already exists.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), CourierError>;

    async fn delete_stream(&self, name: &str) -> Result<(), CourierError>;

    /// Create-or-get a durable consumer. Idempotent for an identical spec.
    async fn ensure_consumer(&self, spec: &DurableSpec)
    -> Result<Arc<dyn MessageSource>, CourierError>;

    /// Publish and wait for the broker to persist the message.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, CourierError>;
}

/// Typed helpers on top of any `Broker`.
#[async_trait]
pub trait BrokerExt: Broker {
    async fn publish_json<T>(&self, subject: &str, value: &T) -> Result<PublishAck, CourierError>
    where
        T: Serialize + Sync,
    {
        let payload = serde_json::to_vec(value).map_err(CourierError::encode)?;
        self.publish(subject, payload).await
    }
}

impl<B: Broker + ?Sized> BrokerExt for B {}
