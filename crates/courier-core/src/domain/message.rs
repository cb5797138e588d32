//! Message - a received payload plus the broker metadata needed to log it.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CourierError;

/// A message as seen by application code.
///
/// The acknowledgement handle is not part of the message; it lives in the
/// `Delivery` that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Stream sequence assigned by the broker.
    pub sequence: u64,
    pub subject: String,
    pub payload: Vec<u8>,
    /// 1 on first delivery, incremented on every redelivery.
    pub delivered: u32,
    pub published_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(sequence: u64, subject: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            sequence,
            subject: subject.into(),
            payload: payload.into(),
            delivered: 1,
            published_at: None,
        }
    }

    pub fn with_delivered(mut self, delivered: u32) -> Self {
        self.delivered = delivered;
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = Some(at);
        self
    }

    pub fn is_redelivery(&self) -> bool {
        self.delivered > 1
    }

    /// Decode the payload as JSON.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, CourierError> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
