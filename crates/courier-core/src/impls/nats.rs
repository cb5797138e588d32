//! NATS JetStream adapter.

use std::sync::Arc;
use std::time::Duration;

use async_nats::jetstream::{self, Context};
use async_nats::jetstream::consumer::{AckPolicy, Consumer, pull};
use async_nats::jetstream::stream::Config as StreamConfig;
use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::domain::Message;
use crate::error::CourierError;
use crate::ports::{
    Broker, ConsumerInfo, Delivery, DeliveryStream, DurableSpec, MessageSource, PublishAck,
    StreamSpec,
};

pub struct NatsBroker {
    jetstream: Context,
}

impl NatsBroker {
    /// Connect to the server(s) in `url` (comma separated).
    pub async fn connect(url: &str) -> Result<Self, CourierError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| CourierError::connection(format!("{url}: {e}")))?;
        info!(url, "connected to NATS");
        Ok(Self {
            jetstream: jetstream::new(client),
        })
    }
}

#[async_trait]
impl Broker for NatsBroker {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), CourierError> {
        let mut stream = self
            .jetstream
            .get_or_create_stream(StreamConfig {
                name: spec.name.clone(),
                subjects: spec.subjects.clone(),
                ..Default::default()
            })
            .await
            .map_err(CourierError::stream)?;

        match stream.info().await {
            Ok(info) => info!(
                stream = %spec.name,
                subjects = ?spec.subjects,
                messages = info.state.messages,
                "stream ready"
            ),
            Err(e) => warn!(stream = %spec.name, error = %e, "stream ready; info unavailable"),
        }
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), CourierError> {
        self.jetstream
            .delete_stream(name)
            .await
            .map_err(CourierError::stream)?;
        info!(stream = %name, "stream deleted");
        Ok(())
    }

    async fn ensure_consumer(
        &self,
        spec: &DurableSpec,
    ) -> Result<Arc<dyn MessageSource>, CourierError> {
        let stream = self
            .jetstream
            .get_stream(&spec.stream)
            .await
            .map_err(CourierError::stream)?;

        let consumer: Consumer<pull::Config> = stream
            .get_or_create_consumer(
                &spec.name,
                pull::Config {
                    durable_name: Some(spec.name.clone()),
                    name: Some(spec.name.clone()),
                    ack_policy: AckPolicy::Explicit,
                    ack_wait: spec.ack_wait,
                    ..Default::default()
                },
            )
            .await
            .map_err(CourierError::stream)?;

        let cached = consumer.cached_info();
        let info = ConsumerInfo {
            stream: spec.stream.clone(),
            name: cached.name.clone(),
            durable_name: cached.config.durable_name.clone(),
        };
        info!(
            stream = %info.stream,
            consumer = %info.name,
            durable = ?info.durable_name,
            "durable consumer ready"
        );

        Ok(Arc::new(NatsSource {
            consumer,
            info,
            fetch_expiry: spec.fetch_expiry,
        }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, CourierError> {
        let ack = self
            .jetstream
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(CourierError::publish)?
            .await
            .map_err(CourierError::publish)?;

        debug!(stream = %ack.stream, sequence = ack.sequence, subject, "message published");
        Ok(PublishAck {
            stream: ack.stream,
            sequence: ack.sequence,
        })
    }
}

struct NatsSource {
    consumer: Consumer<pull::Config>,
    info: ConsumerInfo,
    fetch_expiry: Duration,
}

#[async_trait]
impl MessageSource for NatsSource {
    fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    async fn pull(&self, max_messages: usize) -> Result<DeliveryStream, CourierError> {
        let batch = self
            .consumer
            .fetch()
            .max_messages(max_messages)
            .expires(self.fetch_expiry)
            .messages()
            .await
            .map_err(CourierError::stream)?;

        Ok(batch
            .map(|item| {
                let msg = item.map_err(CourierError::stream)?;
                Ok(Box::new(NatsDelivery::new(msg)) as Box<dyn Delivery>)
            })
            .boxed())
    }
}

struct NatsDelivery {
    message: Message,
    inner: jetstream::Message,
}

impl NatsDelivery {
    fn new(inner: jetstream::Message) -> Self {
        let subject = inner.subject.to_string();
        let payload = inner.payload.to_vec();
        let message = match inner.info() {
            Ok(meta) => {
                let published = meta.published;
                let mut message = Message::new(meta.stream_sequence, subject, payload)
                    .with_delivered(u32::try_from(meta.delivered).unwrap_or(1));
                if let Some(at) =
                    DateTime::from_timestamp(published.unix_timestamp(), published.nanosecond())
                {
                    message = message.with_published_at(at);
                }
                message
            }
            Err(e) => {
                warn!(error = %e, "message metadata unavailable");
                Message::new(0, subject, payload)
            }
        };
        Self { message, inner }
    }
}

#[async_trait]
impl Delivery for NatsDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), CourierError> {
        self.inner.ack().await.map_err(CourierError::ack)
    }
}
