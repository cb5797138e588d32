use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;

use super::ConsumerInfo;
use crate::domain::Message;
use crate::error::CourierError;

/// One poll cycle worth of deliveries. The stream ends when the pull expires.
pub type DeliveryStream = BoxStream<'static, Result<Box<dyn Delivery>, CourierError>>;

/// A received message. The holder owns the right to acknowledge it.
///
/// `ack` consumes the handle, so a delivery is acknowledged at most once.
/// Dropping it without acking leaves the message to broker redelivery.
#[async_trait]
pub trait Delivery: Send + Sync {
    fn message(&self) -> &Message;

    async fn ack(self: Box<Self>) -> Result<(), CourierError>;
}

/// A durable consumer. The broker owns the cursor; this side only pulls and
/// (through `Delivery`) acknowledges.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn info(&self) -> &ConsumerInfo;

    /// Start one poll cycle for up to `max_messages` deliveries.
    ///
    /// Errors here (and items that resolve to `Err`) are broker faults; a
    /// fresh pull may be issued once this one has finished or failed.
    async fn pull(&self, max_messages: usize) -> Result<DeliveryStream, CourierError>;

    /// Fetch a single message, waiting at most one fetch expiry.
    async fn next(&self) -> Result<Option<Box<dyn Delivery>>, CourierError> {
        let mut batch = self.pull(1).await?;
        batch.next().await.transpose()
    }
}
