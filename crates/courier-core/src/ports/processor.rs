use async_trait::async_trait;

use crate::domain::Message;
use crate::error::CourierError;

/// Application logic run once per admitted message.
///
/// `Ok` leads to an acknowledgement; `Err` leaves the message unacknowledged
/// so the broker redelivers it after its ack wait.
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, message: &Message) -> Result<(), CourierError>;

    /// Name used in log output.
    fn name(&self) -> &str {
        "processor"
    }
}
