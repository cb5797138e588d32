//! Processing task - 1 メッセージ分の処理単位
//!
//! Flow:
//! 1. the dispatch loop reserves an admission slot and hands it over
//! 2. run the processor
//! 3. success -> ack / failure -> leave unacknowledged for redelivery
//! 4. release the slot (the guard drops on every path, panics and aborts included)

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::Slot;
use crate::observability::ConsumerStats;
use crate::ports::{Delivery, Processor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Acked,
    /// Processed, but the broker rejected the ack; it will redeliver.
    AckFailed,
    /// Processor returned an error; not acknowledged.
    Failed,
}

/// Everything a processing task needs besides its delivery.
#[derive(Clone)]
pub struct TaskContext {
    pub processor: Arc<dyn Processor>,
    pub stats: Arc<ConsumerStats>,
}

/// Decrements the in-flight counter however the task exits.
struct InFlight<'a>(&'a ConsumerStats);

impl<'a> InFlight<'a> {
    fn enter(stats: &'a ConsumerStats) -> Self {
        stats.start_processing();
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.finish_processing();
    }
}

/// Process one admitted delivery. `slot` is held until the task ends.
pub async fn process_delivery(delivery: Box<dyn Delivery>, slot: Slot, ctx: TaskContext) -> TaskOutcome {
    let sequence = delivery.message().sequence;

    let outcome = {
        let _in_flight = InFlight::enter(&ctx.stats);
        debug!(sequence, processor = ctx.processor.name(), "processing started");

        let result = ctx.processor.process(delivery.message()).await;
        match result {
            Ok(()) => match delivery.ack().await {
                Ok(()) => {
                    ctx.stats.acked();
                    info!(sequence, "processing finished; acknowledged");
                    TaskOutcome::Acked
                }
                Err(e) => {
                    ctx.stats.ack_failed();
                    warn!(sequence, error = %e, "ack failed; broker will redeliver");
                    TaskOutcome::AckFailed
                }
            },
            Err(e) => {
                ctx.stats.failed();
                warn!(sequence, error = %e, "processing failed; not acknowledged");
                TaskOutcome::Failed
            }
        }
    };

    slot.release();
    outcome
}
