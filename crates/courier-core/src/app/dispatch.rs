//! Dispatcher - (gate) → pull → spawn → process → ack
//!
//! The loop owns the decision to keep polling. Before each pull it reserves
//! at least one admission slot, then asks for no more messages than it holds
//! slots, so a delivered message never waits for capacity while its ack wait
//! runs. It never waits for a processing task to finish; every spawned task
//! is tracked in a `JoinSet` so shutdown can drain (or, past `drain_timeout`,
//! abort) in-flight work.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::task::{TaskContext, TaskOutcome, process_delivery};
use super::{AdmissionGate, Backoff, Slot};
use crate::config::DispatchConfig;
use crate::error::CourierError;
use crate::observability::{ConsumerCounts, ConsumerStats};
use crate::ports::{MessageSource, Processor};

/// When the loop should stop issuing pulls.
///
/// Dropping the shutdown sender counts as a stop request.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    shutdown: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl StopSignal {
    /// Never stops on its own.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn is_stopped(&self) -> bool {
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return true;
        }
        match &self.shutdown {
            Some(rx) => *rx.borrow() || rx.has_changed().is_err(),
            None => false,
        }
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&mut self) {
        let deadline = self.deadline;
        let shutdown = self.shutdown.as_mut();

        let at_deadline = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };
        let on_shutdown = async move {
            match shutdown {
                Some(rx) => {
                    let _ = rx.wait_for(|stop| *stop).await;
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = at_deadline => {}
            _ = on_shutdown => {}
        }
    }

    /// Sleep for `d` unless a stop arrives first.
    async fn pause(&mut self, d: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(d) => {}
            _ = self.stopped() => {}
        }
    }
}

/// Bounded-concurrency consumer over one durable `MessageSource`.
pub struct Dispatcher {
    source: Arc<dyn MessageSource>,
    processor: Arc<dyn Processor>,
    gate: AdmissionGate,
    config: DispatchConfig,
    stats: Arc<ConsumerStats>,
}

impl Dispatcher {
    pub fn new(
        source: Arc<dyn MessageSource>,
        processor: Arc<dyn Processor>,
        config: DispatchConfig,
    ) -> Result<Self, CourierError> {
        config.validate()?;
        let gate = AdmissionGate::new(config.max_in_flight)?;
        Ok(Self {
            source,
            processor,
            gate,
            config,
            stats: Arc::new(ConsumerStats::new()),
        })
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    /// Consume until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<ConsumerCounts, CourierError> {
        self.run_with(StopSignal::never().with_shutdown(shutdown)).await
    }

    /// Bounded session: stop pulling after `duration`.
    pub async fn run_for(&self, duration: Duration) -> Result<ConsumerCounts, CourierError> {
        self.run_until(Instant::now() + duration).await
    }

    pub async fn run_until(&self, deadline: Instant) -> Result<ConsumerCounts, CourierError> {
        self.run_with(StopSignal::never().with_deadline(deadline)).await
    }

    /// Main loop. Returns the counters once in-flight work has drained.
    ///
    /// Only an exhausted failure budget (see `BackoffPolicy`) ends the loop
    /// with an error; every other broker fault is retried.
    pub async fn run_with(&self, mut stop: StopSignal) -> Result<ConsumerCounts, CourierError> {
        let info = self.source.info();
        info!(
            stream = %info.stream,
            consumer = %info.name,
            processor = self.processor.name(),
            max_in_flight = self.config.max_in_flight,
            pull_batch = self.config.pull_batch,
            "consumer started"
        );

        let mut in_flight: JoinSet<TaskOutcome> = JoinSet::new();
        let mut backoff = Backoff::new(self.config.error_backoff.clone());

        let result = loop {
            if stop.is_stopped() {
                info!("stop requested; no further pulls");
                break Ok(());
            }
            self.reap(&mut in_flight);

            let reserved = tokio::select! {
                reserved = self.reserve_slots() => reserved,
                _ = stop.stopped() => continue,
            };
            let slots = match reserved {
                Ok(slots) => slots,
                Err(e) => {
                    info!(error = %e, "admission gate closed; no further pulls");
                    break Ok(());
                }
            };

            self.stats.poll();
            debug!(
                requested = slots.len(),
                outstanding = self.gate.outstanding(),
                tasks = in_flight.len(),
                "poll start"
            );

            let cycle = tokio::select! {
                cycle = self.poll_cycle(slots, &mut in_flight) => cycle,
                _ = stop.stopped() => continue,
            };

            match cycle {
                Ok(received) => {
                    let recovered = backoff.on_success();
                    if recovered > 0 {
                        info!(after_failures = recovered, "broker pulls recovered");
                    }
                    if received == 0 {
                        self.stats.empty_poll();
                        debug!(idle_ms = self.config.idle_interval.as_millis() as u64, "no messages; idling");
                        stop.pause(self.config.idle_interval).await;
                    } else {
                        debug!(received, "poll cycle finished");
                    }
                }
                Err(e) if !e.is_transient() => {
                    self.stats.pull_error();
                    error!(error = %e, "pull failed with a non-retryable error; stopping");
                    break Err(e);
                }
                Err(e) => {
                    self.stats.pull_error();
                    match backoff.on_failure() {
                        Some(delay) => {
                            warn!(
                                error = %e,
                                consecutive_failures = backoff.consecutive_failures(),
                                delay_ms = delay.as_millis() as u64,
                                "pull failed; backing off"
                            );
                            stop.pause(delay).await;
                        }
                        None => {
                            error!(
                                error = %e,
                                consecutive_failures = backoff.consecutive_failures(),
                                "pull failure budget exhausted; stopping"
                            );
                            break Err(CourierError::RetriesExhausted {
                                failures: backoff.consecutive_failures(),
                                last: e.to_string(),
                            });
                        }
                    }
                }
            }
        };

        self.drain(&mut in_flight).await;

        let counts = self.stats.snapshot();
        info!(
            received = counts.received,
            acked = counts.acked,
            failed = counts.failed,
            ack_failed = counts.ack_failed,
            pull_errors = counts.pull_errors,
            "consumer stopped"
        );
        result.map(|()| counts)
    }

    /// Wait for one free slot, then take whatever else is free right now,
    /// up to `pull_batch`.
    async fn reserve_slots(&self) -> Result<Vec<Slot>, CourierError> {
        let mut slots = vec![self.gate.acquire().await?];
        while slots.len() < self.config.pull_batch {
            match self.gate.try_acquire() {
                Some(slot) => slots.push(slot),
                None => break,
            }
        }
        Ok(slots)
    }

    /// One pull sized to the reserved slots: spawn a task per delivery,
    /// return how many arrived. Unused slots go back to the gate.
    async fn poll_cycle(
        &self,
        slots: Vec<Slot>,
        in_flight: &mut JoinSet<TaskOutcome>,
    ) -> Result<usize, CourierError> {
        let mut batch = self.source.pull(slots.len()).await?;
        let mut slots = slots.into_iter();
        let mut received = 0;

        while let Some(item) = batch.next().await {
            let delivery = item?;
            let Some(slot) = slots.next() else {
                warn!(
                    sequence = delivery.message().sequence,
                    "source delivered more than requested; leaving message for redelivery"
                );
                break;
            };
            received += 1;
            self.stats.received();

            let message = delivery.message();
            debug!(
                sequence = message.sequence,
                subject = %message.subject,
                delivered = message.delivered,
                "message received"
            );
            let span = info_span!("message", sequence = message.sequence, subject = %message.subject);
            in_flight.spawn(process_delivery(delivery, slot, self.task_context()).instrument(span));
        }

        Ok(received)
    }

    fn task_context(&self) -> TaskContext {
        TaskContext {
            processor: Arc::clone(&self.processor),
            stats: Arc::clone(&self.stats),
        }
    }

    fn reap(&self, in_flight: &mut JoinSet<TaskOutcome>) {
        while let Some(joined) = in_flight.try_join_next() {
            self.observe(joined);
        }
    }

    fn observe(&self, joined: Result<TaskOutcome, JoinError>) {
        match joined {
            Ok(_) => {}
            Err(e) if e.is_panic() => {
                self.stats.panicked();
                error!(error = %e, "processing task panicked; message left unacknowledged");
            }
            Err(e) => {
                self.stats.abandoned();
                debug!(error = %e, "processing task cancelled");
            }
        }
    }

    async fn drain(&self, in_flight: &mut JoinSet<TaskOutcome>) {
        if in_flight.is_empty() {
            return;
        }
        info!(remaining = in_flight.len(), "draining in-flight messages");

        let Some(limit) = self.config.drain_timeout else {
            while let Some(joined) = in_flight.join_next().await {
                self.observe(joined);
            }
            return;
        };

        let wait_all = async {
            while let Some(joined) = in_flight.join_next().await {
                self.observe(joined);
            }
        };
        let timed_out = tokio::time::timeout(limit, wait_all).await.is_err();

        if timed_out {
            warn!(remaining = in_flight.len(), "drain timed out; aborting remaining tasks");
            in_flight.abort_all();
            while let Some(joined) = in_flight.join_next().await {
                self.observe(joined);
            }
        }
    }
}
