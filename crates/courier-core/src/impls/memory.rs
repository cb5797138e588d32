//! InMemoryBroker - 開発・テスト用の broker
//!
//! # 実装詳細
//! - stream ごとにメッセージを保持し、sequence は stream 単位で 1 から採番
//! - durable consumer は cursor（未配送の先頭）と pending（未 ack）を持つ
//! - pending は ack_wait を過ぎると再配送対象になり、古い handle の ack は失敗する
//! - pull は fetch_expiry まで publish を待つ（`Notify`）
//! - publish は subject が一致する最初の stream に入る（`*` / `>` のみ）

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::Message;
use crate::error::CourierError;
use crate::ports::{
    Broker, ConsumerInfo, Delivery, DeliveryStream, DurableSpec, MessageSource, PublishAck,
    StreamSpec,
};

/// NATS-style subject match: `*` is one token, a trailing `>` is one or more.
pub fn subject_matches(pattern: &str, subject: &str) -> bool {
    let mut pattern = pattern.split('.');
    let mut subject = subject.split('.');
    loop {
        match (pattern.next(), subject.next()) {
            (Some(">"), Some(_)) => return pattern.next().is_none(),
            (Some("*"), Some(token)) => {
                if token.is_empty() {
                    return false;
                }
            }
            (Some(p), Some(s)) => {
                if p != s {
                    return false;
                }
            }
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct Stored {
    sequence: u64,
    subject: String,
    payload: Vec<u8>,
    published_at: DateTime<Utc>,
}

struct Pending {
    /// Changes on every (re)delivery; stale handles no longer match.
    token: u64,
    delivered_at: Instant,
    deliveries: u32,
}

struct ConsumerState {
    spec: DurableSpec,
    /// Index of the first message never delivered to this consumer.
    cursor: usize,
    pending: BTreeMap<u64, Pending>,
    acked: BTreeSet<u64>,
}

impl ConsumerState {
    fn new(spec: DurableSpec) -> Self {
        Self {
            spec,
            cursor: 0,
            pending: BTreeMap::new(),
            acked: BTreeSet::new(),
        }
    }

    /// Earliest moment a pending message becomes redeliverable.
    fn next_redelivery(&self) -> Option<Instant> {
        self.pending
            .values()
            .map(|p| p.delivered_at + self.spec.ack_wait)
            .min()
    }
}

struct StreamState {
    spec: StreamSpec,
    messages: Vec<Stored>,
    next_sequence: u64,
    consumers: HashMap<String, ConsumerState>,
}

impl StreamState {
    fn new(spec: StreamSpec) -> Self {
        Self {
            spec,
            messages: Vec::new(),
            next_sequence: 1,
            consumers: HashMap::new(),
        }
    }

    fn captures(&self, subject: &str) -> bool {
        self.spec.subjects.iter().any(|p| subject_matches(p, subject))
    }
}

#[derive(Default)]
struct BrokerState {
    /// Creation order matters for routing.
    streams: Vec<StreamState>,
    next_token: u64,
}

impl BrokerState {
    fn stream(&self, name: &str) -> Option<&StreamState> {
        self.streams.iter().find(|s| s.spec.name == name)
    }

    fn stream_mut(&mut self, name: &str) -> Option<&mut StreamState> {
        self.streams.iter_mut().find(|s| s.spec.name == name)
    }

    /// Hand out up to `max` messages: expired pending first, then new ones.
    fn take_batch(
        &mut self,
        stream: &str,
        consumer: &str,
        max: usize,
    ) -> Result<Vec<(Message, u64)>, CourierError> {
        let now = Instant::now();
        let mut token = self.next_token;
        let stream_state = self
            .streams
            .iter_mut()
            .find(|s| s.spec.name == stream)
            .ok_or_else(|| CourierError::stream(format!("stream {stream} not found")))?;
        let state = stream_state
            .consumers
            .get_mut(consumer)
            .ok_or_else(|| CourierError::stream(format!("consumer {consumer} not found")))?;

        let ack_wait = state.spec.ack_wait;
        let mut batch = Vec::new();

        let expired: Vec<u64> = state
            .pending
            .iter()
            .filter(|(_, p)| p.delivered_at + ack_wait <= now)
            .map(|(seq, _)| *seq)
            .take(max)
            .collect();
        for sequence in expired {
            let Ok(index) = stream_state.messages.binary_search_by_key(&sequence, |m| m.sequence) else {
                continue;
            };
            let Some(pending) = state.pending.get_mut(&sequence) else {
                continue;
            };
            let stored = &stream_state.messages[index];
            token += 1;
            pending.token = token;
            pending.delivered_at = now;
            pending.deliveries += 1;
            batch.push((to_message(stored, pending.deliveries), token));
        }

        while batch.len() < max && state.cursor < stream_state.messages.len() {
            let stored = &stream_state.messages[state.cursor];
            state.cursor += 1;
            token += 1;
            state.pending.insert(
                stored.sequence,
                Pending {
                    token,
                    delivered_at: now,
                    deliveries: 1,
                },
            );
            batch.push((to_message(stored, 1), token));
        }

        self.next_token = token;
        Ok(batch)
    }

    /// Earliest point at which a pull on this consumer could find work that
    /// is not a fresh publish.
    fn next_redelivery(&self, stream: &str, consumer: &str) -> Option<Instant> {
        self.stream(stream)?.consumers.get(consumer)?.next_redelivery()
    }
}

fn to_message(stored: &Stored, delivered: u32) -> Message {
    Message::new(stored.sequence, stored.subject.clone(), stored.payload.clone())
        .with_delivered(delivered)
        .with_published_at(stored.published_at)
}

struct Shared {
    state: Mutex<BrokerState>,
    notify: Notify,
    fail_pulls: AtomicU32,
}

/// In-process broker with durable pull consumers and explicit ack.
///
/// Cloning shares the same state.
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::default()),
                notify: Notify::new(),
                fail_pulls: AtomicU32::new(0),
            }),
        }
    }

    /// Make the next `n` pulls (on any consumer) fail with a stream error.
    pub fn fail_next_pulls(&self, n: u32) {
        self.shared.fail_pulls.store(n, Ordering::SeqCst);
    }

    /// Messages in the stream this consumer has not acknowledged yet.
    pub async fn pending_count(&self, stream: &str, consumer: &str) -> usize {
        let state = self.shared.state.lock().await;
        let Some(stream) = state.stream(stream) else {
            return 0;
        };
        let acked = stream.consumers.get(consumer).map_or(0, |c| c.acked.len());
        stream.messages.len().saturating_sub(acked)
    }

    pub async fn acked_sequences(&self, stream: &str, consumer: &str) -> Vec<u64> {
        let state = self.shared.state.lock().await;
        state
            .stream(stream)
            .and_then(|s| s.consumers.get(consumer))
            .map(|c| c.acked.iter().copied().collect())
            .unwrap_or_default()
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<(), CourierError> {
        let mut state = self.shared.state.lock().await;
        if state.stream(&spec.name).is_some() {
            debug!(stream = %spec.name, "stream already exists");
            return Ok(());
        }
        state.streams.push(StreamState::new(spec.clone()));
        info!(stream = %spec.name, subjects = ?spec.subjects, "stream created");
        Ok(())
    }

    async fn delete_stream(&self, name: &str) -> Result<(), CourierError> {
        let mut state = self.shared.state.lock().await;
        let before = state.streams.len();
        state.streams.retain(|s| s.spec.name != name);
        if state.streams.len() == before {
            return Err(CourierError::stream(format!("stream {name} not found")));
        }
        info!(stream = %name, "stream deleted");
        Ok(())
    }

    async fn ensure_consumer(
        &self,
        spec: &DurableSpec,
    ) -> Result<Arc<dyn MessageSource>, CourierError> {
        let mut state = self.shared.state.lock().await;
        let stream = state
            .stream_mut(&spec.stream)
            .ok_or_else(|| CourierError::stream(format!("stream {} not found", spec.stream)))?;

        if stream.consumers.contains_key(&spec.name) {
            debug!(stream = %spec.stream, consumer = %spec.name, "durable consumer already exists");
        } else {
            stream
                .consumers
                .insert(spec.name.clone(), ConsumerState::new(spec.clone()));
            info!(stream = %spec.stream, consumer = %spec.name, "durable consumer created");
        }
        let spec = stream.consumers[&spec.name].spec.clone();

        Ok(Arc::new(InMemorySource {
            shared: Arc::clone(&self.shared),
            info: ConsumerInfo {
                stream: spec.stream.clone(),
                name: spec.name.clone(),
                durable_name: Some(spec.name.clone()),
            },
            fetch_expiry: spec.fetch_expiry,
        }))
    }

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<PublishAck, CourierError> {
        let mut state = self.shared.state.lock().await;
        let stream = state
            .streams
            .iter_mut()
            .find(|s| s.captures(subject))
            .ok_or_else(|| CourierError::publish(format!("no stream captures subject {subject}")))?;

        let sequence = stream.next_sequence;
        stream.next_sequence += 1;
        stream.messages.push(Stored {
            sequence,
            subject: subject.to_string(),
            payload,
            published_at: Utc::now(),
        });
        let ack = PublishAck {
            stream: stream.spec.name.clone(),
            sequence,
        };
        drop(state);

        self.shared.notify.notify_waiters();
        debug!(stream = %ack.stream, sequence, subject, "message published");
        Ok(ack)
    }
}

struct InMemorySource {
    shared: Arc<Shared>,
    info: ConsumerInfo,
    fetch_expiry: Duration,
}

impl InMemorySource {
    fn take_injected_failure(&self) -> bool {
        self.shared
            .fail_pulls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl MessageSource for InMemorySource {
    fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    async fn pull(&self, max_messages: usize) -> Result<DeliveryStream, CourierError> {
        if max_messages == 0 {
            return Err(CourierError::stream("pull needs max_messages >= 1"));
        }
        if self.take_injected_failure() {
            warn!(consumer = %self.info.name, "injected pull failure");
            return Err(CourierError::stream("injected pull failure"));
        }

        let expires_at = Instant::now() + self.fetch_expiry;
        loop {
            // Register before checking so a publish in between is not missed.
            let published = self.shared.notify.notified();
            tokio::pin!(published);
            published.as_mut().enable();

            let (batch, redelivery) = {
                let mut state = self.shared.state.lock().await;
                let batch = state.take_batch(&self.info.stream, &self.info.name, max_messages)?;
                let redelivery = state.next_redelivery(&self.info.stream, &self.info.name);
                (batch, redelivery)
            };

            let now = Instant::now();
            if !batch.is_empty() || now >= expires_at {
                let items: Vec<Result<Box<dyn Delivery>, CourierError>> = batch
                    .into_iter()
                    .map(|(message, token)| {
                        Ok(Box::new(InMemoryDelivery {
                            shared: Arc::clone(&self.shared),
                            stream: self.info.stream.clone(),
                            consumer: self.info.name.clone(),
                            message,
                            token,
                        }) as Box<dyn Delivery>)
                    })
                    .collect();
                return Ok(futures::stream::iter(items).boxed());
            }

            let wake_at = redelivery.map_or(expires_at, |at| at.min(expires_at));
            tokio::select! {
                _ = &mut published => {}
                _ = tokio::time::sleep_until(wake_at) => {}
            }
        }
    }
}

struct InMemoryDelivery {
    shared: Arc<Shared>,
    stream: String,
    consumer: String,
    message: Message,
    token: u64,
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), CourierError> {
        let sequence = self.message.sequence;
        let mut state = self.shared.state.lock().await;
        let consumer = state
            .stream_mut(&self.stream)
            .and_then(|s| s.consumers.get_mut(&self.consumer))
            .ok_or_else(|| CourierError::ack(format!("consumer {} is gone", self.consumer)))?;

        let ack_wait = consumer.spec.ack_wait;
        match consumer.pending.get(&sequence) {
            Some(p) if p.token == self.token && Instant::now() < p.delivered_at + ack_wait => {
                consumer.pending.remove(&sequence);
                consumer.acked.insert(sequence);
                debug!(sequence, consumer = %self.consumer, "acknowledged");
                Ok(())
            }
            Some(p) if p.token == self.token => Err(CourierError::ack(format!(
                "ack wait elapsed for sequence {sequence}"
            ))),
            _ => Err(CourierError::ack(format!(
                "handle for sequence {sequence} is no longer valid"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Dispatcher;
    use crate::config::DispatchConfig;
    use crate::ports::BrokerExt;
    use crate::testing::RecordingProcessor;
    use rstest::rstest;

    async fn broker_with_stream() -> InMemoryBroker {
        let broker = InMemoryBroker::new();
        broker
            .ensure_stream(&StreamSpec::new("ORDERS", vec!["orders.>".to_string()]))
            .await
            .unwrap();
        broker
    }

    fn durable() -> DurableSpec {
        DurableSpec::new("ORDERS", "durable_processor")
            .with_ack_wait(Duration::from_secs(30))
            .with_fetch_expiry(Duration::from_secs(5))
    }

    async fn collect(stream: DeliveryStream) -> Vec<Box<dyn Delivery>> {
        stream.map(|item| item.unwrap()).collect().await
    }

    #[rstest]
    #[case("orders.>", "orders.new", true)]
    #[case("orders.>", "orders.eu.new", true)]
    #[case("orders.>", "orders", false)]
    #[case("orders.*", "orders.new", true)]
    #[case("orders.*", "orders.eu.new", false)]
    #[case("orders.*.new", "orders.eu.new", true)]
    #[case("orders.new", "orders.new", true)]
    #[case("orders.new", "orders.old", false)]
    #[case("payments.>", "orders.new", false)]
    fn subject_matching(#[case] pattern: &str, #[case] subject: &str, #[case] expected: bool) {
        assert_eq!(subject_matches(pattern, subject), expected);
    }

    #[tokio::test]
    async fn publish_assigns_increasing_sequences() {
        let broker = broker_with_stream().await;

        let first = broker.publish("orders.new", b"a".to_vec()).await.unwrap();
        let second = broker.publish_json("orders.new", &serde_json::json!({"id": 2})).await.unwrap();

        assert_eq!(first, PublishAck { stream: "ORDERS".into(), sequence: 1 });
        assert_eq!(second.sequence, 2);
    }

    #[tokio::test]
    async fn unserializable_payload_is_an_encode_error() {
        let broker = broker_with_stream().await;
        let keyed_by_tuple: BTreeMap<(u8, u8), u8> = BTreeMap::from([((1, 2), 3)]);

        let err = broker.publish_json("orders.new", &keyed_by_tuple).await.unwrap_err();

        assert!(matches!(err, CourierError::Encode(_)));
        assert_eq!(broker.pending_count("ORDERS", "durable_processor").await, 0);
    }

    #[tokio::test]
    async fn publish_without_a_matching_stream_fails() {
        let broker = broker_with_stream().await;
        let err = broker.publish("payments.new", b"x".to_vec()).await.unwrap_err();
        assert!(matches!(err, CourierError::Publish(_)));
    }

    #[tokio::test]
    async fn ensure_is_idempotent_and_consumers_share_the_cursor() {
        let broker = broker_with_stream().await;
        broker
            .ensure_stream(&StreamSpec::new("ORDERS", vec!["orders.>".to_string()]))
            .await
            .unwrap();
        for i in 0..3 {
            broker.publish("orders.new", vec![i]).await.unwrap();
        }

        let a = broker.ensure_consumer(&durable()).await.unwrap();
        assert_eq!(a.info().durable_name.as_deref(), Some("durable_processor"));
        let first = a.next().await.unwrap().unwrap();
        assert_eq!(first.message().sequence, 1);

        let b = broker.ensure_consumer(&durable()).await.unwrap();
        let rest = collect(b.pull(10).await.unwrap()).await;
        let seqs: Vec<u64> = rest.iter().map(|d| d.message().sequence).collect();
        assert_eq!(seqs, vec![2, 3]);
    }

    #[tokio::test]
    async fn consumer_on_missing_stream_fails() {
        let broker = InMemoryBroker::new();
        assert!(matches!(
            broker.ensure_consumer(&durable()).await,
            Err(CourierError::Stream(_))
        ));
    }

    #[tokio::test]
    async fn pull_is_bounded_and_ack_is_recorded() {
        let broker = broker_with_stream().await;
        for i in 0..12u8 {
            broker.publish("orders.new", vec![i]).await.unwrap();
        }
        let source = broker.ensure_consumer(&durable()).await.unwrap();

        let batch = collect(source.pull(10).await.unwrap()).await;
        assert_eq!(batch.len(), 10);
        assert!(batch.iter().all(|d| d.message().published_at.is_some()));

        for delivery in batch.into_iter().take(4) {
            delivery.ack().await.unwrap();
        }
        assert_eq!(broker.acked_sequences("ORDERS", "durable_processor").await, vec![1, 2, 3, 4]);
        assert_eq!(broker.pending_count("ORDERS", "durable_processor").await, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_pull_ends_after_the_fetch_expiry() {
        let broker = broker_with_stream().await;
        let source = broker.ensure_consumer(&durable()).await.unwrap();

        let started = Instant::now();
        let batch = collect(source.pull(10).await.unwrap()).await;

        assert!(batch.is_empty());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(5) && waited < Duration::from_millis(5_100), "{waited:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn waiting_pull_wakes_on_publish() {
        let broker = broker_with_stream().await;
        let source = broker.ensure_consumer(&durable()).await.unwrap();

        let publisher = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            publisher.publish("orders.new", b"late".to_vec()).await.unwrap();
        });

        let started = Instant::now();
        let delivery = source.next().await.unwrap().unwrap();

        assert_eq!(delivery.message().payload, b"late");
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn unacked_message_is_redelivered_after_ack_wait() {
        let broker = broker_with_stream().await;
        broker.publish("orders.new", b"x".to_vec()).await.unwrap();
        let source = broker
            .ensure_consumer(&durable().with_ack_wait(Duration::from_secs(3)))
            .await
            .unwrap();

        let stale = source.next().await.unwrap().unwrap();
        assert_eq!(stale.message().delivered, 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        let again = source.next().await.unwrap().unwrap();
        assert_eq!(again.message().sequence, 1);
        assert!(again.message().is_redelivery());

        assert!(matches!(stale.ack().await, Err(CourierError::Ack(_))));
        again.ack().await.unwrap();
        assert_eq!(broker.pending_count("ORDERS", "durable_processor").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn ack_after_the_wait_elapsed_is_rejected() {
        let broker = broker_with_stream().await;
        broker.publish("orders.new", b"x".to_vec()).await.unwrap();
        let source = broker
            .ensure_consumer(&durable().with_ack_wait(Duration::from_secs(1)))
            .await
            .unwrap();

        let delivery = source.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(matches!(delivery.ack().await, Err(CourierError::Ack(_))));
        assert!(broker.acked_sequences("ORDERS", "durable_processor").await.is_empty());
    }

    #[tokio::test]
    async fn injected_failures_then_recovery() {
        let broker = broker_with_stream().await;
        broker.publish("orders.new", b"x".to_vec()).await.unwrap();
        let source = broker.ensure_consumer(&durable()).await.unwrap();
        broker.fail_next_pulls(2);

        assert!(matches!(source.pull(10).await, Err(CourierError::Stream(_))));
        assert!(matches!(source.pull(10).await, Err(CourierError::Stream(_))));
        assert_eq!(collect(source.pull(10).await.unwrap()).await.len(), 1);
    }

    #[tokio::test]
    async fn deleted_stream_fails_pulls() {
        let broker = broker_with_stream().await;
        let source = broker.ensure_consumer(&durable()).await.unwrap();

        broker.delete_stream("ORDERS").await.unwrap();

        assert!(matches!(source.pull(1).await, Err(CourierError::Stream(_))));
        assert!(broker.delete_stream("ORDERS").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn dispatcher_processes_everything_in_waves() {
        let broker = broker_with_stream().await;
        for i in 1..=5u8 {
            broker.publish("orders.new", vec![i]).await.unwrap();
        }
        let source = broker.ensure_consumer(&durable()).await.unwrap();
        let processor = RecordingProcessor::with_delay(Duration::from_secs(3));
        let dispatcher = Dispatcher::new(
            source,
            Arc::new(processor.clone()),
            DispatchConfig::default().with_max_in_flight(3),
        )
        .unwrap();

        let counts = dispatcher.run_for(Duration::from_secs(10)).await.unwrap();

        assert_eq!(counts.received, 5);
        assert_eq!(counts.acked, 5);
        assert_eq!(processor.peak(), 3);
        assert_eq!(broker.acked_sequences("ORDERS", "durable_processor").await, vec![1, 2, 3, 4, 5]);
        assert_eq!(broker.pending_count("ORDERS", "durable_processor").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_sized_pull_is_rejected() {
        let broker = broker_with_stream().await;
        broker.publish("orders.new", b"x".to_vec()).await.unwrap();
        let source = broker
            .ensure_consumer(&durable().with_ack_wait(Duration::from_secs(1)))
            .await
            .unwrap();
        let _stale = source.next().await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;

        let started = Instant::now();
        assert!(matches!(source.pull(0).await, Err(CourierError::Stream(_))));
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn backlog_larger_than_capacity_is_acked_exactly_once() {
        let broker = broker_with_stream().await;
        for i in 0..20u8 {
            broker.publish("orders.new", vec![i]).await.unwrap();
        }
        // Seven waves of 3s each; a message pulled ahead of its slot would
        // outlive this ack wait.
        let source = broker
            .ensure_consumer(&durable().with_ack_wait(Duration::from_secs(10)))
            .await
            .unwrap();
        let processor = RecordingProcessor::with_delay(Duration::from_secs(3));
        let dispatcher = Dispatcher::new(
            source,
            Arc::new(processor.clone()),
            DispatchConfig::default().with_max_in_flight(3),
        )
        .unwrap();

        let counts = dispatcher.run_for(Duration::from_secs(30)).await.unwrap();

        assert_eq!(counts.received, 20);
        assert_eq!(counts.acked, 20);
        assert_eq!(counts.ack_failed, 0);
        assert_eq!(processor.started().len(), 20);
        assert_eq!(broker.pending_count("ORDERS", "durable_processor").await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_a_waiting_pull() {
        let broker = broker_with_stream().await;
        let source = broker.ensure_consumer(&durable()).await.unwrap();
        let dispatcher = Dispatcher::new(
            source,
            Arc::new(RecordingProcessor::default()),
            DispatchConfig::default(),
        )
        .unwrap();
        let started = Instant::now();

        let counts = dispatcher.run_for(Duration::from_secs(2)).await.unwrap();

        let took = started.elapsed();
        assert!(took >= Duration::from_secs(2) && took < Duration::from_millis(2_100), "{took:?}");
        assert_eq!(counts.polls, 1);
        assert_eq!(counts.empty_polls, 0);
    }
}
