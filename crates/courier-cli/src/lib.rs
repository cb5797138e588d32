//! courier-cli - publisher / subscriber / walkthrough の共通部分
//!
//! 設定は環境変数のみ（`AppConfig::from_env`）。`COURIER_BROKER=memory` なら
//! server なしで InMemoryBroker を使う。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{info, warn};

use courier_core::app::StopSignal;
use courier_core::config::{AppConfig, BrokerBackend};
use courier_core::impls::InMemoryBroker;
use courier_core::observability::{ConsumerCounts, init_tracing};
use courier_core::ports::{Broker, BrokerExt, ConsumerInfo, MessageSource, PublishAck, Processor};
use courier_core::typed::{Handler, JsonProcessor};
use courier_core::{CourierError, Dispatcher};

pub const ORDER_SUBJECT: &str = "orders.new";

/// Walkthrough の consume 時間（`COURIER_SESSION_SECS` がなければ）
pub const WALKTHROUGH_SESSION: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: u32,
    pub description: String,
}

impl Order {
    pub fn new(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }
}

pub fn sample_orders(first_id: u32) -> Vec<Order> {
    ["Laptop", "Mouse", "Keyboard"]
        .into_iter()
        .zip(first_id..)
        .map(|(item, id)| Order::new(id, item))
        .collect()
}

/// Stand-in for real work: log the order, then sleep a fixed time.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    delay: Duration,
}

impl SimulatedWork {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Handler<Order> for SimulatedWork {
    async fn handle(&self, subject: &str, order: Order) -> Result<(), CourierError> {
        info!(subject, id = order.id, description = %order.description, "processing order");
        tokio::time::sleep(self.delay).await;
        info!(id = order.id, "order done");
        Ok(())
    }
}

pub fn order_processor(delay: Duration) -> Arc<dyn Processor> {
    Arc::new(JsonProcessor::new(SimulatedWork::new(delay)).named("orders"))
}

/// Read the environment and install logging. Every binary starts here.
pub fn bootstrap() -> Result<AppConfig, CourierError> {
    init_tracing();
    let config = AppConfig::from_env()?;
    info!(backend = ?config.backend, url = %config.broker.url, stream = %config.broker.stream, "configuration loaded");
    Ok(config)
}

pub async fn connect(config: &AppConfig) -> Result<Arc<dyn Broker>, CourierError> {
    match config.backend {
        BrokerBackend::Nats => nats_broker(&config.broker.url).await,
        BrokerBackend::Memory => {
            info!("using in-memory broker");
            Ok(Arc::new(InMemoryBroker::new()))
        }
    }
}

#[cfg(feature = "nats")]
async fn nats_broker(url: &str) -> Result<Arc<dyn Broker>, CourierError> {
    let broker = courier_core::impls::NatsBroker::connect(url).await?;
    Ok(Arc::new(broker))
}

#[cfg(not(feature = "nats"))]
async fn nats_broker(url: &str) -> Result<Arc<dyn Broker>, CourierError> {
    Err(CourierError::connection(format!(
        "{url}: built without the nats feature; set COURIER_BROKER=memory"
    )))
}

/// Flips to true on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("ctrl-c received; shutting down"),
            Err(e) => warn!(error = %e, "cannot listen for ctrl-c; shutting down"),
        }
        let _ = tx.send(true);
    });
    rx
}

pub async fn publish_orders(
    broker: &dyn Broker,
    orders: &[Order],
) -> Result<Vec<PublishAck>, CourierError> {
    let mut acks = Vec::with_capacity(orders.len());
    for order in orders {
        let ack = broker.publish_json(ORDER_SUBJECT, order).await?;
        info!(id = order.id, stream = %ack.stream, sequence = ack.sequence, "order published");
        acks.push(ack);
    }
    Ok(acks)
}

/// Pretty JSON for end-of-run reports.
pub fn render_json<T: Serialize>(value: &T) -> Result<String, CourierError> {
    serde_json::to_string_pretty(value).map_err(CourierError::encode)
}

pub fn print_consumer(info: &ConsumerInfo) {
    println!(
        "consumer: name={} durable={} stream={}",
        info.name,
        info.durable_name.as_deref().unwrap_or("-"),
        info.stream
    );
}

/// Create stream and durable consumer, then consume until `stop` fires.
pub async fn run_subscriber(
    broker: &dyn Broker,
    config: &AppConfig,
    stop: StopSignal,
) -> Result<ConsumerCounts, CourierError> {
    broker.ensure_stream(&config.broker.stream_spec()).await?;
    let source = broker.ensure_consumer(&config.broker.durable_spec()).await?;
    print_consumer(source.info());

    let dispatcher = Dispatcher::new(
        source,
        order_processor(config.processing_delay),
        config.dispatch.clone(),
    )?;
    dispatcher.run_with(stop).await
}

/// Subscriber stop condition: Ctrl-C, plus the session deadline if set.
pub fn subscriber_stop(config: &AppConfig, shutdown: watch::Receiver<bool>) -> StopSignal {
    let stop = StopSignal::never().with_shutdown(shutdown);
    match config.session {
        Some(session) => stop.with_deadline(Instant::now() + session),
        None => stop,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalkthroughReport {
    pub published: usize,
    pub single: Option<u64>,
    pub batch: Vec<u64>,
    pub session: ConsumerCounts,
}

/// stream → consumer → publish → next → batch fetch → bounded consume → delete
pub async fn walkthrough(
    broker: &dyn Broker,
    config: &AppConfig,
) -> Result<WalkthroughReport, CourierError> {
    let mut report = WalkthroughReport::default();
    let stream = config.broker.stream_spec();

    broker.ensure_stream(&stream).await?;
    let source = broker.ensure_consumer(&config.broker.durable_spec()).await?;
    print_consumer(source.info());

    report.published += publish_orders(broker, &sample_orders(1)).await?.len();

    if let Some(delivery) = source.next().await? {
        let order: Order = delivery.message().decode()?;
        info!(sequence = delivery.message().sequence, id = order.id, "fetched single message");
        report.single = Some(delivery.message().sequence);
        delivery.ack().await?;
    }

    report.batch = fetch_batch(source.as_ref(), 10).await?;

    // Second wave for the bounded session to work through.
    report.published += publish_orders(broker, &sample_orders(4)).await?.len();

    let dispatcher = Dispatcher::new(
        Arc::clone(&source),
        order_processor(config.processing_delay),
        config.dispatch.clone(),
    )?;
    report.session = dispatcher
        .run_for(config.session.unwrap_or(WALKTHROUGH_SESSION))
        .await?;

    broker.delete_stream(&stream.name).await?;
    Ok(report)
}

async fn fetch_batch(source: &dyn MessageSource, max: usize) -> Result<Vec<u64>, CourierError> {
    let mut batch = source.pull(max).await?;
    let mut sequences = Vec::new();
    while let Some(item) = batch.next().await {
        let delivery = item?;
        let sequence = delivery.message().sequence;
        info!(sequence, subject = %delivery.message().subject, "fetched in batch");
        delivery.ack().await?;
        sequences.push(sequence);
    }
    info!(count = sequences.len(), "batch fetch finished");
    Ok(sequences)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_config() -> AppConfig {
        AppConfig::from_lookup(|key| match key {
            "COURIER_BROKER" => Some("memory".to_string()),
            "COURIER_PROCESSING_DELAY_MS" => Some("3000".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn orders_use_the_wire_field_names() {
        let json = serde_json::to_value(Order::new(1, "Laptop")).unwrap();
        assert_eq!(json, serde_json::json!({"id": 1, "description": "Laptop"}));
    }

    #[test]
    fn reports_render_and_failures_are_encode_errors() {
        let rendered = render_json(&ConsumerCounts::default()).unwrap();
        assert!(rendered.contains("\"acked\": 0"));

        let keyed_by_tuple = std::collections::BTreeMap::from([((1u8, 2u8), 3u8)]);
        assert!(matches!(render_json(&keyed_by_tuple), Err(CourierError::Encode(_))));
    }

    #[test]
    fn sample_orders_are_numbered_from_the_first_id() {
        let ids: Vec<u32> = sample_orders(4).iter().map(|o| o.id).collect();
        assert_eq!(ids, vec![4, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn walkthrough_runs_against_the_memory_broker() {
        let config = memory_config();
        let broker = connect(&config).await.unwrap();

        let report = walkthrough(broker.as_ref(), &config).await.unwrap();

        assert_eq!(report.published, 6);
        assert_eq!(report.single, Some(1));
        assert_eq!(report.batch, vec![2, 3]);
        assert_eq!(report.session.received, 3);
        assert_eq!(report.session.acked, 3);
        assert!(report.session.peak_in_flight <= config.dispatch.max_in_flight);
        assert!(broker.delete_stream(&config.broker.stream).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn subscriber_consumes_until_the_session_ends() {
        let mut config = memory_config();
        config.session = Some(Duration::from_secs(8));
        let broker = connect(&config).await.unwrap();
        broker.ensure_stream(&config.broker.stream_spec()).await.unwrap();
        publish_orders(broker.as_ref(), &sample_orders(1)).await.unwrap();

        let (_tx, rx) = watch::channel(false);
        let counts = run_subscriber(broker.as_ref(), &config, subscriber_stop(&config, rx))
            .await
            .unwrap();

        assert_eq!(counts.acked, 3);
        assert_eq!(counts.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_order_is_a_processing_failure() {
        let config = memory_config();
        let broker = connect(&config).await.unwrap();
        broker.ensure_stream(&config.broker.stream_spec()).await.unwrap();
        broker.publish(ORDER_SUBJECT, b"not an order".to_vec()).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            let _ = tx.send(true);
        });
        let counts = run_subscriber(broker.as_ref(), &config, StopSignal::never().with_shutdown(rx))
            .await
            .unwrap();
        stopper.await.unwrap();

        assert_eq!(counts.received, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.acked, 0);
    }
}
