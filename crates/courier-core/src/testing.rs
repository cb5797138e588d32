//! Test doubles shared by the unit tests.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::time::Instant;

use crate::config::ConfigError;
use crate::domain::Message;
use crate::error::CourierError;
use crate::ports::{ConsumerInfo, Delivery, DeliveryStream, MessageSource, Processor};

/// Shared record of which sequences were acknowledged.
#[derive(Clone, Default)]
pub(crate) struct AckLog {
    acked: Arc<Mutex<Vec<u64>>>,
    reject: Arc<Mutex<HashSet<u64>>>,
}

impl AckLog {
    pub(crate) fn acked(&self) -> Vec<u64> {
        self.acked.lock().unwrap().clone()
    }

    pub(crate) fn reject(&self, sequence: u64) {
        self.reject.lock().unwrap().insert(sequence);
    }

    pub(crate) fn delivery(&self, sequence: u64) -> Box<dyn Delivery> {
        Box::new(StubDelivery {
            message: Message::new(sequence, "orders.new", sequence.to_string().into_bytes()),
            log: self.clone(),
        })
    }
}

struct StubDelivery {
    message: Message,
    log: AckLog,
}

#[async_trait]
impl Delivery for StubDelivery {
    fn message(&self) -> &Message {
        &self.message
    }

    async fn ack(self: Box<Self>) -> Result<(), CourierError> {
        if self.log.reject.lock().unwrap().contains(&self.message.sequence) {
            return Err(CourierError::ack("handle expired"));
        }
        self.log.acked.lock().unwrap().push(self.message.sequence);
        Ok(())
    }
}

pub(crate) enum Script {
    /// Messages available to pulls; a pull takes at most its `max_messages`
    /// and leaves the rest for the next one.
    Batch(Vec<u64>),
    /// Transient broker fault.
    Fail,
    /// Non-retryable fault.
    Fatal,
}

/// A source that replays a script of poll cycles, then returns empty cycles
/// immediately.
pub(crate) struct ScriptedSource {
    info: ConsumerInfo,
    script: Mutex<VecDeque<Script>>,
    log: AckLog,
    pulls: Mutex<Vec<(Instant, usize)>>,
}

impl ScriptedSource {
    pub(crate) fn new(script: Vec<Script>, log: AckLog) -> Self {
        Self {
            info: ConsumerInfo {
                stream: "ORDERS".to_string(),
                name: "scripted".to_string(),
                durable_name: Some("scripted".to_string()),
            },
            script: Mutex::new(script.into()),
            log,
            pulls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn pull_times(&self) -> Vec<Instant> {
        self.pulls.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    /// `max_messages` of every pull, in order.
    pub(crate) fn requested(&self) -> Vec<usize> {
        self.pulls.lock().unwrap().iter().map(|(_, max)| *max).collect()
    }
}

#[async_trait]
impl MessageSource for ScriptedSource {
    fn info(&self) -> &ConsumerInfo {
        &self.info
    }

    async fn pull(&self, max_messages: usize) -> Result<DeliveryStream, CourierError> {
        self.pulls.lock().unwrap().push((Instant::now(), max_messages));
        let mut script = self.script.lock().unwrap();
        match script.pop_front() {
            Some(Script::Fail) => Err(CourierError::stream("broker unavailable")),
            Some(Script::Fatal) => Err(CourierError::Config(ConfigError::InvalidValue {
                key: "consumer".to_string(),
                details: "durable consumer was deleted".to_string(),
            })),
            Some(Script::Batch(mut seqs)) => {
                if seqs.len() > max_messages {
                    script.push_front(Script::Batch(seqs.split_off(max_messages)));
                }
                let items: Vec<Result<Box<dyn Delivery>, CourierError>> =
                    seqs.into_iter().map(|s| Ok(self.log.delivery(s))).collect();
                Ok(futures::stream::iter(items).boxed())
            }
            None => Ok(futures::stream::empty().boxed()),
        }
    }
}

/// Sleeps for a fixed time, fails on chosen sequences, records timing and
/// concurrency.
#[derive(Clone, Default)]
pub(crate) struct RecordingProcessor {
    pub(crate) delay: Duration,
    failing: Arc<Mutex<HashSet<u64>>>,
    panicking: Arc<Mutex<HashSet<u64>>>,
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    started: Arc<Mutex<Vec<(u64, Instant)>>>,
    finished: Arc<Mutex<Vec<(u64, Instant)>>>,
}

impl RecordingProcessor {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub(crate) fn fail_on(self, sequence: u64) -> Self {
        self.failing.lock().unwrap().insert(sequence);
        self
    }

    pub(crate) fn panic_on(self, sequence: u64) -> Self {
        self.panicking.lock().unwrap().insert(sequence);
        self
    }

    pub(crate) fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub(crate) fn started(&self) -> Vec<(u64, Instant)> {
        self.started.lock().unwrap().clone()
    }

    pub(crate) fn finished(&self) -> Vec<(u64, Instant)> {
        self.finished.lock().unwrap().clone()
    }
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, message: &Message) -> Result<(), CourierError> {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push((message.sequence, Instant::now()));

        tokio::time::sleep(self.delay).await;

        self.current.fetch_sub(1, Ordering::SeqCst);
        self.finished.lock().unwrap().push((message.sequence, Instant::now()));

        if self.panicking.lock().unwrap().contains(&message.sequence) {
            panic!("processor panicked on {}", message.sequence);
        }
        if self.failing.lock().unwrap().contains(&message.sequence) {
            return Err(CourierError::processing(format!("rejected {}", message.sequence)));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}
