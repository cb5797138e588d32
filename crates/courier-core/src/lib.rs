//! courier-core
//!
//! Bounded-concurrency durable consumer.
//!
//! # モジュール構成
//! - **domain**: `Message`
//! - **ports**: broker の抽象（`Broker`, `MessageSource`, `Delivery`, `Processor`）
//! - **app**: 消費ループ（`Dispatcher`, `AdmissionGate`, `BackoffPolicy`）
//! - **typed**: JSON payload 用の `Handler<T>` / `JsonProcessor`
//! - **impls**: adapter（`InMemoryBroker`, `NatsBroker`）
//! - **config** / **observability** / **error**: 設定・ログ・エラー

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

#[cfg(test)]
pub(crate) mod testing;

pub use app::{AdmissionGate, BackoffPolicy, Dispatcher, StopSignal};
pub use config::{AppConfig, BrokerBackend, BrokerConfig, ConfigError, DispatchConfig};
pub use domain::Message;
pub use error::CourierError;
pub use observability::{ConsumerCounts, ConsumerStats};
pub use ports::{Broker, BrokerExt, Delivery, MessageSource, Processor};
