//! Broker adapters.
//!
//! - `InMemoryBroker`: 開発・テスト用（server 不要）
//! - `NatsBroker`: NATS JetStream（feature `nats`）

pub mod memory;
#[cfg(feature = "nats")]
pub mod nats;

pub use self::memory::InMemoryBroker;
#[cfg(feature = "nats")]
pub use self::nats::NatsBroker;
