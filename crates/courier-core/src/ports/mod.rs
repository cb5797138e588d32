//! Ports - broker abstractions.
//!
//! The core never talks to a broker directly. It sees three seams:
//! - `Broker`: stream/consumer administration and publishing
//! - `MessageSource`: one durable consumer, pulled in poll cycles
//! - `Delivery`: one received message plus the right to acknowledge it
//!
//! Adapters live in `impls`.

pub mod broker;
pub mod processor;
pub mod source;

pub use self::broker::{Broker, BrokerExt, ConsumerInfo, DurableSpec, PublishAck, StreamSpec};
pub use self::processor::Processor;
pub use self::source::{Delivery, DeliveryStream, MessageSource};
