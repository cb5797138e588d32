//! Domain model.

pub mod message;

pub use self::message::Message;
