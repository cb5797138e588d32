//! Typed processing - JSON payload を T にデコードして Handler<T> に渡す
//!
//! `JsonProcessor<T, H>` erases the payload type so a typed handler can be
//! plugged in wherever a `Processor` is expected.

use std::marker::PhantomData;

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::domain::Message;
use crate::error::CourierError;
use crate::ports::Processor;

/// Handles one decoded value.
///
/// ```ignore
/// struct PrintOrder;
///
/// #[async_trait]
/// impl Handler<Order> for PrintOrder {
///     async fn handle(&self, subject: &str, order: Order) -> Result<(), CourierError> {
///         tracing::info!(subject, id = order.id, "order");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T>: Send + Sync {
    async fn handle(&self, subject: &str, value: T) -> Result<(), CourierError>;
}

pub struct JsonProcessor<T, H> {
    handler: H,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T, H> JsonProcessor<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            name: std::any::type_name::<T>().to_string(),
            _marker: PhantomData,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

#[async_trait]
impl<T, H> Processor for JsonProcessor<T, H>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    async fn process(&self, message: &Message) -> Result<(), CourierError> {
        let value: T = message
            .decode()
            .map_err(|e| CourierError::processing(format!("json decode: {e}")))?;
        self.handler.handle(&message.subject, value).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
