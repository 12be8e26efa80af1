//! Generic MessageBus trait for a publish-only event bus
use futures::future::{BoxFuture, ready};
use anyhow::Result;
use std::sync::Arc;
use tracing::warn;

/// Message bounds trait (awaiting trait aliases)
pub trait MessageBounds: Send + Sync + Clone + Default +
    serde::Serialize + 'static {}
impl<T: Send + Sync + Clone + Default + serde::Serialize + 'static> MessageBounds for T {}

/// Per-publish delivery flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishOptions {
    /// Ask the broker to keep this as the last value for late subscribers
    pub retain: bool,

    /// Propagate delivery errors to the caller. When false they are logged
    /// and swallowed.
    pub err: bool,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self { retain: false, err: true }
    }
}

impl PublishOptions {
    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn err(mut self, err: bool) -> Self {
        self.err = err;
        self
    }
}

/// Generic MessageBus trait
pub trait MessageBus<M: MessageBounds>: Send + Sync {

    /// Hand a message to the transport - note async but not defined as such
    /// because this is used dynamically
    fn deliver(&self, topic: &str, message: Arc<M>, options: PublishOptions)
               -> BoxFuture<'static, Result<()>>;

    /// Publish a message, honouring the error tolerance in `options`
    fn publish(&self, topic: &str, message: Arc<M>, options: PublishOptions)
               -> BoxFuture<'static, Result<()>> {
        let delivery = self.deliver(topic, message, options);
        if options.err {
            return delivery;
        }

        let topic = topic.to_string();
        Box::pin(async move {
            if let Err(e) = delivery.await {
                warn!("Publish to {topic} failed: {e}");
            }
            Ok(())
        })
    }

    /// Register the message the transport publishes on our behalf if the
    /// connection is lost without an orderly shutdown
    fn set_will(&self, topic: &str, message: Arc<M>) -> BoxFuture<'static, Result<()>>;

    /// Connect - called once all modules have initialised
    fn start(&self) -> BoxFuture<'static, Result<()>> {
        Box::pin(ready(Ok(())))
    }

    /// Shut down
    fn shutdown(&self) -> BoxFuture<'static, Result<()>>;
}
