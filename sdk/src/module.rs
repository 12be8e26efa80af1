//! Definition of a brewcast module

use crate::context::Context;
use crate::message_bus::MessageBounds;
use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use std::sync::Arc;

/// A module is constructed at registration, initialised once the process
/// starts, and told when an orderly shutdown is about to close the bus
#[async_trait]
pub trait Module<M: MessageBounds>: Send + Sync {
    /// Read configuration, register wills and start background tasks
    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()>;

    /// Called before the message bus disconnects - the last chance to publish
    async fn before_shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn get_name(&self) -> &'static str;
    fn get_description(&self) -> &'static str;
}
