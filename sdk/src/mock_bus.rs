//! Mock message bus for tests
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use futures::future::BoxFuture;
use anyhow::{Result, anyhow};
use tokio::sync::Mutex;
use tracing::debug;
use crate::message_bus::{MessageBus, MessageBounds, PublishOptions};

pub struct PublishRecord<M: MessageBounds> {
    pub topic: String,
    pub message: Arc<M>,
    pub options: PublishOptions,
}

pub struct WillRecord<M: MessageBounds> {
    pub topic: String,
    pub message: Arc<M>,
}

pub struct MockBus<M: MessageBounds> {
    pub publishes: Arc<Mutex<Vec<PublishRecord<M>>>>,
    pub wills: Arc<Mutex<Vec<WillRecord<M>>>>,
    pub starts: Arc<Mutex<u16>>,
    pub shutdowns: Arc<Mutex<u16>>,           // just count them
    fail: Arc<AtomicBool>,
}

impl<M: MessageBounds> MockBus<M> {
    pub fn new() -> Self {
        Self {
            publishes: Arc::new(Mutex::new(Vec::new())),
            wills: Arc::new(Mutex::new(Vec::new())),
            starts: Arc::new(Mutex::new(0)),
            shutdowns: Arc::new(Mutex::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every following delivery fail, as a dropped connection would
    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Topics published so far, in order
    pub async fn published_topics(&self) -> Vec<String> {
        self.publishes.lock().await
            .iter()
            .map(|p| p.topic.clone())
            .collect()
    }
}

impl<M: MessageBounds> Default for MockBus<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: MessageBounds> MessageBus<M> for MockBus<M> {

    fn deliver(&self, topic: &str, message: Arc<M>, options: PublishOptions)
               -> BoxFuture<'static, Result<()>> {

        debug!("Mock publish on {topic}");
        let publishes = self.publishes.clone();
        let fail = self.fail.load(Ordering::SeqCst);
        let topic = topic.to_string();

        Box::pin(async move {
            if fail {
                return Err(anyhow!("Mock delivery failure on {topic}"));
            }

            publishes.lock().await.push(PublishRecord { topic, message, options });
            Ok(())
        })
    }

    fn set_will(&self, topic: &str, message: Arc<M>) -> BoxFuture<'static, Result<()>> {
        let wills = self.wills.clone();
        let topic = topic.to_string();

        Box::pin(async move {
            debug!("Mock will on {topic}");
            wills.lock().await.push(WillRecord { topic, message });
            Ok(())
        })
    }

    fn start(&self) -> BoxFuture<'static, Result<()>> {
        let starts = self.starts.clone();
        Box::pin(async move {
            *starts.lock().await += 1;
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'static, Result<()>> {
        let shutdowns = self.shutdowns.clone();
        Box::pin(async move {
            *shutdowns.lock().await += 1;
            Ok(())
        })
    }
}
