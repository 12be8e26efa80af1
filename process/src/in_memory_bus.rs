// In-memory bus for running a service without a broker
use tokio::sync::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use anyhow::Result;
use config::Config;
use futures::future::BoxFuture;
use brewcast_sdk::message_bus::{MessageBus, MessageBounds, PublishOptions};
use tracing::{debug, info};

const DEFAULT_HISTORY: i64 = 100;

type Recent<M> = Arc<Mutex<VecDeque<(String, Arc<M>)>>>;

pub struct InMemoryBus<M: MessageBounds> {

    // Most recent publishes, oldest first
    recent: Recent<M>,

    // How many publishes to keep
    history: usize,

    // Last retained message by topic
    retained: Arc<Mutex<HashMap<String, Arc<M>>>>,

    // Registered will - there is no connection to lose, so it never fires
    will: Arc<Mutex<Option<(String, Arc<M>)>>>,
}

impl<M: MessageBounds> InMemoryBus<M> {
    pub fn new(config: &Config) -> Self {
        let history = config.get_int("history")
            .unwrap_or(DEFAULT_HISTORY)
            .max(1) as usize;

        info!("Creating in-memory message bus keeping {} publishes", history);

        InMemoryBus {
            recent: Arc::new(Mutex::new(VecDeque::with_capacity(history))),
            history,
            retained: Arc::new(Mutex::new(HashMap::new())),
            will: Arc::new(Mutex::new(None)),
        }
    }

    /// Recent publishes, oldest first
    pub async fn recent(&self) -> Vec<(String, Arc<M>)> {
        self.recent.lock().await.iter().cloned().collect()
    }

    /// Last retained message on a topic
    pub async fn retained(&self, topic: &str) -> Option<Arc<M>> {
        self.retained.lock().await.get(topic).cloned()
    }

    /// The will that would be published if this were a real connection
    pub async fn will(&self) -> Option<(String, Arc<M>)> {
        self.will.lock().await.clone()
    }
}

impl<M: MessageBounds> MessageBus<M> for InMemoryBus<M> {

    /// Publish a message on a given topic
    fn deliver(&self, topic: &str, message: Arc<M>, options: PublishOptions)
               -> BoxFuture<'static, Result<()>> {
        let topic = topic.to_string();
        let recent = self.recent.clone();
        let retained = self.retained.clone();
        let history = self.history;

        Box::pin(async move {
            debug!("In-memory publish on {topic}");
            if options.retain {
                retained.lock().await.insert(topic.clone(), message.clone());
            }

            let mut recent = recent.lock().await;
            if recent.len() == history {
                recent.pop_front();
            }
            recent.push_back((topic, message));
            Ok(())
        })
    }

    fn set_will(&self, topic: &str, message: Arc<M>) -> BoxFuture<'static, Result<()>> {
        let will = self.will.clone();
        let topic = topic.to_string();

        Box::pin(async move {
            debug!("In-memory bus will on {topic} recorded");
            *will.lock().await = Some((topic, message));
            Ok(())
        })
    }

    fn shutdown(&self) -> BoxFuture<'static, Result<()>> {
        let recent = self.recent.clone();

        Box::pin(async move {
            info!("In-memory bus shut down with {} recent publishes", recent.lock().await.len());
            Ok(())
        })
    }
}

// -- Tests --
#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn bus(toml: &str) -> InMemoryBus<String> {
        let config = Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap();
        InMemoryBus::<String>::new(&config)
    }

    #[tokio::test]
    async fn publishes_are_kept_up_to_history_limit() {
        let bus = bus("history = 2");

        for n in 0..3 {
            bus.publish("brewcast/history/kettles", Arc::new(format!("reading {n}")),
                        PublishOptions::default()).await.unwrap();
        }

        let recent: Vec<String> = bus.recent().await
            .into_iter()
            .map(|(_, message)| message.as_ref().clone())
            .collect();
        assert_eq!(recent, vec!["reading 1".to_string(), "reading 2".to_string()]);
    }

    #[tokio::test]
    async fn only_retained_publishes_are_retained() {
        let bus = bus("");

        bus.publish("brewcast/state/spark", Arc::new("online".to_string()),
                    PublishOptions::default().retain(true)).await.unwrap();
        bus.publish("brewcast/state/spark", Arc::new("offline".to_string()),
                    PublishOptions::default().retain(true)).await.unwrap();
        bus.publish("brewcast/history/spark", Arc::new("reading".to_string()),
                    PublishOptions::default()).await.unwrap();

        assert_eq!(bus.retained("brewcast/state/spark").await.as_deref(),
                   Some(&"offline".to_string()));
        assert!(bus.retained("brewcast/history/spark").await.is_none());
        assert_eq!(bus.recent().await.len(), 3);
    }

    #[tokio::test]
    async fn will_is_recorded_not_published() {
        let bus = bus("");

        bus.set_will("brewcast/state/spark", Arc::new("offline".to_string())).await.unwrap();
        assert!(bus.shutdown().await.is_ok());

        let (topic, message) = bus.will().await.unwrap();
        assert_eq!(topic, "brewcast/state/spark");
        assert_eq!(message.as_ref(), "offline");
        assert!(bus.recent().await.is_empty());
        assert!(bus.retained("brewcast/state/spark").await.is_none());
    }
}
