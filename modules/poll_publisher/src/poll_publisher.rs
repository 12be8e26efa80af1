//! Brewcast poll publisher module
//! Fetches JSON from an HTTP source at intervals and publishes it both as
//! history and as a retained Tilt-style state event

use brewcast_sdk::config::{get_interval, ServiceConfig};
use brewcast_sdk::{
    checked_interval, module, Context, Event, MessageBounds, MessageBus, PublishOptions,
    Repeater, RepeaterTask,
};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use config::Config;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::info;

const DEFAULT_URL: &str = "https://jsonplaceholder.typicode.com/todos/1";
const DEFAULT_COLOUR: &str = "Black";
const DEFAULT_POLL_INTERVAL: f64 = 5.0;

struct Poll<M: MessageBounds> {
    client: reqwest::Client,
    url: String,
    name: String,
    history_topic: String,
    state_topic: String,
    colour: String,
    seconds: f64,
    interval: Duration,
    message_bus: Arc<dyn MessageBus<M>>,
}

impl<M: MessageBounds> Poll<M> {
    async fn fetch(&self) -> Result<Value> {
        let response = self.client.get(&self.url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl<M: From<Event> + MessageBounds> RepeaterTask for Poll<M> {
    async fn prepare(&mut self) -> Result<()> {
        self.interval = checked_interval(self.seconds)?;
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&mut self) -> Result<()> {
        let data = self.fetch().await?;
        info!("{data}");

        let history = Event::new(&self.name, data.clone());
        self.message_bus.publish(&self.history_topic, Arc::new(history.into()),
                                 PublishOptions::default()).await?;

        let timestamp = Utc::now().timestamp_millis() as f64 / 1000.0;
        let state = Event::new(&self.name, data)
            .with_type("Tilt.state")
            .with_field("colour", json!(self.colour))
            .with_field("timestamp", json!(timestamp));
        self.message_bus.publish(&self.state_topic, Arc::new(state.into()),
                                 PublishOptions::default().retain(true).err(false)).await
    }
}

/// Poll publisher module
/// Parameterised by the outer message type used on the bus
#[module(
    message_type(M),
    name = "poll-publisher",
    description = "HTTP poll publisher"
)]
#[derive(Default)]
pub struct PollPublisher<M: From<Event> + MessageBounds> {
    repeater: Mutex<Option<Repeater>>,
}

impl<M: From<Event> + MessageBounds> PollPublisher<M>
{
    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()> {
        let service = ServiceConfig::from_config(&config)?;
        let url = config.get_string("url").unwrap_or(DEFAULT_URL.to_string());
        let history_topic = config.get_string("topic")
            .unwrap_or(service.history_topic_for_name());
        let colour = config.get_string("colour").unwrap_or(DEFAULT_COLOUR.to_string());
        let state_topic = format!("{}/{colour}", service.state_topic_for_name());

        info!("Polling {url} for {} into {history_topic}", service.name);

        let repeater = Repeater::new("poll-publisher", &context.shutdown);
        repeater.start(Poll {
            client: reqwest::Client::new(),
            url,
            name: service.name,
            history_topic,
            state_topic,
            colour,
            seconds: get_interval(&config, "poll-interval", DEFAULT_POLL_INTERVAL),
            interval: Duration::ZERO,
            message_bus: context.message_bus.clone(),
        }).await;

        *self.repeater.lock().await = Some(repeater);
        Ok(())
    }
}
