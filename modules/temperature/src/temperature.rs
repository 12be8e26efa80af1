//! Brewcast temperature module
//! Broadcasts a slowly varying temperature to history, and marks the service
//! offline on the state topic when it goes away

use brewcast_sdk::config::{get_interval, ServiceConfig};
use brewcast_sdk::{
    checked_interval, module, Context, Event, Measurement, MessageBounds, MessageBus,
    PublishOptions, Repeater, RepeaterTask,
};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use config::Config;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info};

const DEFAULT_BROADCAST_INTERVAL: f64 = 5.0;

/// One cycle a minute between 0 and 2 degrees
pub fn sine_temperature(seconds: f64) -> f64 {
    (seconds * 2.0 * std::f64::consts::PI / 60.0).sin() + 1.0
}

/// Published as the will, and again explicitly on orderly shutdown
pub fn offline_state(name: &str) -> Event {
    Event::new(name, json!({
        "status": null,
        "blocks": [],
    })).with_type("Spark.state")
}

/// The repeating part
struct Broadcast<M: MessageBounds> {
    name: String,
    history_topic: String,
    seconds: f64,
    interval: Duration,
    message_bus: Arc<dyn MessageBus<M>>,
}

#[async_trait]
impl<M: From<Event> + MessageBounds> RepeaterTask for Broadcast<M> {
    async fn prepare(&mut self) -> Result<()> {
        self.interval = checked_interval(self.seconds)?;
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&mut self) -> Result<()> {
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        let measurement = Measurement::new("temperature", sine_temperature(now), "c");
        debug!("{measurement:?}");

        let event = Event::new(&self.name, measurement.to_data());
        self.message_bus.publish(&self.history_topic, Arc::new(event.into()),
                                 PublishOptions::default().err(false)).await
    }
}

/// Set up by init(), torn down by before_shutdown()
struct Running<M: MessageBounds> {
    repeater: Repeater,
    message_bus: Arc<dyn MessageBus<M>>,
    state_topic: String,
    will: Event,
}

/// Temperature module
/// Parameterised by the outer message type used on the bus
#[module(
    message_type(M),
    name = "temperature",
    description = "Temperature broadcaster",
    before_shutdown
)]
#[derive(Default)]
pub struct TemperaturePublisher<M: From<Event> + MessageBounds> {
    running: Mutex<Option<Running<M>>>,
}

impl<M: From<Event> + MessageBounds> TemperaturePublisher<M>
{
    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()> {
        let service = ServiceConfig::from_config(&config)?;
        let seconds = get_interval(&config, "broadcast-interval", DEFAULT_BROADCAST_INTERVAL);
        let state_topic = service.state_topic_for_name();
        let history_topic = service.history_topic_for_name();

        // Published by the broker if the connection is lost
        let will = offline_state(&service.name);
        context.message_bus.set_will(&state_topic, Arc::new(will.clone().into())).await?;

        info!("Broadcasting temperature for {} to {history_topic}", service.name);
        let repeater = Repeater::new("temperature", &context.shutdown);
        repeater.start(Broadcast {
            name: service.name.clone(),
            history_topic,
            seconds,
            interval: Duration::ZERO,
            message_bus: context.message_bus.clone(),
        }).await;

        *self.running.lock().await = Some(Running {
            repeater,
            message_bus: context.message_bus.clone(),
            state_topic,
            will,
        });

        Ok(())
    }

    /// An orderly disconnect doesn't fire the will, so say it ourselves
    async fn before_shutdown(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        running.repeater.stop().await;

        info!("Publishing offline state to {}", running.state_topic);
        running.message_bus.publish(&running.state_topic, Arc::new(running.will.into()),
                                    PublishOptions::default().retain(true).err(false)).await
    }
}
