//! Brewcast status module
//! Background chatter in the log, to show a service is alive

use brewcast_sdk::config::get_interval;
use brewcast_sdk::{checked_interval, module, Context, MessageBounds, Repeater, RepeaterTask};
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use async_trait::async_trait;
use config::Config;
use rand::seq::IndexedRandom;
use tokio::sync::Mutex;
use tracing::info;

const DEFAULT_INTERVAL: f64 = 5.0;

pub const PHRASES: [&str; 5] = [
    "Hellooo",
    "Searching",
    "Sentry mode activated",
    "Is anyone there?",
    "Could you come over here?",
];

pub fn pick_phrase() -> &'static str {
    PHRASES.choose(&mut rand::rng()).copied().unwrap_or(PHRASES[0])
}

struct Chatter {
    seconds: f64,
    interval: Duration,
}

#[async_trait]
impl RepeaterTask for Chatter {
    async fn prepare(&mut self) -> Result<()> {
        self.interval = checked_interval(self.seconds)?;
        Ok(())
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn run(&mut self) -> Result<()> {
        info!("{}", pick_phrase());
        Ok(())
    }
}

/// Status module
#[module(
    message_type(M),
    name = "status",
    description = "Status chatter",
    before_shutdown
)]
#[derive(Default)]
pub struct Status<M: MessageBounds> {
    repeater: Mutex<Option<Repeater>>,
}

impl<M: MessageBounds> Status<M>
{
    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()> {
        // Stopped along with everything else when the process cancels
        let repeater = Repeater::new("status", &context.shutdown);
        repeater.start(Chatter {
            seconds: get_interval(&config, "interval", DEFAULT_INTERVAL),
            interval: Duration::ZERO,
        }).await;

        *self.repeater.lock().await = Some(repeater);
        Ok(())
    }

    async fn before_shutdown(&self) -> Result<()> {
        info!("Any minute now...");
        Ok(())
    }
}
