//! Froghop kettles service
//! Broadcasts temperature, relays polled data and chatters in the log

use brewcast_process::Process;
use brewcast_sdk::config::load_service_config;
use brewcast_sdk::Event;
use brewcast_module_poll_publisher::PollPublisher;
use brewcast_module_status::Status;
use brewcast_module_temperature::TemperaturePublisher;
use anyhow::Result;
use tracing::info;
use tracing_subscriber;
use std::sync::Arc;

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {

    // Initialise tracing
    tracing_subscriber::fmt::init();

    info!("Brewcast Froghop kettles service");

    // Read the config - BREWCAST_GLOBAL__NAME overrides [global] name etc.
    let config = Arc::new(load_service_config("services/froghop_kettles/froghop-kettles")?);

    // Create the process
    let mut process = Process::<Event>::create(config).await?;

    // Register modules
    TemperaturePublisher::<Event>::register(&mut process);
    PollPublisher::<Event>::register(&mut process);
    Status::<Event>::register(&mut process);

    // Run it
    process.run().await?;

    // Bye!
    info!("Exiting");
    Ok(())
}
