//! iSpindel service
//! Runs the iSpindel HTTP endpoint against the brewcast event bus

use brewcast_process::Process;
use brewcast_sdk::config::load_service_config;
use brewcast_sdk::Event;
use brewcast_module_ispindel::ISpindel;
use anyhow::Result;
use tracing::info;
use tracing_subscriber;
use std::sync::Arc;

/// Standard main
#[tokio::main]
pub async fn main() -> Result<()> {

    // Initialise tracing
    tracing_subscriber::fmt::init();

    info!("Brewcast iSpindel service");

    // Read the config - BREWCAST_GLOBAL__NAME overrides [global] name etc.
    let config = Arc::new(load_service_config("services/ispindel/ispindel")?);

    // Create the process
    let mut process = Process::<Event>::create(config).await?;

    // Register modules
    ISpindel::<Event>::register(&mut process);

    // Run it
    process.run().await?;

    // Bye!
    info!("Exiting");
    Ok(())
}
