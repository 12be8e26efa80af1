//! Main process for a brewcast service
//! Builds the message bus, initialises modules and runs them until shutdown

use anyhow::{anyhow, Result};
use brewcast_sdk::config::{build_module_config, config_from_value};
use brewcast_sdk::{Context, MessageBounds, MessageBus, Module, ModuleRegistry};
use config::Config;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod in_memory_bus;
pub use in_memory_bus::InMemoryBus;

mod mqtt_bus;
pub use mqtt_bus::MqttBus;

/// Main Process structure
pub struct Process<M: MessageBounds> {
    /// Global configuration
    config: Arc<Config>,

    /// The one bus every module shares
    message_bus: Arc<dyn MessageBus<M>>,

    /// Cancelled to ask the process to stop
    stop: CancellationToken,

    /// Parent of every module's token, cancelled after before_shutdown hooks
    shutdown: CancellationToken,

    /// Registered modules by name
    modules: HashMap<String, Arc<dyn Module<M>>>,
}

impl<M: MessageBounds> Process<M> {
    /// Create a bus of the given type
    fn create_bus(class: &str, config: &Config) -> Result<Arc<dyn MessageBus<M>>> {
        let bus: Arc<dyn MessageBus<M>> = match class {
            "in-memory" => Arc::new(InMemoryBus::<M>::new(config)),
            "mqtt" => Arc::new(MqttBus::<M>::new(config)?),
            _ => return Err(anyhow!("Unknown message bus class {class}")),
        };

        Ok(bus)
    }

    /// Create a process with the given config, using the first valid
    /// `[message-bus.<id>]` section
    pub async fn create(config: Arc<Config>) -> Result<Self> {
        let mut message_bus = None;

        if let Ok(mb_confs) = config.get_table("message-bus") {
            for (id, mb_conf) in mb_confs {
                if let Ok(mbt) = mb_conf.into_table() {
                    let mbc = config_from_value(mbt);
                    if let Ok(class) = mbc.get_string("class") {
                        if message_bus.is_some() {
                            warn!("Ignoring extra message bus '{id}' ({class})");
                            continue;
                        }

                        info!("Creating message bus '{id}' ({class})");
                        message_bus = Some(Self::create_bus(&class, &mbc)?);
                    }
                }
            }
        }

        let message_bus = match message_bus {
            Some(bus) => bus,
            None => {
                warn!("No message bus configured - using in-memory");
                Self::create_bus("in-memory", &Config::default())?
            }
        };

        Ok(Self::with_bus(config, message_bus))
    }

    /// Create a process around an existing bus
    pub fn with_bus(config: Arc<Config>, message_bus: Arc<dyn MessageBus<M>>) -> Self {
        Self {
            config,
            message_bus,
            stop: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            modules: HashMap::new(),
        }
    }

    /// Token which stops the process when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Initialise all the modules from [module.<id>] configuration
    async fn init_modules(&self) -> Result<Vec<(String, Arc<dyn Module<M>>)>> {
        let mut initialised = Vec::new();

        let Ok(mod_confs) = self.config.get_table("module") else {
            warn!("No modules configured");
            return Ok(initialised);
        };

        for (id, mod_conf) in mod_confs {
            let Ok(modt) = mod_conf.into_table() else {
                warn!("Bad configuration for module {id} ignored");
                continue;
            };

            let modc = build_module_config(&self.config, modt);
            let module_name = modc.get_string("class").unwrap_or(id.clone());

            let Some(module) = self.modules.get(&module_name) else {
                error!("Unrecognised module class: {module_name} in [module.{id}]");
                continue;
            };

            info!("Initialising module {id}");
            let context = Arc::new(Context::new(
                self.config.clone(),
                self.message_bus.clone(),
                self.shutdown.child_token(),
            ));

            module.init(context, Arc::new(modc)).await
                .map_err(|e| anyhow!("Module {id} failed to initialise: {e}"))?;
            initialised.push((id, module.clone()));
        }

        Ok(initialised)
    }

    /// Wait for SIGTERM, Ctrl-C or the shutdown token
    async fn wait_for_shutdown(&self) -> Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received. Shutting down..."),
            _ = tokio::signal::ctrl_c() => info!("Interrupted. Shutting down..."),
            _ = self.stop.cancelled() => info!("Shutdown requested..."),
        }

        Ok(())
    }

    /// Run the process
    pub async fn run(&self) -> Result<()> {
        info!("Initialising...");
        let modules = self.init_modules().await?;

        // Wills are all registered now
        self.message_bus.start().await?;

        info!("Running...");
        self.wait_for_shutdown().await?;

        // Orderly goodbyes go out while the bus is still connected
        for (id, module) in modules.iter() {
            if let Err(e) = module.before_shutdown().await {
                error!("Module {id} failed in before_shutdown: {e}");
            }
        }

        // Stop anything left running, then disconnect
        self.shutdown.cancel();
        self.message_bus.shutdown().await?;

        Ok(())
    }
}

/// Module registry implementation
impl<M: MessageBounds> ModuleRegistry<M> for Process<M> {
    /// Register a module
    fn register(&mut self, module: Arc<dyn Module<M>>) {
        let name = module.get_name();
        self.modules.insert(name.to_string(), module.clone());
    }
}
