// Brewcast module SDK - main library exports
pub mod message_bus;
pub mod context;
pub mod module;
pub mod module_registry;
pub mod config;
pub mod messages;
pub mod mock_bus;
pub mod repeater;

// Flattened re-exports
pub use async_trait::async_trait;
pub use brewcast_macros::module;
pub use self::message_bus::MessageBounds;
pub use self::message_bus::MessageBus;
pub use self::message_bus::PublishOptions;
pub use self::context::Context;
pub use self::messages::{Event, Measurement};
pub use self::module::Module;
pub use self::module_registry::ModuleRegistry;
pub use self::repeater::{checked_interval, Repeater, RepeaterCancelled, RepeaterState, RepeaterTask};
