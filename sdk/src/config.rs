use anyhow::Result;
use config::{Config, ConfigError, Environment, File, Map};
use serde::Deserialize;
use tracing::warn;

const DEFAULT_NAME: &str = "brewcast";
const DEFAULT_HISTORY_TOPIC: &str = "brewcast/history";
const DEFAULT_STATE_TOPIC: &str = "brewcast/state";
const ENV_PREFIX: &str = "BREWCAST";

/// Extract a sub-config as a new Config object
/// Defaults to an empty Config if the path does not exist.
pub fn get_sub_config(config: &Config, path: &str) -> Config {
    match config.get_table(path) {
        Ok(sub_table) => config_from_value(sub_table),
        Err(_) => Config::default(),
    }
}

/// Get a new config from a value map
pub fn config_from_value(map: Map<String, config::Value>) -> Config {
    let mut builder = Config::builder();
    for (key, value) in map.into_iter() {
        builder = match builder.set_override(key, value) {
            Ok(b) => b,
            Err(_) => return Config::default(),
        };
    }
    builder.build().unwrap_or_default()
}

/// Build a module config by layering its `[module.<id>]` table over `[global]`.
///
/// Service-wide values such as `name` and the topic prefixes live in
/// `[global]`; a module table can still override any of them.
///
/// ```toml
/// [global]
/// name = "ispindel"
/// history-topic = "brewcast/history"
///
/// [module.ispindel]
/// port = 5000
/// ```
pub fn build_module_config(
    root_config: &Config,
    module_table: Map<String, config::Value>,
) -> Config {
    Config::builder()
        .add_source(get_sub_config(root_config, "global"))
        .add_source(config_from_value(module_table))
        .build()
        .unwrap_or_default()
}

/// Identity and topic prefixes shared by every module of a service
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceConfig {
    #[serde(default = "default_name")]
    pub name: String,

    /// Prefix for time-series events
    #[serde(default = "default_history_topic")]
    pub history_topic: String,

    /// Prefix for current-status snapshots
    #[serde(default = "default_state_topic")]
    pub state_topic: String,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_history_topic() -> String {
    DEFAULT_HISTORY_TOPIC.to_string()
}

fn default_state_topic() -> String {
    DEFAULT_STATE_TOPIC.to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            history_topic: default_history_topic(),
            state_topic: default_state_topic(),
        }
    }
}

impl ServiceConfig {
    /// Read from a (module) config, ignoring unrelated keys
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(config.clone().try_deserialize()?)
    }

    /// `<history-topic>/<name>`
    pub fn history_topic_for_name(&self) -> String {
        format!("{}/{}", self.history_topic, self.name)
    }

    /// `<state-topic>/<name>`
    pub fn state_topic_for_name(&self) -> String {
        format!("{}/{}", self.state_topic, self.name)
    }
}

/// `BREWCAST_*` environment overrides, with `__` between nested keys:
/// `BREWCAST_GLOBAL__NAME` sets `name` in `[global]`
pub fn environment_overrides() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}

/// Load a service's TOML file with environment overrides on top
pub fn load_service_config(file: &str) -> Result<Config> {
    Ok(Config::builder()
        .add_source(File::with_name(file))
        .add_source(environment_overrides())
        .build()?)
}

/// Read an interval in seconds, accepting integers or floats.
/// A value that isn't a number gives NaN, which no repeater will run with.
pub fn get_interval(config: &Config, key: &str, default: f64) -> f64 {
    match config.get_float(key) {
        Ok(seconds) => seconds,
        Err(ConfigError::NotFound(_)) => default,
        Err(e) => {
            warn!("Invalid {key}: {e}");
            f64::NAN
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    fn config_from_toml(toml: &str) -> Config {
        Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
    }

    #[test]
    fn sub_config_extracts_message_bus_section() {
        let config = config_from_toml(
            r#"
            [message-bus.mqtt]
            class = "mqtt"
            host = "eventbus"
            "#,
        );

        let bus = get_sub_config(&config, "message-bus.mqtt");

        assert_eq!(bus.get_string("class").unwrap(), "mqtt");
        assert_eq!(bus.get_string("host").unwrap(), "eventbus");
    }

    #[test]
    fn sub_config_is_empty_for_missing_path() {
        let config = config_from_toml("[other]\nkey = \"value\"");
        let sub = get_sub_config(&config, "nonexistent");
        assert!(sub.get_string("anything").is_err());
    }

    #[test]
    fn module_config_inherits_global_service_values() {
        let root_config = config_from_toml(
            r#"
            [global]
            name = "ispindel"
            history-topic = "brewcast/history"
            "#,
        );

        let mut module_table = Map::new();
        module_table.insert("port".to_string(), config::Value::new(None, 5000_i64));

        let module_cfg = build_module_config(&root_config, module_table);

        assert_eq!(module_cfg.get_string("name").unwrap(), "ispindel");
        assert_eq!(module_cfg.get_int("port").unwrap(), 5000);
    }

    #[test]
    fn module_config_overrides_global() {
        let root_config = config_from_toml(
            r#"
            [global]
            name = "froghop-kettles"
            "#,
        );

        let mut module_table = Map::new();
        module_table.insert("name".to_string(), config::Value::new(None, "kettle-2"));

        let module_cfg = build_module_config(&root_config, module_table);

        assert_eq!(module_cfg.get_string("name").unwrap(), "kettle-2");
    }

    #[test]
    fn service_config_uses_defaults_for_missing_keys() {
        let config = config_from_toml("name = \"ispindel\"\nport = 5000");
        let service = ServiceConfig::from_config(&config).unwrap();

        assert_eq!(service.name, "ispindel");
        assert_eq!(service.history_topic, "brewcast/history");
        assert_eq!(service.state_topic, "brewcast/state");
        assert_eq!(service.history_topic_for_name(), "brewcast/history/ispindel");
        assert_eq!(service.state_topic_for_name(), "brewcast/state/ispindel");
    }

    #[test]
    fn service_config_reads_custom_topics() {
        let config = config_from_toml(
            r#"
            name = "kettles"
            history-topic = "lab/history"
            state-topic = "lab/state"
            "#,
        );
        let service = ServiceConfig::from_config(&config).unwrap();
        assert_eq!(service.history_topic_for_name(), "lab/history/kettles");
        assert_eq!(service.state_topic_for_name(), "lab/state/kettles");
    }

    #[test]
    fn non_numeric_interval_is_nan() {
        let config = config_from_toml("poll-interval = \"abc\"");
        assert!(get_interval(&config, "poll-interval", 5.0).is_nan());
    }

    #[test]
    fn environment_overrides_nested_keys_with_single_underscore_prefix() {
        let mut env = Map::new();
        env.insert("BREWCAST_GLOBAL__NAME".to_string(), "from-env".to_string());
        env.insert("BREWCAST_MODULE__ISPINDEL__PORT".to_string(), "5001".to_string());
        env.insert("OTHER_GLOBAL__NAME".to_string(), "ignored".to_string());

        let config = Config::builder()
            .add_source(config::File::from_str(
                "[global]\nname = \"file\"\n\n[module.ispindel]\nport = 5000",
                FileFormat::Toml))
            .add_source(environment_overrides().source(Some(env)))
            .build()
            .unwrap();

        assert_eq!(config.get_string("global.name").unwrap(), "from-env");
        assert_eq!(config.get_int("module.ispindel.port").unwrap(), 5001);
    }

    #[test]
    fn module_tables_keep_file_order() {
        let config = config_from_toml(
            r#"
            [module.temperature]
            broadcast-interval = 5

            [module.poll-publisher]
            poll-interval = 5

            [module.status]
            interval = 5
            "#,
        );

        let ids: Vec<String> = config.get_table("module").unwrap().into_keys().collect();
        assert_eq!(ids, vec!["temperature", "poll-publisher", "status"]);
    }

    #[test]
    fn interval_accepts_integers_and_floats() {
        let config = config_from_toml("poll-interval = 2\nbroadcast-interval = 0.5");
        assert_eq!(get_interval(&config, "poll-interval", 5.0), 2.0);
        assert_eq!(get_interval(&config, "broadcast-interval", 5.0), 0.5);
        assert_eq!(get_interval(&config, "missing", 5.0), 5.0);
    }
}
