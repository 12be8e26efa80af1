//! MessageBus implementation for MQTT
use anyhow::{anyhow, Result};
use brewcast_sdk::message_bus::{MessageBounds, MessageBus, PublishOptions};
use config::Config;
use futures::future::BoxFuture;
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_HOST: &str = "eventbus";
const DEFAULT_PORT: u16 = 1883;
const DEFAULT_KEEP_ALIVE: u64 = 30;
const DEFAULT_RECONNECT_DELAY: u64 = 5;
const DEFAULT_CHANNEL_CAPACITY: usize = 10;
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state - options are consumed when the bus starts
struct Connection {
    options: Option<MqttOptions>,
    client: Option<AsyncClient>,
    event_loop: Option<JoinHandle<()>>,
}

/// MQTT message bus implementation
pub struct MqttBus<M: MessageBounds> {
    connection: Arc<Mutex<Connection>>,
    qos: QoS,
    reconnect_delay: Duration,
    shutting_down: Arc<AtomicBool>,
    _phantom: PhantomData<M>,
}

/// Map a configured integer QoS
fn qos_from_config(qos: i64) -> Result<QoS> {
    match qos {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        _ => Err(anyhow!("Unsupported MQTT QoS {qos}")),
    }
}

fn default_client_id() -> String {
    let random_bytes: [u8; 4] = rand::random();
    format!("brewcast-{}", hex::encode(random_bytes))
}

impl<M: MessageBounds> MqttBus<M> {

    /// Prepare the connection from config - nothing is connected until start()
    pub fn new(config: &Config) -> Result<Self> {
        let host = config.get_string("host").unwrap_or(DEFAULT_HOST.to_string());
        let port = config.get::<u16>("port").unwrap_or(DEFAULT_PORT);
        let client_id = config.get_string("client-id").unwrap_or_else(|_| default_client_id());
        let keep_alive = config.get::<u64>("keep-alive").unwrap_or(DEFAULT_KEEP_ALIVE);
        let qos = qos_from_config(config.get_int("qos").unwrap_or(0))?;
        let reconnect_delay = config.get::<u64>("reconnect-delay")
            .unwrap_or(DEFAULT_RECONNECT_DELAY);

        info!("MQTT bus for {host}:{port} as '{client_id}'");

        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(keep_alive));

        if let (Ok(username), Ok(password)) =
            (config.get_string("username"), config.get_string("password")) {
            options.set_credentials(username, password);
        }

        Ok(Self {
            connection: Arc::new(Mutex::new(Connection {
                options: Some(options),
                client: None,
                event_loop: None,
            })),
            qos,
            reconnect_delay: Duration::from_secs(reconnect_delay),
            shutting_down: Arc::new(AtomicBool::new(false)),
            _phantom: PhantomData,
        })
    }
}

/// Poll the event loop until disconnected. Requests only drain from here
/// while the broker is reachable.
async fn run_event_loop(
    mut event_loop: EventLoop,
    reconnect_delay: Duration,
    shutting_down: Arc<AtomicBool>,
) {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => info!("MQTT connected"),

            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }

            Ok(_) => {}

            Err(e) => {
                if shutting_down.load(Ordering::SeqCst) {
                    break;
                }
                error!("MQTT connection error: {e}");
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}

impl<M: MessageBounds> MessageBus<M> for MqttBus<M> {

    /// Queue a message for the broker. Fails rather than waits when the
    /// request queue is full, e.g. while the broker is unreachable.
    fn deliver(&self, topic: &str, message: Arc<M>, options: PublishOptions)
               -> BoxFuture<'static, Result<()>> {
        let connection = self.connection.clone();
        let topic = topic.to_string();
        let qos = self.qos;

        Box::pin(async move {
            let client = connection.lock().await.client.clone()
                .ok_or_else(|| anyhow!("MQTT bus not connected"))?;

            let payload = serde_json::to_vec(&*message)?;
            client.try_publish(topic.clone(), qos, options.retain, payload)
                .map_err(|e| anyhow!("MQTT publish to {topic} not queued: {e}"))?;
            Ok(())
        })
    }

    /// Will is retained so late subscribers see the offline state too
    fn set_will(&self, topic: &str, message: Arc<M>) -> BoxFuture<'static, Result<()>> {
        let connection = self.connection.clone();
        let topic = topic.to_string();
        let qos = self.qos;

        Box::pin(async move {
            let payload = serde_json::to_vec(&*message)?;
            let mut connection = connection.lock().await;
            let options = connection.options.as_mut()
                .ok_or_else(|| anyhow!("MQTT will must be set before connecting"))?;

            info!("Setting MQTT will on {topic}");
            options.set_last_will(LastWill::new(topic, payload, qos, true));
            Ok(())
        })
    }

    fn start(&self) -> BoxFuture<'static, Result<()>> {
        let connection = self.connection.clone();
        let reconnect_delay = self.reconnect_delay;
        let shutting_down = self.shutting_down.clone();

        Box::pin(async move {
            let mut connection = connection.lock().await;
            let options = connection.options.take()
                .ok_or_else(|| anyhow!("MQTT bus already started"))?;

            info!("Connecting to MQTT broker");
            let (client, event_loop) = AsyncClient::new(options, DEFAULT_CHANNEL_CAPACITY);

            connection.event_loop = Some(tokio::spawn(
                run_event_loop(event_loop, reconnect_delay, shutting_down)));
            connection.client = Some(client);
            Ok(())
        })
    }

    /// Disconnect cleanly so the broker does not publish the will
    fn shutdown(&self) -> BoxFuture<'static, Result<()>> {
        info!("Shutting down MQTT interface");
        let connection = self.connection.clone();
        let shutting_down = self.shutting_down.clone();

        Box::pin(async move {
            shutting_down.store(true, Ordering::SeqCst);

            let (client, event_loop) = {
                let mut connection = connection.lock().await;
                (connection.client.take(), connection.event_loop.take())
            };

            if let Some(client) = client {
                if let Err(e) = client.try_disconnect() {
                    warn!("MQTT disconnect not queued: {e}");
                }
            }

            if let Some(mut event_loop) = event_loop {
                if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut event_loop).await.is_err() {
                    warn!("MQTT event loop did not finish in time");
                    event_loop.abort();
                }
            }

            Ok(())
        })
    }
}

// -- Tests --
#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use brewcast_sdk::{Event as BusEvent, Repeater, RepeaterTask};
    use config::FileFormat;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::timeout;
    use tokio_util::sync::CancellationToken;

    // Nothing listens on port 1, so the broker is always down
    const BROKER_DOWN: &str = "host = \"127.0.0.1\"\nport = 1\nreconnect-delay = 1";

    fn bus_from_toml(toml: &str) -> Result<MqttBus<BusEvent>> {
        let config = Config::builder()
            .add_source(config::File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap();
        MqttBus::<BusEvent>::new(&config)
    }

    fn reading() -> Arc<BusEvent> {
        Arc::new(BusEvent::new("kettles", json!({"temperature[c]": 1.0})))
    }

    #[test]
    fn qos_maps_from_integers() {
        assert_eq!(qos_from_config(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(qos_from_config(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(qos_from_config(2).unwrap(), QoS::ExactlyOnce);
        assert!(qos_from_config(3).is_err());
    }

    #[test]
    fn client_ids_are_random_and_prefixed() {
        let a = default_client_id();
        let b = default_client_id();
        assert!(a.starts_with("brewcast-"));
        assert_eq!(a.len(), "brewcast-".len() + 8);
        assert_ne!(a, b);
    }

    #[test]
    fn invalid_qos_fails_construction() {
        assert!(bus_from_toml("qos = 7").is_err());
    }

    #[tokio::test]
    async fn publish_before_start_is_an_error() {
        let bus = bus_from_toml("host = \"localhost\"").unwrap();
        let result = bus.publish("brewcast/history", reading(), PublishOptions::default()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn publish_before_start_is_tolerated_with_err_false() {
        let bus = bus_from_toml("").unwrap();
        let result = bus.publish("brewcast/history", reading(),
                                 PublishOptions::default().err(false)).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn will_is_set_on_options_before_start() {
        let bus = bus_from_toml("").unwrap();
        let will = BusEvent::new("spark", json!({"status": null}));
        assert!(bus.set_will("brewcast/state/spark", Arc::new(will)).await.is_ok());

        let connection = bus.connection.lock().await;
        let options = connection.options.as_ref().unwrap();
        let last_will = options.last_will().unwrap();
        assert_eq!(last_will.topic, "brewcast/state/spark");
        assert!(last_will.retain);
    }

    #[tokio::test]
    async fn will_after_start_is_rejected() {
        let bus = bus_from_toml(BROKER_DOWN).unwrap();
        assert!(bus.start().await.is_ok());

        let will = BusEvent::new("spark", json!({"status": null}));
        assert!(bus.set_will("brewcast/state/spark", Arc::new(will)).await.is_err());
        assert!(bus.start().await.is_err());

        assert!(bus.shutdown().await.is_ok());
    }

    #[tokio::test]
    async fn publishes_never_wait_on_an_unreachable_broker() {
        let bus = bus_from_toml(BROKER_DOWN).unwrap();
        assert!(bus.start().await.is_ok());

        // More than the request queue holds
        for n in 0..15 {
            let result = timeout(Duration::from_secs(1),
                                 bus.publish("brewcast/history/kettles", reading(),
                                             PublishOptions::default().err(false))).await;
            assert!(matches!(result, Ok(Ok(()))), "publish {n} did not return");
        }

        // With errors propagated, the full queue shows up as a failure
        let mut failures = 0;
        for _ in 0..5 {
            let result = timeout(Duration::from_secs(1),
                                 bus.publish("brewcast/history/kettles", reading(),
                                             PublishOptions::default())).await;
            match result {
                Ok(Err(_)) => failures += 1,
                Ok(Ok(())) => {}
                Err(_) => panic!("publish did not return"),
            }
        }
        assert!(failures > 0);

        assert!(timeout(Duration::from_secs(3), bus.shutdown()).await.is_ok());
    }

    struct Broadcast {
        bus: Arc<MqttBus<BusEvent>>,
        runs: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl RepeaterTask for Broadcast {
        async fn prepare(&mut self) -> Result<()> {
            Ok(())
        }

        fn interval(&self) -> Duration {
            Duration::from_millis(50)
        }

        async fn run(&mut self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.bus.publish("brewcast/history/kettles", reading(),
                             PublishOptions::default().err(false)).await
        }
    }

    #[tokio::test]
    async fn repeater_on_an_unreachable_broker_keeps_going_and_stops() {
        let bus = Arc::new(bus_from_toml(BROKER_DOWN).unwrap());
        assert!(bus.start().await.is_ok());

        let runs = Arc::new(AtomicUsize::new(0));
        let repeater = Repeater::new("broadcast", &CancellationToken::new());
        repeater.start(Broadcast { bus: bus.clone(), runs: runs.clone() }).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(runs.load(Ordering::SeqCst) > 11);

        assert!(timeout(Duration::from_secs(2), repeater.stop()).await.is_ok());
        assert!(timeout(Duration::from_secs(3), bus.shutdown()).await.is_ok());
    }
}
