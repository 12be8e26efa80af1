//! Brewcast iSpindel module
//! Accepts readings POSTed by iSpindel hydrometers and publishes them as history

use brewcast_sdk::config::ServiceConfig;
use brewcast_sdk::{module, Context, Event, MessageBounds, MessageBus, PublishOptions};
use std::sync::Arc;
use anyhow::Result;
use config::Config;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, info};

use axum::{
    extract::State,
    http::StatusCode,
    routing::post,
    Json, Router,
};

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Default IP address and port to listen on
const DEFAULT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0));
const DEFAULT_PORT: u16 = 5000;

/// Body sent by an iSpindel configured for Generic HTTP POST.
/// Anything else it sends (ID, interval, temp_units...) is ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ISpindelReading {
    pub name: String,
    pub temperature: f64,
    pub battery: Option<f64>,
    pub gravity: Option<f64>,
    #[serde(rename = "RSSI")]
    pub rssi: Option<f64>,
    pub angle: Option<f64>,
}

impl ISpindelReading {
    /// History event for this reading - absent values are published as null
    pub fn to_event(&self) -> Event {
        Event::new(&self.name, json!({
            "temperature": self.temperature,
            "battery": self.battery,
            "angle": self.angle,
            "rssi": self.rssi,
            "gravity": self.gravity,
        }))
    }
}

/// Shared with the request handler
struct IngestState<M: MessageBounds> {
    message_bus: Arc<dyn MessageBus<M>>,
    topic: String,
}

/// Handle POST /ispindel
/// Body validation happens in the Json extractor: a missing or mistyped
/// required field is rejected with 422, a non-JSON body with 415.
async fn ingest<M: From<Event> + MessageBounds>(
    State(state): State<Arc<IngestState<M>>>,
    Json(reading): Json<ISpindelReading>,
) -> StatusCode {
    let event = reading.to_event();

    match state.message_bus.publish(&state.topic, Arc::new(event.into()),
                                    PublishOptions::default()).await {
        Ok(()) => {
            info!("iSpindel {}, temp: {}, gravity: {:?}",
                  reading.name, reading.temperature, reading.gravity);
            StatusCode::OK
        }
        Err(e) => {
            error!("Failed to publish iSpindel reading to {}: {e}", state.topic);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// iSpindel module
/// Parameterised by the outer message type used on the bus
#[module(
    message_type(M),
    name = "ispindel",
    description = "iSpindel HTTP endpoint"
)]
#[derive(Default)]
pub struct ISpindel<M: From<Event> + MessageBounds>;

impl<M: From<Event> + MessageBounds> ISpindel<M>
{
    async fn init(&self, context: Arc<Context<M>>, config: Arc<Config>) -> Result<()> {
        let service = ServiceConfig::from_config(&config)?;
        let topic = config.get_string("topic").unwrap_or(service.history_topic);

        let state = Arc::new(IngestState {
            message_bus: context.message_bus.clone(),
            topic,
        });

        let app = Router::new()
            .route("/ispindel", post(ingest::<M>))
            .with_state(state);

        let ip = config.get::<IpAddr>("address").unwrap_or(DEFAULT_IP);
        let port = config.get::<u16>("port").unwrap_or(DEFAULT_PORT);
        let addr = SocketAddr::from((ip, port));

        // Bind now so a port clash fails the init
        let server = axum::Server::try_bind(&addr)?
            .serve(app.into_make_service())
            .with_graceful_shutdown(context.shutdown.clone().cancelled_owned());
        info!("iSpindel endpoint listening on http://{addr}/ispindel");

        tokio::spawn(async move {
            if let Err(e) = server.await {
                error!("iSpindel server failed: {e}");
            }
        });

        Ok(())
    }
}
