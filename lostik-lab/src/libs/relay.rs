//! Relays The Things Network MQTT events into the telemetry sink.
//!
//! - Uplink events give the uplink airtime and the RSSI of every receiving gateway.
//! - Downlink sent events give the downlink airtime.

use std::{collections::BTreeMap, time::Duration};

use log::{debug, error, info, warn};
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS,
};
use serde::Deserialize;
use tokio::time;

use super::{
    error::Error,
    telemetry::{FieldValue, Point, Record, TelemetrySink},
};

pub const UPLINK_TOPIC: &'static str = "+/devices/+/up";
pub const DOWNLINK_TOPIC: &'static str = "+/devices/+/events/down/sent";

/// Event kind derived from the topic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Direction {
    Uplink,
    Downlink,
}

pub struct Options {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Application ID, used as MQTT user name.
    pub app_id: String,
    /// Application access key, used as MQTT password.
    pub access_key: String,
    pub keep_alive: Duration,
}

pub struct Relay<'a, K: ?Sized> {
    sink: &'a K,
    measurement: String,
    tags: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct UplinkEvent {
    metadata: UplinkMetadata,
}

#[derive(Deserialize)]
struct UplinkMetadata {
    airtime: f64,
    gateways: Vec<GatewayMetadata>,
}

#[derive(Deserialize)]
struct GatewayMetadata {
    rssi: f64,
}

#[derive(Deserialize)]
struct DownlinkEvent {
    config: DownlinkConfig,
}

#[derive(Deserialize)]
struct DownlinkConfig {
    airtime: f64,
}

const RECONNECT_SLEEP_MS: u64 = 1000;

impl Direction {
    pub fn from_topic(topic: &str) -> Option<Self> {
        if topic.ends_with("/up") {
            Some(Direction::Uplink)
        } else if topic.ends_with("/events/down/sent") {
            Some(Direction::Downlink)
        } else {
            None
        }
    }
}

/// Extract the fields of one event payload.
///
/// `gw_rssi` (mean gateway RSSI) is only present when two or more gateways received the uplink.
pub fn extract_fields(topic: &str, payload: &[u8]) -> Result<Record, Error> {
    let malformed = |reason: String| Error::MalformedPayload {
        topic: topic.to_string(),
        reason,
    };

    let mut fields = Record::new();
    match Direction::from_topic(topic) {
        None => return Err(malformed("unknown topic".to_string())),
        Some(Direction::Uplink) => {
            let event: UplinkEvent =
                serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
            fields.insert(
                "airtimeUL".to_string(),
                FieldValue::from(event.metadata.airtime),
            );
            let gateways = &event.metadata.gateways;
            if gateways.len() > 1 {
                let sum: f64 = gateways.iter().map(|gw| gw.rssi).sum();
                fields.insert(
                    "gw_rssi".to_string(),
                    FieldValue::from(sum / gateways.len() as f64),
                );
            }
        }
        Some(Direction::Downlink) => {
            let event: DownlinkEvent =
                serde_json::from_slice(payload).map_err(|e| malformed(e.to_string()))?;
            fields.insert(
                "airtimeDL".to_string(),
                FieldValue::from(event.config.airtime),
            );
        }
    }
    Ok(fields)
}

impl<'a, K: TelemetrySink + ?Sized> Relay<'a, K> {
    pub fn new(sink: &'a K, measurement: &str, tags: BTreeMap<String, String>) -> Self {
        Relay {
            sink,
            measurement: measurement.to_string(),
            tags,
        }
    }

    /// Convert one MQTT message into a point and write it.
    ///
    /// Returns `true` when a point was written. Every failure is logged and the message dropped.
    pub async fn handle_message(&self, topic: &str, payload: &[u8]) -> bool {
        const FN_NAME: &'static str = "Relay::handle_message";

        let fields = match extract_fields(topic, payload) {
            Err(e) => {
                warn!("[{}] {}", FN_NAME, e);
                return false;
            }
            Ok(fields) => fields,
        };
        let point = Point::new(&self.measurement, &self.tags, fields);
        info!("[{}] output: {:?}", FN_NAME, point.fields);
        if let Err(e) = self.sink.write(&point).await {
            error!("[{}] {}", FN_NAME, e);
            return false;
        }
        true
    }

    /// Connect to the broker and relay messages until the connection is refused.
    pub async fn run(&self, opts: &Options) -> Result<(), Error> {
        const FN_NAME: &'static str = "Relay::run";

        let mut mqtt_opts = MqttOptions::new(opts.client_id.as_str(), opts.host.as_str(), opts.port);
        mqtt_opts.set_keep_alive(opts.keep_alive);
        mqtt_opts.set_credentials(opts.app_id.as_str(), opts.access_key.as_str());
        let (client, mut event_loop) = AsyncClient::new(mqtt_opts, 10);

        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    info!("[{}] connected with result code: {:?}", FN_NAME, ack.code);
                    if ack.code != ConnectReturnCode::Success {
                        return Err(Error::ConnectRefused(format!("{:?}", ack.code)));
                    }
                    // subscribe for all devices of the application
                    for topic in [UPLINK_TOPIC, DOWNLINK_TOPIC] {
                        if let Err(e) = client.subscribe(topic, QoS::AtMostOnce).await {
                            return Err(Error::Mqtt(e.to_string()));
                        }
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    info!("[{}] subscribed: {} {:?}", FN_NAME, ack.pkid, ack.return_codes);
                }
                Ok(Event::Incoming(Packet::Publish(msg))) => {
                    self.handle_message(msg.topic.as_str(), &msg.payload).await;
                }
                Ok(event) => debug!("[{}] {:?}", FN_NAME, event),
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(Error::ConnectRefused(format!("{:?}", code)));
                }
                Err(e) => {
                    error!("[{}] connection error: {}", FN_NAME, e);
                    time::sleep(Duration::from_millis(RECONNECT_SLEEP_MS)).await;
                }
            }
        }
    }
}
