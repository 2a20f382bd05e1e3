use std::time::Duration;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time,
};

use lostik_lab::libs::{
    TAG_DEV_EUI, device_tags,
    error::Error,
    relay::{DOWNLINK_TOPIC, Options, Relay, UPLINK_TOPIC},
    telemetry::{FieldValue, Point, TelemetrySink},
};

mod common;

use common::{DEV_EUI, MemorySink};

const CONNECT: u8 = 0x10;
const SUBSCRIBE: u8 = 0x82;
const CONNACK_ACCEPTED: u8 = 0;
const CONNACK_NOT_AUTHORIZED: u8 = 5;

/// Read one MQTT 3.1.1 packet: the fixed header byte and the body.
async fn read_packet(stream: &mut TcpStream) -> (u8, Vec<u8>) {
    let header = stream.read_u8().await.unwrap();
    let mut len = 0_usize;
    let mut shift = 0;
    loop {
        let b = stream.read_u8().await.unwrap();
        len |= ((b & 0x7f) as usize) << shift;
        if b & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await.unwrap();
    (header, body)
}

/// Accept one client, answer CONNECT with `code` and collect the topics of `subscriptions`
/// SUBSCRIBE packets.
async fn start_broker(code: u8, subscriptions: usize) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let (header, _) = read_packet(&mut stream).await;
        assert_eq!(header, CONNECT);
        stream.write_all(&[0x20, 0x02, 0x00, code]).await.unwrap();

        let mut topics = vec![];
        while topics.len() < subscriptions {
            let (header, body) = read_packet(&mut stream).await;
            if header != SUBSCRIBE {
                continue;
            }
            // packet identifier, topic length, topic, QoS
            let len = u16::from_be_bytes([body[2], body[3]]) as usize;
            topics.push(String::from_utf8(body[4..4 + len].to_vec()).unwrap());
        }
        topics
    });
    (port, handle)
}

fn relay_options(port: u16) -> Options {
    Options {
        host: "127.0.0.1".to_string(),
        port,
        client_id: "ttn-relay-test".to_string(),
        app_id: "lab-app".to_string(),
        access_key: "secret".to_string(),
        keep_alive: Duration::from_secs(60),
    }
}

#[tokio::test]
async fn refused_connection_is_fatal() {
    let (port, _broker) = start_broker(CONNACK_NOT_AUTHORIZED, 0).await;
    let sink = MemorySink::new();
    let relay = Relay::new(&sink, "LoStik", device_tags(DEV_EUI));

    let result = time::timeout(Duration::from_secs(10), relay.run(&relay_options(port)))
        .await
        .unwrap();
    assert!(matches!(result, Err(Error::ConnectRefused(_))));
}

#[tokio::test]
async fn subscribes_both_topics_on_connect() {
    let (port, broker) = start_broker(CONNACK_ACCEPTED, 2).await;
    let sink = MemorySink::new();
    let relay = Relay::new(&sink, "LoStik", device_tags(DEV_EUI));
    let opts = relay_options(port);

    let topics = time::timeout(Duration::from_secs(10), async {
        tokio::select! {
            result = relay.run(&opts) => panic!("relay stopped: {:?}", result),
            topics = broker => topics.unwrap(),
        }
    })
    .await
    .unwrap();
    assert_eq!(topics, vec![UPLINK_TOPIC, DOWNLINK_TOPIC]);
}

#[tokio::test]
async fn ensure_database_is_idempotent() {
    let sink = MemorySink::new();
    sink.ensure_database("lostik").await.unwrap();
    sink.ensure_database("lostik").await.unwrap();
    assert_eq!(sink.databases(), vec!["lostik".to_string()]);
}

const UP: &'static str = "lab-app/devices/lostik-01/up";
const DOWN: &'static str = "lab-app/devices/lostik-01/events/down/sent";

#[tokio::test]
async fn uplink_event_becomes_point() {
    let sink = MemorySink::new();
    let relay = Relay::new(&sink, "LoStik", device_tags(DEV_EUI));

    let payload = br#"{
        "app_id": "lab-app",
        "dev_id": "lostik-01",
        "metadata": {
            "airtime": 46336000,
            "gateways": [
                { "gtw_id": "gw-1", "rssi": -80, "snr": 9.5 },
                { "gtw_id": "gw-2", "rssi": -90, "snr": 7 }
            ]
        }
    }"#;
    assert!(relay.handle_message(UP, payload).await);

    let points = sink.points();
    assert_eq!(points.len(), 1);
    let point = &points[0];
    assert_eq!(point.measurement, "LoStik");
    assert_eq!(point.tags.get(TAG_DEV_EUI).map(|v| v.as_str()), Some(DEV_EUI));
    assert_eq!(point.fields.get("gw_rssi"), Some(&FieldValue::Float(-85.0)));
    assert_eq!(
        point.fields.get("airtimeUL"),
        Some(&FieldValue::Float(46336000.0))
    );
}

#[tokio::test]
async fn fields_are_not_carried_between_messages() {
    let sink = MemorySink::new();
    let relay = Relay::new(&sink, "LoStik", device_tags(DEV_EUI));

    let up = br#"{"metadata":{"airtime":46336000,"gateways":[{"rssi":-80},{"rssi":-90}]}}"#;
    let down = br#"{"config":{"airtime":41216000}}"#;
    assert!(relay.handle_message(UP, up).await);
    assert!(relay.handle_message(DOWN, down).await);

    let points = sink.points();
    assert_eq!(points.len(), 2);
    assert_eq!(points[1].fields.len(), 1);
    assert_eq!(
        points[1].fields.get("airtimeDL"),
        Some(&FieldValue::Float(41216000.0))
    );
}

#[tokio::test]
async fn malformed_payload_writes_nothing() {
    let sink = MemorySink::new();
    let relay = Relay::new(&sink, "LoStik", device_tags(DEV_EUI));

    assert!(!relay.handle_message(UP, b"not json").await);
    assert!(!relay.handle_message(DOWN, br#"{"config":{}}"#).await);
    assert!(
        !relay
            .handle_message("lab-app/devices/lostik-01/events/activations", b"{}")
            .await
    );
    assert!(sink.points().is_empty());
}

#[tokio::test]
async fn point_survives_json_encoding() {
    let sink = MemorySink::new();
    let relay = Relay::new(&sink, "LoStik", device_tags(DEV_EUI));
    let payload = br#"{"metadata":{"airtime":46336000,"gateways":[{"rssi":-80}]}}"#;
    assert!(relay.handle_message(UP, payload).await);

    let point = sink.points().remove(0);
    let json = serde_json::to_string(&point).unwrap();
    let back: Point = serde_json::from_str(json.as_str()).unwrap();
    assert_eq!(back, point);
    assert!(back.fields.get("gw_rssi").is_none());
}
