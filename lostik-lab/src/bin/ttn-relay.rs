use std::{error::Error as StdError, fs, process, time::Duration};

use chrono::Utc;
use clap::{Arg as ClapArg, Command};
use log::error;
use serde::Deserialize;
use sylvia_iot_sdk::util::logger;
use url::Url;

use lostik_lab::libs::{
    self,
    relay::{Options, Relay},
    telemetry::{InfluxSink, TelemetrySink},
};

#[derive(Deserialize)]
struct AppConfig {
    log: logger::Config,
    #[serde(default)]
    influx: libs::config::influx::Config,
    #[serde(default)]
    ttn: libs::config::ttn::Config,
}

const PROJ_NAME: &'static str = "ttn-relay";
const PROJ_VER: &'static str = env!("CARGO_PKG_VERSION");
const DEF_MQTT_PORT: u16 = 1883;
const KEEP_ALIVE_SECS: u64 = 60;

/// Stores the airtime and gateway RSSI reported by The Things Network into InfluxDB.
#[tokio::main]
async fn main() {
    const FN_NAME: &'static str = "main";

    let conf = match init_config() {
        Err(e) => {
            let conf = &logger::Config {
                ..Default::default()
            };
            logger::init(PROJ_NAME, &conf);
            error!("[{}] read config error: {}", FN_NAME, e);
            process::exit(1);
        }
        Ok(conf) => conf,
    };

    logger::init(PROJ_NAME, &conf.log);

    let influx_conf = libs::config::influx::apply_default(&conf.influx);
    let ttn_conf = libs::config::ttn::apply_default(&conf.ttn);

    let mq_uri = ttn_conf.mq_uri.unwrap();
    let (host, port) = match Url::parse(mq_uri.as_str()) {
        Err(e) => {
            error!("[{}] invalid MQTT URI {}: {}", FN_NAME, mq_uri, e);
            process::exit(1);
        }
        Ok(uri) => match uri.host_str() {
            None => {
                error!("[{}] no host in MQTT URI {}", FN_NAME, mq_uri);
                process::exit(1);
            }
            Some(host) => (host.to_string(), uri.port().unwrap_or(DEF_MQTT_PORT)),
        },
    };

    // create influx connection
    let db_name = influx_conf.db_name.unwrap();
    let sink = match InfluxSink::new(influx_conf.db_uri.unwrap().as_str(), db_name.as_str()) {
        Err(e) => {
            error!("[{}] {}", FN_NAME, e);
            process::exit(1);
        }
        Ok(sink) => sink,
    };
    if let Err(e) = sink.ensure_database(db_name.as_str()).await {
        error!("[{}] {}", FN_NAME, e);
        process::exit(1);
    }

    let opts = Options {
        host,
        port,
        client_id: format!("{}-{}", PROJ_NAME, Utc::now().timestamp_millis()),
        app_id: ttn_conf.app_id.unwrap(),
        access_key: ttn_conf.access_key.unwrap(),
        keep_alive: Duration::from_secs(KEEP_ALIVE_SECS),
    };
    let relay = Relay::new(
        &sink,
        ttn_conf.measurement.unwrap().as_str(),
        libs::device_tags(ttn_conf.dev_eui.unwrap().as_str()),
    );
    if let Err(e) = relay.run(&opts).await {
        error!("[{}] {}", FN_NAME, e);
        process::exit(1);
    }
}

fn init_config() -> Result<AppConfig, Box<dyn StdError>> {
    let mut args = Command::new(PROJ_NAME).version(PROJ_VER).arg(
        ClapArg::new("file")
            .short('f')
            .long("file")
            .help("config file")
            .num_args(1),
    );
    args = logger::reg_args(args);
    args = libs::config::influx::reg_args(args);
    args = libs::config::ttn::reg_args(args);
    let args = args.get_matches();

    if let Some(v) = args.get_one::<String>("file") {
        let conf_str = fs::read_to_string(v)?;
        return Ok(json5::from_str(conf_str.as_str())?);
    }

    Ok(AppConfig {
        log: logger::read_args(&args),
        influx: libs::config::influx::read_args(&args),
        ttn: libs::config::ttn::read_args(&args),
    })
}
