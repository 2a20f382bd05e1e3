//! The Things Network MQTT access.

use clap::{Arg, ArgMatches, Command};
use serde::Deserialize;

use super::arg_or_env;

/// Configuration file object.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    /// Broker URI such as `mqtt://eu.thethings.network:1883`.
    #[serde(rename = "mqUri")]
    pub mq_uri: Option<String>,
    #[serde(rename = "appId")]
    pub app_id: Option<String>,
    #[serde(rename = "accessKey")]
    pub access_key: Option<String>,
    /// Device EUI used as the `devEUI` tag.
    #[serde(rename = "devEui")]
    pub dev_eui: Option<String>,
    pub measurement: Option<String>,
}

pub const DEF_MQ_URI: &'static str = "mqtt://eu.thethings.network:1883";
pub const DEF_MEASUREMENT: &'static str = "LoStik";

/// To register Clap arguments.
pub fn reg_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("ttn.mq-uri")
            .long("ttn.mq-uri")
            .help("TTN MQTT broker URI")
            .num_args(1),
    )
    .arg(
        Arg::new("ttn.app-id")
            .long("ttn.app-id")
            .help("Application ID")
            .num_args(1),
    )
    .arg(
        Arg::new("ttn.access-key")
            .long("ttn.access-key")
            .help("Application access key")
            .num_args(1),
    )
    .arg(
        Arg::new("ttn.dev-eui")
            .long("ttn.dev-eui")
            .help("Device EUI tag")
            .num_args(1),
    )
    .arg(
        Arg::new("ttn.measurement")
            .long("ttn.measurement")
            .help("Measurement name, default `LoStik`")
            .num_args(1),
    )
}

/// To read input arguments from command-line arguments and environment variables.
///
/// This function will call [`apply_default()`] to fill missing values so you do not need call it
/// again.
pub fn read_args(args: &ArgMatches) -> Config {
    apply_default(&Config {
        mq_uri: arg_or_env(args, "ttn.mq-uri", "LOSTIK_TTN_MQ_URI"),
        app_id: arg_or_env(args, "ttn.app-id", "LOSTIK_TTN_APP_ID"),
        access_key: arg_or_env(args, "ttn.access-key", "LOSTIK_TTN_ACCESS_KEY"),
        dev_eui: arg_or_env(args, "ttn.dev-eui", "LOSTIK_TTN_DEV_EUI"),
        measurement: arg_or_env(args, "ttn.measurement", "LOSTIK_TTN_MEASUREMENT"),
    })
}

/// Fill missing configuration with default values.
pub fn apply_default(config: &Config) -> Config {
    Config {
        mq_uri: match config.mq_uri.as_ref() {
            None => Some(DEF_MQ_URI.to_string()),
            Some(uri) => Some(uri.clone()),
        },
        app_id: Some(config.app_id.clone().unwrap_or_default()),
        access_key: Some(config.access_key.clone().unwrap_or_default()),
        dev_eui: Some(config.dev_eui.clone().unwrap_or_default()),
        measurement: match config.measurement.as_ref() {
            None => Some(DEF_MEASUREMENT.to_string()),
            Some(name) => Some(name.clone()),
        },
    }
}
