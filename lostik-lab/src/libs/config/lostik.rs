//! Serial port of the LoStik modem.

use clap::{Arg, ArgMatches, Command, value_parser};
use serde::Deserialize;

use super::{arg_or_env, parse_arg_or_env};
use crate::libs::lostik_usb::{self, DEF_BAUD_RATE, DEF_SETTLE_MS};

/// Configuration file object.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    /// Serial port device path such as `/dev/ttyUSB0`. Probed when missing.
    #[serde(rename = "devPath")]
    pub dev_path: Option<String>,
    #[serde(rename = "baudRate")]
    pub baud_rate: Option<u32>,
    /// Delay after each command in milliseconds.
    #[serde(rename = "settleMs")]
    pub settle_ms: Option<u64>,
    /// Deadline of a labelled response in milliseconds.
    #[serde(rename = "responseTimeoutMs")]
    pub response_timeout_ms: Option<u64>,
}

pub const DEF_DEV_PATH: &'static str = "/dev/ttyUSB0";
pub const DEF_RESPONSE_TIMEOUT_MS: u64 = 5000;

/// To register Clap arguments.
pub fn reg_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("lostik.dev-path")
            .long("lostik.dev-path")
            .help("Device path such as `/dev/ttyUSB0`, probed when not set")
            .num_args(1),
    )
    .arg(
        Arg::new("lostik.baud-rate")
            .long("lostik.baud-rate")
            .value_parser(value_parser!(u32))
            .help("Serial baud rate, default 57600")
            .num_args(1),
    )
    .arg(
        Arg::new("lostik.settle-ms")
            .long("lostik.settle-ms")
            .value_parser(value_parser!(u64))
            .help("Delay after each command in milliseconds, default 500")
            .num_args(1),
    )
    .arg(
        Arg::new("lostik.response-timeout-ms")
            .long("lostik.response-timeout-ms")
            .value_parser(value_parser!(u64))
            .help("Deadline of one query response in milliseconds, default 5000")
            .num_args(1),
    )
}

/// To read input arguments from command-line arguments and environment variables.
///
/// This function will call [`apply_default()`] to fill missing values so you do not need call it
/// again.
pub fn read_args(args: &ArgMatches) -> Config {
    apply_default(&Config {
        dev_path: arg_or_env(args, "lostik.dev-path", "LOSTIK_DEV_PATH"),
        baud_rate: parse_arg_or_env(args, "lostik.baud-rate", "LOSTIK_BAUD_RATE"),
        settle_ms: parse_arg_or_env(args, "lostik.settle-ms", "LOSTIK_SETTLE_MS"),
        response_timeout_ms: parse_arg_or_env(
            args,
            "lostik.response-timeout-ms",
            "LOSTIK_RESPONSE_TIMEOUT_MS",
        ),
    })
}

/// Fill missing configuration with default values.
pub fn apply_default(config: &Config) -> Config {
    Config {
        dev_path: match config.dev_path.as_ref() {
            None => match lostik_usb::detect_port() {
                None => Some(DEF_DEV_PATH.to_string()),
                Some(path) => Some(path),
            },
            Some(path) => Some(path.clone()),
        },
        baud_rate: match config.baud_rate {
            None => Some(DEF_BAUD_RATE),
            Some(rate) => Some(rate),
        },
        settle_ms: match config.settle_ms {
            None => Some(DEF_SETTLE_MS),
            Some(ms) => Some(ms),
        },
        response_timeout_ms: match config.response_timeout_ms {
            None => Some(DEF_RESPONSE_TIMEOUT_MS),
            Some(ms) => Some(ms),
        },
    }
}
