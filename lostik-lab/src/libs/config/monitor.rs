//! Measurement runs, intervals and the optional soil sensor.

use clap::{Arg, ArgMatches, Command, value_parser};
use serde::Deserialize;

use super::{arg_or_env, flag_arg_or_env, parse_arg_or_env};
use crate::libs::{
    cycle::{DEF_MEASUREMENT, DEF_STEP, DEF_WARM_UP},
    moisture,
};

/// Configuration file object.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    pub runs: Option<u32>,
    /// Uplink interval in seconds.
    #[serde(rename = "ulInterval")]
    pub ul_interval: Option<u64>,
    /// Link-check (downlink) interval in seconds.
    #[serde(rename = "dlInterval")]
    pub dl_interval: Option<u64>,
    /// Shorten the intervals after every uplink.
    #[serde(rename = "adaptInterval")]
    pub adapt_interval: Option<bool>,
    #[serde(rename = "warmUp")]
    pub warm_up: Option<u32>,
    pub step: Option<u64>,
    #[serde(rename = "resendLinkchk")]
    pub resend_linkchk: Option<bool>,
    pub measurement: Option<String>,
    /// Device EUI used as the `devEUI` tag.
    #[serde(rename = "devEui")]
    pub dev_eui: Option<String>,
    /// Serial port of the soil moisture sensor. No sensor when missing.
    #[serde(rename = "moisturePath")]
    pub moisture_path: Option<String>,
    #[serde(rename = "moistureAddress")]
    pub moisture_address: Option<u8>,
}

pub const DEF_RUNS: u32 = 10;
pub const DEF_UL_INTERVAL: u64 = 600;
pub const DEF_DL_INTERVAL: u64 = 600;
pub const DEF_RESEND_LINKCHK: bool = true;

/// To register Clap arguments.
pub fn reg_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("monitor.runs")
            .long("monitor.runs")
            .value_parser(value_parser!(u32))
            .help("Number of uplink messages, default 10")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.ul-interval")
            .long("monitor.ul-interval")
            .value_parser(value_parser!(u64))
            .help("Interval for sending uplinks in seconds, default 600")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.dl-interval")
            .long("monitor.dl-interval")
            .value_parser(value_parser!(u64))
            .help("Interval for link-check downlinks in seconds, default 600")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.adapt-interval")
            .long("monitor.adapt-interval")
            .help("Decrease the intervals after each uplink (1/0), default 0")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.warm-up")
            .long("monitor.warm-up")
            .value_parser(value_parser!(u32))
            .help("Uplinks before the intervals start decreasing, default 10")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.step")
            .long("monitor.step")
            .value_parser(value_parser!(u64))
            .help("Interval decrement in seconds, default 30")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.resend-linkchk")
            .long("monitor.resend-linkchk")
            .help("Re-apply the link-check interval when it changes (1/0), default 1")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.measurement")
            .long("monitor.measurement")
            .help("Measurement name, default `LoStik`")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.dev-eui")
            .long("monitor.dev-eui")
            .help("Device EUI tag")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.moisture-path")
            .long("monitor.moisture-path")
            .help("Soil moisture sensor port such as `/dev/ttyUSB1`")
            .num_args(1),
    )
    .arg(
        Arg::new("monitor.moisture-address")
            .long("monitor.moisture-address")
            .value_parser(value_parser!(u8))
            .help("Soil moisture sensor Modbus address, default 1")
            .num_args(1),
    )
}

/// To read input arguments from command-line arguments and environment variables.
///
/// This function will call [`apply_default()`] to fill missing values so you do not need call it
/// again.
pub fn read_args(args: &ArgMatches) -> Config {
    apply_default(&Config {
        runs: parse_arg_or_env(args, "monitor.runs", "LOSTIK_MONITOR_RUNS"),
        ul_interval: parse_arg_or_env(args, "monitor.ul-interval", "LOSTIK_MONITOR_UL_INTERVAL"),
        dl_interval: parse_arg_or_env(args, "monitor.dl-interval", "LOSTIK_MONITOR_DL_INTERVAL"),
        adapt_interval: flag_arg_or_env(
            args,
            "monitor.adapt-interval",
            "LOSTIK_MONITOR_ADAPT_INTERVAL",
        ),
        warm_up: parse_arg_or_env(args, "monitor.warm-up", "LOSTIK_MONITOR_WARM_UP"),
        step: parse_arg_or_env(args, "monitor.step", "LOSTIK_MONITOR_STEP"),
        resend_linkchk: flag_arg_or_env(
            args,
            "monitor.resend-linkchk",
            "LOSTIK_MONITOR_RESEND_LINKCHK",
        ),
        measurement: arg_or_env(args, "monitor.measurement", "LOSTIK_MONITOR_MEASUREMENT"),
        dev_eui: arg_or_env(args, "monitor.dev-eui", "LOSTIK_MONITOR_DEV_EUI"),
        moisture_path: arg_or_env(args, "monitor.moisture-path", "LOSTIK_MONITOR_MOISTURE_PATH"),
        moisture_address: parse_arg_or_env(
            args,
            "monitor.moisture-address",
            "LOSTIK_MONITOR_MOISTURE_ADDRESS",
        ),
    })
}

/// Fill missing configuration with default values.
pub fn apply_default(config: &Config) -> Config {
    Config {
        runs: Some(config.runs.unwrap_or(DEF_RUNS)),
        ul_interval: Some(config.ul_interval.unwrap_or(DEF_UL_INTERVAL)),
        dl_interval: Some(config.dl_interval.unwrap_or(DEF_DL_INTERVAL)),
        adapt_interval: Some(config.adapt_interval.unwrap_or(false)),
        warm_up: Some(config.warm_up.unwrap_or(DEF_WARM_UP)),
        step: Some(config.step.unwrap_or(DEF_STEP)),
        resend_linkchk: Some(config.resend_linkchk.unwrap_or(DEF_RESEND_LINKCHK)),
        measurement: match config.measurement.as_ref() {
            None => Some(DEF_MEASUREMENT.to_string()),
            Some(name) => Some(name.clone()),
        },
        dev_eui: Some(config.dev_eui.clone().unwrap_or_default()),
        moisture_path: config.moisture_path.clone(),
        moisture_address: Some(config.moisture_address.unwrap_or(moisture::DEF_ADDRESS)),
    }
}

#[cfg(test)]
mod tests {
    use clap::Command;

    use super::*;

    #[test]
    fn adapt_flag_from_args() {
        let args = reg_args(Command::new("test")).get_matches_from([
            "test",
            "--monitor.adapt-interval",
            "1",
            "--monitor.runs",
            "3",
            "--monitor.warm-up",
            "20",
        ]);
        let conf = read_args(&args);
        assert_eq!(conf.adapt_interval, Some(true));
        assert_eq!(conf.runs, Some(3));
        assert_eq!(conf.warm_up, Some(20));
        assert_eq!(conf.step, Some(30));
        assert_eq!(conf.moisture_path, None);
    }

    #[test]
    fn non_numeric_runs_is_rejected() {
        let cmd = reg_args(Command::new("test"));
        assert!(
            cmd.clone()
                .try_get_matches_from(["test", "--monitor.runs", "abc"])
                .is_err()
        );
        assert!(
            cmd.try_get_matches_from(["test", "--monitor.moisture-address", "300"])
                .is_err()
        );
    }
}
