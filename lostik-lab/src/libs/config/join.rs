//! OTAA join credentials and retry policy.

use clap::{Arg, ArgMatches, Command, value_parser};
use serde::Deserialize;

use super::{arg_or_env, flag_arg_or_env, parse_arg_or_env};
use crate::libs::{
    error::Error,
    join::{DEF_DATA_RATE, DEF_MAX_ATTEMPTS, DEF_MAX_POLLS, DEF_POLL_INTERVAL_SECS},
};

/// Configuration file object.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    #[serde(rename = "appEui")]
    pub app_eui: Option<String>,
    #[serde(rename = "appKey")]
    pub app_key: Option<String>,
    #[serde(rename = "devEui")]
    pub dev_eui: Option<String>,
    #[serde(rename = "dataRate")]
    pub data_rate: Option<u8>,
    #[serde(rename = "maxAttempts")]
    pub max_attempts: Option<u32>,
    #[serde(rename = "retryOnReject")]
    pub retry_on_reject: Option<bool>,
    #[serde(rename = "retryBackoffSecs")]
    pub retry_backoff_secs: Option<u64>,
    #[serde(rename = "pollIntervalSecs")]
    pub poll_interval_secs: Option<u64>,
    #[serde(rename = "maxPolls")]
    pub max_polls: Option<u32>,
}

pub const DEF_RETRY_ON_REJECT: bool = true;
pub const DEF_RETRY_BACKOFF_SECS: u64 = 5;
const APP_EUI_LEN: usize = 16;
const APP_KEY_LEN: usize = 32;
const DEV_EUI_LEN: usize = 16;

/// To register Clap arguments.
pub fn reg_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("join.app-eui")
            .long("join.app-eui")
            .help("Application EUI, 16 hexadecimal digits")
            .num_args(1),
    )
    .arg(
        Arg::new("join.app-key")
            .long("join.app-key")
            .help("Application key, 32 hexadecimal digits")
            .num_args(1),
    )
    .arg(
        Arg::new("join.dev-eui")
            .long("join.dev-eui")
            .help("Device EUI, 16 hexadecimal digits")
            .num_args(1),
    )
    .arg(
        Arg::new("join.data-rate")
            .long("join.data-rate")
            .value_parser(value_parser!(u8))
            .help("Data rate set before joining, default 5")
            .num_args(1),
    )
    .arg(
        Arg::new("join.max-attempts")
            .long("join.max-attempts")
            .value_parser(value_parser!(u32))
            .help("Join attempts including the first one, default 5")
            .num_args(1),
    )
    .arg(
        Arg::new("join.retry-on-reject")
            .long("join.retry-on-reject")
            .help("Restart the join on `denied`/`no_free_ch` (1/0), default 1")
            .num_args(1),
    )
    .arg(
        Arg::new("join.retry-backoff-secs")
            .long("join.retry-backoff-secs")
            .value_parser(value_parser!(u64))
            .help("Wait before a new join attempt in seconds, default 5")
            .num_args(1),
    )
    .arg(
        Arg::new("join.poll-interval-secs")
            .long("join.poll-interval-secs")
            .value_parser(value_parser!(u64))
            .help("Connection state poll interval in seconds, default 10")
            .num_args(1),
    )
    .arg(
        Arg::new("join.max-polls")
            .long("join.max-polls")
            .value_parser(value_parser!(u32))
            .help("Polls before giving up, default 5")
            .num_args(1),
    )
}

/// To read input arguments from command-line arguments and environment variables.
///
/// This function will call [`apply_default()`] to fill missing values so you do not need call it
/// again.
pub fn read_args(args: &ArgMatches) -> Config {
    apply_default(&Config {
        app_eui: arg_or_env(args, "join.app-eui", "LOSTIK_JOIN_APP_EUI"),
        app_key: arg_or_env(args, "join.app-key", "LOSTIK_JOIN_APP_KEY"),
        dev_eui: arg_or_env(args, "join.dev-eui", "LOSTIK_JOIN_DEV_EUI"),
        data_rate: parse_arg_or_env(args, "join.data-rate", "LOSTIK_JOIN_DATA_RATE"),
        max_attempts: parse_arg_or_env(args, "join.max-attempts", "LOSTIK_JOIN_MAX_ATTEMPTS"),
        retry_on_reject: flag_arg_or_env(
            args,
            "join.retry-on-reject",
            "LOSTIK_JOIN_RETRY_ON_REJECT",
        ),
        retry_backoff_secs: parse_arg_or_env(
            args,
            "join.retry-backoff-secs",
            "LOSTIK_JOIN_RETRY_BACKOFF_SECS",
        ),
        poll_interval_secs: parse_arg_or_env(
            args,
            "join.poll-interval-secs",
            "LOSTIK_JOIN_POLL_INTERVAL_SECS",
        ),
        max_polls: parse_arg_or_env(args, "join.max-polls", "LOSTIK_JOIN_MAX_POLLS"),
    })
}

/// Fill missing configuration with default values.
pub fn apply_default(config: &Config) -> Config {
    Config {
        app_eui: Some(config.app_eui.clone().unwrap_or_default()),
        app_key: Some(config.app_key.clone().unwrap_or_default()),
        dev_eui: Some(config.dev_eui.clone().unwrap_or_default()),
        data_rate: Some(config.data_rate.unwrap_or(DEF_DATA_RATE)),
        max_attempts: Some(config.max_attempts.unwrap_or(DEF_MAX_ATTEMPTS)),
        retry_on_reject: Some(config.retry_on_reject.unwrap_or(DEF_RETRY_ON_REJECT)),
        retry_backoff_secs: Some(config.retry_backoff_secs.unwrap_or(DEF_RETRY_BACKOFF_SECS)),
        poll_interval_secs: Some(config.poll_interval_secs.unwrap_or(DEF_POLL_INTERVAL_SECS)),
        max_polls: Some(config.max_polls.unwrap_or(DEF_MAX_POLLS)),
    }
}

/// Check the length and the hexadecimal format of the device identity.
pub fn validate(config: &Config) -> Result<(), Error> {
    check_hex("appEui", config.app_eui.as_deref(), APP_EUI_LEN)?;
    check_hex("appKey", config.app_key.as_deref(), APP_KEY_LEN)?;
    check_hex("devEui", config.dev_eui.as_deref(), DEV_EUI_LEN)
}

fn check_hex(name: &'static str, value: Option<&str>, expect: usize) -> Result<(), Error> {
    match value {
        Some(v) if v.len() == expect && hex::decode(v).is_ok() => Ok(()),
        _ => Err(Error::KeyLength { name, expect }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(app_eui: &str, app_key: &str, dev_eui: &str) -> Config {
        apply_default(&Config {
            app_eui: Some(app_eui.to_string()),
            app_key: Some(app_key.to_string()),
            dev_eui: Some(dev_eui.to_string()),
            ..Default::default()
        })
    }

    #[test]
    fn defaults() {
        let conf = apply_default(&Config::default());
        assert_eq!(conf.data_rate, Some(5));
        assert_eq!(conf.max_attempts, Some(5));
        assert_eq!(conf.retry_on_reject, Some(true));
        assert_eq!(conf.poll_interval_secs, Some(10));
        assert_eq!(conf.max_polls, Some(5));
    }

    #[test]
    fn key_lengths() {
        let ok = identity(
            "70B3D57ED0000001",
            "00112233445566778899AABBCCDDEEFF",
            "0004A30B001C0530",
        );
        assert!(validate(&ok).is_ok());

        let short_key = identity("70B3D57ED0000001", "0011", "0004A30B001C0530");
        assert!(matches!(
            validate(&short_key),
            Err(Error::KeyLength { name: "appKey", expect: 32 })
        ));

        let not_hex = identity(
            "70B3D57ED000000Z",
            "00112233445566778899AABBCCDDEEFF",
            "0004A30B001C0530",
        );
        assert!(matches!(
            validate(&not_hex),
            Err(Error::KeyLength { name: "appEui", .. })
        ));

        assert!(validate(&apply_default(&Config::default())).is_err());
    }

    #[test]
    fn json5_file_section() {
        let conf: Config = json5::from_str(
            r#"{ appEui: "70B3D57ED0000001", retryOnReject: false, maxPolls: 12 }"#,
        )
        .unwrap();
        let conf = apply_default(&conf);
        assert_eq!(conf.app_eui.as_deref(), Some("70B3D57ED0000001"));
        assert_eq!(conf.retry_on_reject, Some(false));
        assert_eq!(conf.max_polls, Some(12));
        assert_eq!(conf.max_attempts, Some(5));
    }
}
