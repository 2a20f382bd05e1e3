//! Program configurations.
//!
//! Every section follows the same pattern:
//! - `reg_args()` registers `--<section>.<key>` Clap arguments.
//! - `read_args()` reads them, falling back to `LOSTIK_<SECTION>_<KEY>` environment variables.
//! - `apply_default()` fills missing values.

use std::{env, str::FromStr};

use clap::ArgMatches;

pub mod influx;
pub mod join;
pub mod lostik;
pub mod monitor;
pub mod ttn;

/// Read a string argument or its environment variable.
pub(crate) fn arg_or_env(args: &ArgMatches, id: &str, env_name: &str) -> Option<String> {
    match args.get_one::<String>(id) {
        None => match env::var(env_name) {
            Err(_) => None,
            Ok(v) => Some(v),
        },
        Some(v) => Some(v.clone()),
    }
}

/// Read a typed argument or parse its environment variable.
///
/// The argument must be registered with a matching `value_parser` so Clap rejects bad input.
/// Unparsable environment values are ignored.
pub(crate) fn parse_arg_or_env<T>(args: &ArgMatches, id: &str, env_name: &str) -> Option<T>
where
    T: FromStr + Clone + Send + Sync + 'static,
{
    match args.get_one::<T>(id) {
        Some(v) => Some(v.clone()),
        None => match env::var(env_name) {
            Err(_) => None,
            Ok(v) => match v.parse::<T>() {
                Err(_) => None,
                Ok(v) => Some(v),
            },
        },
    }
}

/// Parse on/off flags such as `1`, `true`, `on` and `0`, `false`, `off`.
pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

pub(crate) fn flag_arg_or_env(args: &ArgMatches, id: &str, env_name: &str) -> Option<bool> {
    match arg_or_env(args, id, env_name) {
        None => None,
        Some(v) => parse_flag(v.as_str()),
    }
}
