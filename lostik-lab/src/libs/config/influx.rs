//! InfluxDB connection.

use clap::{Arg, ArgMatches, Command};
use serde::Deserialize;

use super::arg_or_env;

/// Configuration file object.
#[derive(Clone, Default, Deserialize)]
pub struct Config {
    /// Server root such as `http://localhost:8086`.
    #[serde(rename = "dbUri")]
    pub db_uri: Option<String>,
    #[serde(rename = "dbName")]
    pub db_name: Option<String>,
}

pub const DEF_DB_URI: &'static str = "http://localhost:8086";
pub const DEF_DB_NAME: &'static str = "lostik";

/// To register Clap arguments.
pub fn reg_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("influx.db-uri")
            .long("influx.db-uri")
            .help("InfluxDB URI, default `http://localhost:8086`")
            .num_args(1),
    )
    .arg(
        Arg::new("influx.db-name")
            .long("influx.db-name")
            .help("Database name, default `lostik`")
            .num_args(1),
    )
}

/// To read input arguments from command-line arguments and environment variables.
///
/// This function will call [`apply_default()`] to fill missing values so you do not need call it
/// again.
pub fn read_args(args: &ArgMatches) -> Config {
    apply_default(&Config {
        db_uri: arg_or_env(args, "influx.db-uri", "LOSTIK_INFLUX_DB_URI"),
        db_name: arg_or_env(args, "influx.db-name", "LOSTIK_INFLUX_DB_NAME"),
    })
}

/// Fill missing configuration with default values.
pub fn apply_default(config: &Config) -> Config {
    Config {
        db_uri: match config.db_uri.as_ref() {
            None => Some(DEF_DB_URI.to_string()),
            Some(uri) => Some(uri.clone()),
        },
        db_name: match config.db_name.as_ref() {
            None => Some(DEF_DB_NAME.to_string()),
            Some(name) => Some(name.clone()),
        },
    }
}
