//! Error types shared by the serial, telemetry and relay modules.

use std::io::Error as IoError;

use thiserror::Error as ThisError;

#[derive(Debug, ThisError)]
pub enum Error {
    /// The serial device node is missing, busy or not permitted.
    #[error("serial port {path} unavailable: {source}")]
    PortUnavailable {
        path: String,
        #[source]
        source: tokio_serial::Error,
    },
    /// The remote end of the serial link was closed.
    #[error("serial port closed")]
    PortClosed,
    #[error("I/O error: {0}")]
    Io(#[from] IoError),
    /// The network answered the join request with `denied` or `no_free_ch`.
    #[error("join rejected: {0}")]
    JoinRejected(String),
    #[error("too many join attempts ({0})")]
    TooManyRetries(u32),
    #[error("create database error: {0}")]
    Database(String),
    #[error("telemetry write failed: {0}")]
    TelemetryWriteFailed(String),
    #[error("malformed payload on {topic}: {reason}")]
    MalformedPayload { topic: String, reason: String },
    #[error("MQTT connection refused: {0}")]
    ConnectRefused(String),
    #[error("MQTT error: {0}")]
    Mqtt(String),
    #[error("Modbus error: {0}")]
    Modbus(String),
    /// Device identity strings must be hexadecimal of a fixed length.
    #[error("{name} should be {expect} hexadecimal digits")]
    KeyLength { name: &'static str, expect: usize },
    #[error("invalid configuration: {0}")]
    Config(String),
}
