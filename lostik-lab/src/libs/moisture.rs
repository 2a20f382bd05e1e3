//! Chirp capacitive soil moisture sensor on a Modbus RTU (RS485) adapter.
//!
//! Only function 0x04 (read input registers) is used:
//! - register 0: capacitance (moisture), raw count
//! - register 1: temperature in 0.1 C, signed

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use rmodbus::{ModbusProto, client::ModbusRequest, guess_response_frame_len};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    time,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::error::Error;

/// One sensor sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SoilReading {
    pub moisture: f64,
    /// Celsius.
    pub temperature: f64,
}

/// A sensor polled once per measurement iteration.
#[async_trait]
pub trait SoilSensor: Send {
    async fn read(&mut self) -> Result<SoilReading, Error>;
}

pub struct ChirpSensor<S = SerialStream> {
    port: S,
    address: u8,
}

pub const DEF_ADDRESS: u8 = 1;
pub const DEF_BAUD_RATE: u32 = 19200;
const REG_MOISTURE: u16 = 0;
const REG_TEMPERATURE: u16 = 1;
const TIMEOUT_MS: u64 = 1000;
/// Address, function and byte count (or exception code) come first in every RTU response.
const HEADER_LEN: usize = 3;

impl ChirpSensor<SerialStream> {
    pub fn open(path: &str, address: u8) -> Result<Self, Error> {
        const FN_NAME: &'static str = "ChirpSensor::open";

        let port = match tokio_serial::new(path, DEF_BAUD_RATE)
            .timeout(Duration::from_secs(1))
            .open_native_async()
        {
            Err(e) => {
                return Err(Error::PortUnavailable {
                    path: path.to_string(),
                    source: e,
                });
            }
            Ok(port) => port,
        };
        info!("[{}] sensor {} on {}", FN_NAME, address, path);
        Ok(ChirpSensor::new(port, address))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin + Send> ChirpSensor<S> {
    pub fn new(port: S, address: u8) -> Self {
        ChirpSensor { port, address }
    }

    pub async fn moisture(&mut self) -> Result<u16, Error> {
        self.read_input_register(REG_MOISTURE).await
    }

    pub async fn temperature(&mut self) -> Result<f64, Error> {
        let raw = self.read_input_register(REG_TEMPERATURE).await?;
        Ok(raw as i16 as f64 / 10.0)
    }

    async fn read_input_register(&mut self, register: u16) -> Result<u16, Error> {
        const FN_NAME: &'static str = "ChirpSensor::read_input_register";

        let mut mreq = ModbusRequest::new(self.address, ModbusProto::Rtu);
        let mut request: Vec<u8> = vec![];
        if let Err(e) = mreq.generate_get_inputs(register, 1, &mut request) {
            return Err(Error::Modbus(format!("build request: {:?}", e)));
        }
        debug!("[{}] request {}", FN_NAME, hex::encode(&request));
        self.port.write_all(&request).await?;
        self.port.flush().await?;

        let response = match time::timeout(
            Duration::from_millis(TIMEOUT_MS),
            self.read_response(),
        )
        .await
        {
            Err(_) => return Err(Error::Modbus("response timeout".to_string())),
            Ok(response) => response?,
        };
        debug!("[{}] response {}", FN_NAME, hex::encode(&response));

        let mut values: Vec<u16> = vec![];
        if let Err(e) = mreq.parse_u16(&response, &mut values) {
            return Err(Error::Modbus(format!("{:?}", e)));
        }
        match values.first() {
            None => Err(Error::Modbus("empty response".to_string())),
            Some(v) => Ok(*v),
        }
    }

    /// Read one whole response frame. Validation is left to the request parser.
    async fn read_response(&mut self) -> Result<Vec<u8>, Error> {
        let mut frame = vec![0u8; HEADER_LEN];
        self.port.read_exact(&mut frame).await?;
        let len = match guess_response_frame_len(&frame, ModbusProto::Rtu) {
            Err(e) => return Err(Error::Modbus(format!("{:?}", e))),
            Ok(len) => len as usize,
        };
        if len > HEADER_LEN {
            frame.resize(len, 0);
            self.port.read_exact(&mut frame[HEADER_LEN..]).await?;
        }
        Ok(frame)
    }
}

#[async_trait]
impl<S: AsyncRead + AsyncWrite + Unpin + Send> SoilSensor for ChirpSensor<S> {
    async fn read(&mut self) -> Result<SoilReading, Error> {
        const FN_NAME: &'static str = "ChirpSensor::read";

        let moisture = self.moisture().await?;
        let temperature = self.temperature().await?;
        info!(
            "[{}] moisture: {}, temperature: {} C",
            FN_NAME, moisture, temperature
        );
        Ok(SoilReading {
            moisture: moisture as f64,
            temperature,
        })
    }
}
