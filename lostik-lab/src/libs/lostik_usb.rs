//! LoStik (RN2483/RN2903) USB serial port operations.
//!
//! The modem speaks a line protocol: commands are ASCII terminated by `\r\n` and every response is
//! one ASCII line terminated by `\n`.

use std::{path::Path, time::Duration};

use log::{info, warn};
use tokio::{
    io::{
        self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf,
        WriteHalf,
    },
    time,
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use super::error::Error;

/// Provides functions to talk to the LoStik modem.
///
/// The channel owns the port. Sequencers borrow it mutably so only one of them can issue commands
/// at a time.
pub struct LostikUsb<S = SerialStream> {
    reader: BufReader<ReadHalf<S>>,
    writer: WriteHalf<S>,
    /// Bytes of a line not yet terminated. Kept across calls so a read abandoned by a deadline
    /// resumes where it stopped.
    line_buf: Vec<u8>,
    settle: Duration,
}

pub const DEF_BAUD_RATE: u32 = 57600;
pub const DEF_SETTLE_MS: u64 = 500;
/// Candidate device nodes probed when no path is configured.
const PORT_CANDIDATES: [&'static str; 3] = ["/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2"];

/// Unsolicited status sent by the modem when all channels are busy (duty cycle).
pub const NO_FREE_CH: &'static str = "no_free_ch";
const MAC_TX_OK: &'static str = "mac_tx_ok";
const MAC_ERR: &'static str = "mac_err";
const MAC_RX: &'static str = "mac_rx";

impl LostikUsb<SerialStream> {
    /// Open the serial port of the USB dongle.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, Error> {
        const FN_NAME: &'static str = "LostikUsb::open";

        let port = match tokio_serial::new(path, baud_rate)
            .timeout(Duration::from_secs(2))
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
        info!("[{}] connection to LoStik {} established", FN_NAME, path);

        Ok(LostikUsb::new(port))
    }
}

impl<S: AsyncRead + AsyncWrite> LostikUsb<S> {
    /// Wrap an already opened stream.
    pub fn new(stream: S) -> Self {
        let (reader, writer) = io::split(stream);
        LostikUsb {
            reader: BufReader::new(reader),
            writer,
            line_buf: vec![],
            settle: Duration::from_millis(DEF_SETTLE_MS),
        }
    }

    /// Change the delay applied after every command.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn settle(&self) -> Duration {
        self.settle
    }

    /// Write one command and wait the default settle delay.
    pub async fn send(&mut self, command: &str) -> Result<(), Error> {
        self.send_with_delay(command, self.settle).await
    }

    /// Write one command followed by CRLF and suspend for `delay`.
    ///
    /// The delay lets the modem process the command before the next write. It is not an
    /// acknowledgement.
    pub async fn send_with_delay(&mut self, command: &str, delay: Duration) -> Result<(), Error> {
        const FN_NAME: &'static str = "LostikUsb::send";

        info!("[{}] {}", FN_NAME, command);
        self.writer
            .write_all(format!("{}\r\n", command).as_bytes())
            .await?;
        self.writer.flush().await?;
        time::sleep(delay).await;
        Ok(())
    }

    /// Wait for the next non-empty line.
    ///
    /// Returns [`Error::PortClosed`] when the stream reaches EOF with nothing buffered.
    pub async fn read_line(&mut self) -> Result<String, Error> {
        const FN_NAME: &'static str = "LostikUsb::read_line";

        loop {
            let size = self.reader.read_until(b'\n', &mut self.line_buf).await?;
            if size == 0 && self.line_buf.is_empty() {
                warn!("[{}] lost connection to serial device", FN_NAME);
                return Err(Error::PortClosed);
            }
            let raw = std::mem::take(&mut self.line_buf);
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            if line.is_empty() {
                continue;
            }
            info!("[{}] STATUS: {}", FN_NAME, line);
            return Ok(line);
        }
    }

    /// Wait for the next line no longer than `deadline`. Returns `None` on timeout.
    pub async fn read_line_timeout(&mut self, deadline: Duration) -> Result<Option<String>, Error> {
        match time::timeout(deadline, self.read_line()).await {
            Err(_) => Ok(None),
            Ok(line) => line.map(Some),
        }
    }

    /// Consume lines until the port stays quiet for `quiet`.
    pub async fn drain(&mut self, quiet: Duration) -> Result<Vec<String>, Error> {
        let mut lines = vec![];
        while let Some(line) = self.read_line_timeout(quiet).await? {
            lines.push(line);
        }
        Ok(lines)
    }

    /// Release the port.
    pub fn close(self) {
        const FN_NAME: &'static str = "LostikUsb::close";

        if !self.line_buf.is_empty() {
            warn!(
                "[{}] drop {} bytes of unterminated line",
                FN_NAME,
                self.line_buf.len()
            );
        }
        info!("[{}] port closed", FN_NAME);
    }
}

/// Statuses the modem sends on its own after an uplink or when channels are busy. They never
/// answer a query.
pub fn is_async_status(line: &str) -> bool {
    line == NO_FREE_CH
        || line == MAC_TX_OK
        || line == MAC_ERR
        || line == MAC_RX
        || line.starts_with("mac_rx ")
}

/// Find the first existing LoStik device node.
pub fn detect_port() -> Option<String> {
    PORT_CANDIDATES
        .iter()
        .find(|path| Path::new(path).exists())
        .map(|path| path.to_string())
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt, duplex};

    use super::*;

    #[test]
    fn async_statuses() {
        assert!(is_async_status("no_free_ch"));
        assert!(is_async_status("mac_tx_ok"));
        assert!(is_async_status("mac_rx 1 48656C6C6F"));
        assert!(is_async_status("mac_err"));
        assert!(!is_async_status("-47"));
        assert!(!is_async_status("invalid_param"));
        assert!(!is_async_status("mac_rxdelay"));
    }

    #[tokio::test(start_paused = true)]
    async fn send_appends_crlf() {
        let (local, mut remote) = duplex(256);
        let mut port = LostikUsb::new(local);
        port.send("mac get dr").await.unwrap();

        let mut buf = [0u8; 12];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"mac get dr\r\n");
    }

    #[tokio::test(start_paused = true)]
    async fn read_line_strips_and_skips_blank() {
        let (local, mut remote) = duplex(256);
        let mut port = LostikUsb::new(local);
        remote.write_all(b"\r\n868100000\r\nok\n").await.unwrap();

        assert_eq!(port.read_line().await.unwrap(), "868100000");
        assert_eq!(port.read_line().await.unwrap(), "ok");
    }

    #[tokio::test(start_paused = true)]
    async fn read_line_reports_closed() {
        let (local, remote) = duplex(256);
        let mut port = LostikUsb::new(local);
        drop(remote);

        assert!(matches!(port.read_line().await, Err(Error::PortClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_read_keeps_partial_line() {
        let (local, mut remote) = duplex(256);
        let mut port = LostikUsb::new(local);
        remote.write_all(b"-4").await.unwrap();

        let line = port
            .read_line_timeout(Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(line, None);

        remote.write_all(b"7\r\n").await.unwrap();
        assert_eq!(port.read_line().await.unwrap(), "-47");
    }

    #[tokio::test(start_paused = true)]
    async fn drain_collects_until_quiet() {
        let (local, mut remote) = duplex(256);
        let mut port = LostikUsb::new(local);
        remote.write_all(b"ok\r\nmac_tx_ok\r\n").await.unwrap();

        let lines = port.drain(Duration::from_millis(500)).await.unwrap();
        assert_eq!(lines, vec!["ok".to_string(), "mac_tx_ok".to_string()]);
    }
}
