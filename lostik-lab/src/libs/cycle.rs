//! Measurement cycle: polls the LoStik radio and MAC parameters once per uplink.
//!
//! Each iteration:
//! - Sends every labelled query command and pairs the next response line with its label.
//! - Sends one unconfirmed uplink carrying the iteration index.
//! - Writes the collected fields and the uplink counter as one telemetry point.
//! - Sleeps the uplink interval and optionally shortens the intervals.

use std::{collections::BTreeMap, time::Duration};

use log::{error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time,
};

use super::{
    error::Error,
    lostik_usb::{self, LostikUsb, NO_FREE_CH},
    moisture::SoilSensor,
    telemetry::{FieldValue, Point, Record, TelemetrySink},
};

/// One query sent to the modem and the label of the field its response fills.
#[derive(Clone, Debug, PartialEq)]
pub struct LabeledCommand {
    pub label: String,
    pub command: String,
}

/// Holds the label waiting for its response line.
#[derive(Default)]
pub struct MeasurementBuffer {
    pending: Option<String>,
}

/// Linear interval ramp-down applied after every uplink.
#[derive(Clone, Debug)]
pub struct AdaptPolicy {
    /// Iterations completed before the first decrement.
    pub warm_up: u32,
    /// Seconds removed from both intervals per iteration.
    pub step: u64,
    /// Uplink interval below which the next decrement snaps to `floor`.
    pub min_interval: u64,
    pub floor: u64,
    /// Re-apply the downlink interval with `mac set linkchk` when it changes.
    pub resend_linkchk: bool,
}

/// Current uplink and downlink (link-check) intervals in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intervals {
    pub uplink: u64,
    pub downlink: u64,
}

pub struct Options {
    pub runs: u32,
    pub intervals: Intervals,
    /// `None` keeps the intervals fixed.
    pub adapt: Option<AdaptPolicy>,
    pub commands: Vec<LabeledCommand>,
    pub measurement: String,
    pub tags: BTreeMap<String, String>,
    /// Deadline for each labelled response.
    pub response_timeout: Duration,
    /// Quiet period used to flush unsolicited lines.
    pub drain_quiet: Duration,
}

/// Runs the measurement iterations over a borrowed port.
pub struct CycleDriver<'a, S, K: ?Sized> {
    port: &'a mut LostikUsb<S>,
    sink: &'a K,
    sensor: Option<Box<dyn SoilSensor + 'a>>,
    opts: Options,
}

pub const DEF_WARM_UP: u32 = 10;
pub const DEF_STEP: u64 = 30;
pub const DEF_MIN_INTERVAL: u64 = 60;
pub const DEF_MEASUREMENT: &'static str = "LoStik";
/// Field holding the uplink counter, to match points with the uplinks seen by the network.
pub const FIELD_FRAMES: &'static str = "frames";

impl LabeledCommand {
    pub fn new(label: &str, command: &str) -> Self {
        LabeledCommand {
            label: label.to_string(),
            command: command.to_string(),
        }
    }
}

/// The radio and MAC parameters polled every iteration.
pub fn default_commands() -> Vec<LabeledCommand> {
    vec![
        LabeledCommand::new("frequency", "radio get freq"),
        LabeledCommand::new("bandwidth", "radio get bw"),
        LabeledCommand::new("rssi", "radio get rssi"),
        LabeledCommand::new("snr", "radio get snr"),
        LabeledCommand::new("data rate", "mac get dr"),
        LabeledCommand::new("gateways", "mac get gwnb"),
        LabeledCommand::new("power", "mac get pwridx"),
        LabeledCommand::new("mrgn", "mac get mrgn"),
    ]
}

pub fn linkchk_command(seconds: u64) -> String {
    format!("mac set linkchk {}", seconds)
}

pub fn uplink_command(counter: u32) -> String {
    format!("mac tx uncnf 1 {}", counter)
}

impl MeasurementBuffer {
    /// Set the label for the next response. A label still waiting is discarded.
    pub fn push(&mut self, label: &str) {
        const FN_NAME: &'static str = "MeasurementBuffer::push";

        if let Some(stale) = self.pending.replace(label.to_string()) {
            warn!("[{}] label {} got no response", FN_NAME, stale);
        }
    }

    /// Pair a response line with the waiting label and empty the buffer.
    pub fn pair(&mut self, line: &str) -> Option<(String, FieldValue)> {
        self.pending
            .take()
            .map(|label| (label, FieldValue::parse(line)))
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_none()
    }
}

impl Default for AdaptPolicy {
    fn default() -> Self {
        AdaptPolicy {
            warm_up: DEF_WARM_UP,
            step: DEF_STEP,
            min_interval: DEF_MIN_INTERVAL,
            floor: 0,
            resend_linkchk: true,
        }
    }
}

impl Intervals {
    /// Apply the policy after iteration `iteration` (zero-based).
    ///
    /// Returns `true` when the downlink interval changed.
    pub fn adapt(&mut self, iteration: u32, policy: &AdaptPolicy) -> bool {
        if iteration < policy.warm_up {
            return false;
        }
        let raw = self.uplink.saturating_sub(policy.step);
        if raw < policy.min_interval {
            self.uplink = policy.floor;
            return false;
        }
        self.uplink = raw;
        let downlink = self.downlink.saturating_sub(policy.step);
        let changed = downlink != self.downlink;
        self.downlink = downlink;
        changed
    }
}

impl<'a, S, K> CycleDriver<'a, S, K>
where
    S: AsyncRead + AsyncWrite,
    K: TelemetrySink + ?Sized,
{
    pub fn new(port: &'a mut LostikUsb<S>, sink: &'a K, opts: Options) -> Self {
        CycleDriver {
            port,
            sink,
            sensor: None,
            opts,
        }
    }

    /// Also read the soil sensor every iteration.
    pub fn with_sensor(mut self, sensor: Box<dyn SoilSensor + 'a>) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Run all iterations. Returns the final intervals.
    ///
    /// Exchange and write failures are logged and skipped. Only a closed port stops the run.
    pub async fn run(mut self) -> Result<Intervals, Error> {
        const FN_NAME: &'static str = "CycleDriver::run";

        let mut intervals = self.opts.intervals;
        // set downlink time interval
        self.send_forget(&linkchk_command(intervals.downlink)).await?;

        for i in 0..self.opts.runs {
            info!(
                "[{}] iteration {}/{}, uplink interval {} s",
                FN_NAME,
                i + 1,
                self.opts.runs,
                intervals.uplink
            );
            let mut fields = self.measure().await?;
            self.send_forget(&uplink_command(i)).await?;
            fields.insert(FIELD_FRAMES.to_string(), FieldValue::Text(i.to_string()));

            if let Some(sensor) = self.sensor.as_mut() {
                match sensor.read().await {
                    Err(e) => error!("[{}] read soil sensor error: {}", FN_NAME, e),
                    Ok(reading) => {
                        fields.insert("moisture".to_string(), FieldValue::from(reading.moisture));
                        fields.insert(
                            "temperature".to_string(),
                            FieldValue::from(reading.temperature),
                        );
                    }
                }
            }

            let point = Point::new(&self.opts.measurement, &self.opts.tags, fields);
            if let Err(e) = self.sink.write(&point).await {
                error!("[{}] write point error: {}", FN_NAME, e);
            }

            time::sleep(Duration::from_secs(intervals.uplink)).await;

            let resend = match self.opts.adapt.as_ref() {
                None => false,
                Some(policy) => intervals.adapt(i, policy) && policy.resend_linkchk,
            };
            if resend {
                // adapt downlink time
                self.send_forget(&linkchk_command(intervals.downlink))
                    .await?;
            }
        }
        Ok(intervals)
    }

    /// One pass over the labelled commands.
    ///
    /// The returned record holds one entry per command that got an answer in time.
    pub async fn measure(&mut self) -> Result<Record, Error> {
        const FN_NAME: &'static str = "CycleDriver::measure";

        let mut record = Record::new();
        let mut buffer = MeasurementBuffer::default();
        let quiet = self.opts.drain_quiet;
        self.skip_unsolicited(quiet).await?;

        for cmd in self.opts.commands.iter() {
            buffer.push(&cmd.label);
            match self.port.send(&cmd.command).await {
                Err(Error::PortClosed) => return Err(Error::PortClosed),
                Err(e) => {
                    error!("[{}] send {} error: {}", FN_NAME, cmd.command, e);
                    buffer.clear();
                    continue;
                }
                Ok(_) => (),
            }
            loop {
                let line = match self.port.read_line_timeout(self.opts.response_timeout).await {
                    Err(Error::PortClosed) => return Err(Error::PortClosed),
                    Err(e) => {
                        error!("[{}] read {} error: {}", FN_NAME, cmd.label, e);
                        buffer.clear();
                        break;
                    }
                    Ok(None) => {
                        warn!("[{}] no response for {}", FN_NAME, cmd.label);
                        buffer.clear();
                        // a late answer must not be paired with the next label
                        match self.port.drain(self.opts.response_timeout).await {
                            Err(Error::PortClosed) => return Err(Error::PortClosed),
                            Err(e) => error!("[{}] drain error: {}", FN_NAME, e),
                            Ok(lines) => {
                                for line in lines {
                                    warn!("[{}] drop late response: {}", FN_NAME, line);
                                }
                            }
                        }
                        break;
                    }
                    Ok(Some(line)) => line,
                };
                if line == NO_FREE_CH {
                    warn!("[{}] no free channel", FN_NAME);
                    continue;
                }
                if lostik_usb::is_async_status(&line) {
                    info!("[{}] skip status {}", FN_NAME, line);
                    continue;
                }
                if let Some((label, value)) = buffer.pair(&line) {
                    record.insert(label, value);
                }
                break;
            }
        }
        Ok(record)
    }

    /// Send a command whose response is not recorded, then flush what it produced.
    async fn send_forget(&mut self, command: &str) -> Result<(), Error> {
        const FN_NAME: &'static str = "CycleDriver::send_forget";

        match self.port.send(command).await {
            Err(Error::PortClosed) => return Err(Error::PortClosed),
            Err(e) => error!("[{}] send {} error: {}", FN_NAME, command, e),
            Ok(_) => (),
        }
        let quiet = self.opts.drain_quiet;
        self.skip_unsolicited(quiet).await
    }

    async fn skip_unsolicited(&mut self, quiet: Duration) -> Result<(), Error> {
        const FN_NAME: &'static str = "CycleDriver::skip_unsolicited";

        let lines = match self.port.drain(quiet).await {
            Err(Error::PortClosed) => return Err(Error::PortClosed),
            Err(e) => {
                error!("[{}] drain error: {}", FN_NAME, e);
                return Ok(());
            }
            Ok(lines) => lines,
        };
        for line in lines {
            if line == NO_FREE_CH {
                warn!("[{}] no free channel", FN_NAME);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffer_pairs_once() {
        let mut buffer = MeasurementBuffer::default();
        assert_eq!(buffer.pair("ok"), None);

        buffer.push("rssi");
        assert!(!buffer.is_empty());
        assert_eq!(
            buffer.pair("-47"),
            Some(("rssi".to_string(), FieldValue::Float(-47.0)))
        );
        assert!(buffer.is_empty());
        assert_eq!(buffer.pair("-47"), None);
    }

    #[test]
    fn buffer_keeps_latest_label() {
        let mut buffer = MeasurementBuffer::default();
        buffer.push("rssi");
        buffer.push("snr");
        assert_eq!(
            buffer.pair("busy"),
            Some(("snr".to_string(), FieldValue::from("busy")))
        );
    }

    #[test]
    fn adapt_waits_for_warm_up() {
        let policy = AdaptPolicy::default();
        let mut intervals = Intervals {
            uplink: 600,
            downlink: 600,
        };
        for i in 0..policy.warm_up {
            assert!(!intervals.adapt(i, &policy));
        }
        assert_eq!(intervals.uplink, 600);
    }

    #[test]
    fn adapt_matches_linear_ramp() {
        let policy = AdaptPolicy {
            warm_up: 20,
            ..Default::default()
        };
        let initial = 600_u64;
        let mut intervals = Intervals {
            uplink: initial,
            downlink: initial,
        };
        for i in 0..60_u32 {
            intervals.adapt(i, &policy);
            if i < policy.warm_up {
                assert_eq!(intervals.uplink, initial);
                continue;
            }
            let raw = initial as i64 - 30 * (i - policy.warm_up + 1) as i64;
            let expect = if raw < 60 { 0 } else { raw as u64 };
            assert_eq!(intervals.uplink, expect, "iteration {}", i);
        }
    }

    #[test]
    fn adapt_snaps_below_threshold() {
        let policy = AdaptPolicy {
            warm_up: 0,
            ..Default::default()
        };
        let mut intervals = Intervals {
            uplink: 120,
            downlink: 300,
        };
        assert!(intervals.adapt(0, &policy));
        assert_eq!(intervals, Intervals { uplink: 90, downlink: 270 });
        assert!(intervals.adapt(1, &policy));
        assert_eq!(intervals, Intervals { uplink: 60, downlink: 240 });
        // 60 - 30 drops below the threshold: uplink snaps, downlink stays
        assert!(!intervals.adapt(2, &policy));
        assert_eq!(intervals, Intervals { uplink: 0, downlink: 240 });
        assert!(!intervals.adapt(3, &policy));
        assert_eq!(intervals, Intervals { uplink: 0, downlink: 240 });
    }

    #[test]
    fn adapt_downlink_floor_is_zero() {
        let policy = AdaptPolicy {
            warm_up: 0,
            ..Default::default()
        };
        let mut intervals = Intervals {
            uplink: 600,
            downlink: 40,
        };
        assert!(intervals.adapt(0, &policy));
        assert_eq!(intervals.downlink, 10);
        assert!(intervals.adapt(1, &policy));
        assert_eq!(intervals.downlink, 0);
        assert!(!intervals.adapt(2, &policy));
        assert_eq!(intervals.downlink, 0);
    }
}
