#![allow(dead_code)]

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream},
    time,
};

use lostik_lab::libs::{
    error::Error,
    telemetry::{Point, TelemetrySink},
};

pub const DEV_EUI: &'static str = "0004A30B001C0530";

/// Commands received by the fake modem, in order.
pub type CommandLog = Arc<Mutex<Vec<String>>>;

/// Keeps every point in memory.
#[derive(Default)]
pub struct MemorySink {
    databases: Mutex<BTreeSet<String>>,
    points: Mutex<Vec<Point>>,
}

/// Rejects every write.
pub struct FailingSink;

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    pub fn databases(&self) -> Vec<String> {
        self.databases.lock().unwrap().iter().cloned().collect()
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn ensure_database(&self, name: &str) -> Result<(), Error> {
        self.databases.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn write(&self, point: &Point) -> Result<(), Error> {
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

#[async_trait]
impl TelemetrySink for FailingSink {
    async fn ensure_database(&self, _name: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn write(&self, _point: &Point) -> Result<(), Error> {
        Err(Error::TelemetryWriteFailed("database offline".to_string()))
    }
}

/// Run a fake LoStik on the remote end of a duplex stream.
///
/// `respond` maps each received command to the lines written back. The task ends when the local
/// end is dropped.
pub fn spawn_modem<F>(stream: DuplexStream, respond: F) -> CommandLog
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    spawn_slow_modem(stream, "", Duration::ZERO, respond)
}

/// Like [`spawn_modem`], but the answer to `slow_command` is written after `delay`.
pub fn spawn_slow_modem<F>(
    stream: DuplexStream,
    slow_command: &'static str,
    delay: Duration,
    mut respond: F,
) -> CommandLog
where
    F: FnMut(&str) -> Vec<String> + Send + 'static,
{
    let log: CommandLog = Arc::new(Mutex::new(vec![]));
    let task_log = log.clone();
    tokio::spawn(async move {
        let (reader, mut writer) = io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let command = line.trim_end().to_string();
            let replies = respond(command.as_str());
            task_log.lock().unwrap().push(command.clone());
            if command == slow_command {
                time::sleep(delay).await;
            }
            for reply in replies {
                let out = format!("{}\r\n", reply);
                if writer.write_all(out.as_bytes()).await.is_err() {
                    return;
                }
            }
        }
    });
    log
}

/// Typical answers of a joined RN2483.
pub fn lostik_reply(command: &str) -> Vec<String> {
    let reply: &[&str] = match command {
        "radio get freq" => &["868100000"],
        "radio get bw" => &["125"],
        "radio get rssi" => &["-47"],
        "radio get snr" => &["9"],
        "mac get dr" => &["5"],
        "mac get gwnb" => &["2"],
        "mac get pwridx" => &["1"],
        "mac get mrgn" => &["20"],
        c if c.starts_with("mac tx ") => &["ok", "mac_tx_ok"],
        _ => &["ok"],
    };
    reply.iter().map(|r| r.to_string()).collect()
}

pub fn commands(log: &CommandLog) -> Vec<String> {
    log.lock().unwrap().clone()
}
