//! OTAA join of the LoStik modem.
//!
//! The sequencer provisions the device identity, sends `mac join otaa` and waits for the network
//! answer. A rejected join (`denied` or `no_free_ch`) starts the whole sequence again until the
//! attempt budget is spent. The supervisor bounds the total wait and reports the final state.

use std::time::Duration;

use log::{error, info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::watch,
    time,
};

use super::{
    error::Error,
    lostik_usb::{LostikUsb, NO_FREE_CH},
};

/// Join progress. The numeric values are the process exit status of the join program.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting = 100,
    Connected = 200,
    Failed = 500,
    TooManyRetries = 520,
}

pub struct Options {
    pub app_eui: String,
    pub app_key: String,
    pub dev_eui: String,
    pub data_rate: u8,
    /// Join attempts including the first one.
    pub max_attempts: u32,
    /// Restart the sequence when the network rejects the join. When `false` a rejection is only
    /// logged and the sequencer keeps listening.
    pub retry_on_reject: bool,
    /// Pause after each provisioning command.
    pub step_pause: Duration,
    /// Wait before a new attempt.
    pub retry_backoff: Duration,
}

pub struct JoinSequencer<'a, S> {
    port: &'a mut LostikUsb<S>,
    opts: Options,
    attempts: u32,
    state: watch::Sender<ConnectionState>,
}

enum Outcome {
    Accepted,
    Rejected(String),
}

pub const DEF_DATA_RATE: u8 = 5;
pub const DEF_MAX_ATTEMPTS: u32 = 5;
pub const DEF_STEP_PAUSE_MS: u64 = 1000;
pub const DEF_POLL_INTERVAL_SECS: u64 = 10;
pub const DEF_MAX_POLLS: u32 = 5;
const ACCEPTED: &'static str = "accepted";
const DENIED: &'static str = "denied";

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        *self != ConnectionState::Connecting
    }

    pub fn exit_code(&self) -> i32 {
        *self as i32
    }
}

/// The six provisioning commands in the order they are sent.
pub fn provisioning_commands(opts: &Options) -> [String; 6] {
    [
        format!("mac set dr {}", opts.data_rate),
        "mac set adr on".to_string(),
        format!("mac set appeui {}", opts.app_eui),
        format!("mac set appkey {}", opts.app_key),
        format!("mac set deveui {}", opts.dev_eui),
        "mac save".to_string(),
    ]
}

pub const JOIN_COMMAND: &'static str = "mac join otaa";

impl<'a, S: AsyncRead + AsyncWrite> JoinSequencer<'a, S> {
    pub fn new(port: &'a mut LostikUsb<S>, opts: Options) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        JoinSequencer {
            port,
            opts,
            attempts: 0,
            state,
        }
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Join until a terminal state is reached.
    pub async fn run(&mut self) -> ConnectionState {
        const FN_NAME: &'static str = "JoinSequencer::run";

        loop {
            if self.attempts >= self.opts.max_attempts {
                error!("[{}] {}", FN_NAME, Error::TooManyRetries(self.attempts));
                return self.finish(ConnectionState::TooManyRetries);
            }
            self.attempts += 1;
            info!("[{}] join attempt {}", FN_NAME, self.attempts);

            if let Err(e) = self.join_otaa().await {
                error!("[{}] join error: {}", FN_NAME, e);
                return self.finish(ConnectionState::Failed);
            }
            match self.wait_outcome().await {
                Err(e) => {
                    error!("[{}] wait join result error: {}", FN_NAME, e);
                    return self.finish(ConnectionState::Failed);
                }
                Ok(Outcome::Accepted) => {
                    info!("[{}] UPDATING STATE to connected", FN_NAME);
                    return self.finish(ConnectionState::Connected);
                }
                Ok(Outcome::Rejected(reason)) => {
                    warn!("[{}] {}, retrying OTAA connection", FN_NAME, reason);
                    time::sleep(self.opts.retry_backoff).await;
                }
            }
        }
    }

    /// Set data rate and ADR before joining so the first uplinks reach the gateway.
    async fn join_otaa(&mut self) -> Result<(), Error> {
        for cmd in provisioning_commands(&self.opts).iter() {
            self.port.send(cmd).await?;
            time::sleep(self.opts.step_pause).await;
        }
        self.port.send(JOIN_COMMAND).await
    }

    async fn wait_outcome(&mut self) -> Result<Outcome, Error> {
        const FN_NAME: &'static str = "JoinSequencer::wait_outcome";

        loop {
            let line = self.port.read_line().await?;
            if line == ACCEPTED {
                return Ok(Outcome::Accepted);
            } else if line == DENIED || line == NO_FREE_CH {
                let rejected = Error::JoinRejected(line);
                if self.opts.retry_on_reject {
                    return Ok(Outcome::Rejected(rejected.to_string()));
                }
                warn!("[{}] {}, retry disabled", FN_NAME, rejected);
            }
        }
    }

    fn finish(&self, state: ConnectionState) -> ConnectionState {
        self.state.send_replace(state);
        state
    }
}

/// Wait for the sequencer with a bounded number of fixed-interval polls.
///
/// Returns as soon as the sequencer reaches a terminal state. When the polls run out the
/// sequencer is dropped and the current state (usually `Connecting`) is returned.
pub async fn supervise<S: AsyncRead + AsyncWrite>(
    mut sequencer: JoinSequencer<'_, S>,
    poll_interval: Duration,
    max_polls: u32,
) -> ConnectionState {
    const FN_NAME: &'static str = "supervise";

    let state_rx = sequencer.subscribe();
    let run = sequencer.run();
    tokio::pin!(run);
    let mut polls = 0;
    loop {
        tokio::select! {
            state = &mut run => {
                info!("[{}] final state {:?}", FN_NAME, state);
                return state;
            }
            _ = time::sleep(poll_interval) => {
                polls += 1;
                let state = *state_rx.borrow();
                if state.is_terminal() || polls >= max_polls {
                    info!("[{}] stop after {} polls, state {:?}", FN_NAME, polls, state);
                    return state;
                }
                info!("[{}] not yet connected", FN_NAME);
            }
        }
    }
}
