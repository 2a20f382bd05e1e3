use std::{error::Error as StdError, fs, process, time::Duration};

use clap::{Arg as ClapArg, Command};
use log::{error, info};
use serde::Deserialize;
use sylvia_iot_sdk::util::logger;

use lostik_lab::libs::{
    self,
    join::{self, ConnectionState, JoinSequencer, Options},
    lostik_usb::LostikUsb,
};

#[derive(Deserialize)]
struct AppConfig {
    log: logger::Config,
    #[serde(default)]
    lostik: libs::config::lostik::Config,
    #[serde(default)]
    join: libs::config::join::Config,
}

const PROJ_NAME: &'static str = "lostik-join";
const PROJ_VER: &'static str = env!("CARGO_PKG_VERSION");

/// Joins the LoStik with OTAA. The exit status is the final connection state.
#[tokio::main]
async fn main() {
    const FN_NAME: &'static str = "main";

    let conf = match init_config() {
        Err(e) => {
            let conf = &logger::Config {
                ..Default::default()
            };
            logger::init(PROJ_NAME, &conf);
            error!("[{}] read config error: {}", FN_NAME, e);
            process::exit(ConnectionState::Failed.exit_code());
        }
        Ok(conf) => conf,
    };

    logger::init(PROJ_NAME, &conf.log);

    let lostik_conf = libs::config::lostik::apply_default(&conf.lostik);
    let join_conf = libs::config::join::apply_default(&conf.join);
    if let Err(e) = libs::config::join::validate(&join_conf) {
        error!("[{}] {}", FN_NAME, e);
        process::exit(ConnectionState::Failed.exit_code());
    }

    let dev_path = lostik_conf.dev_path.unwrap();
    let port = match LostikUsb::open(dev_path.as_str(), lostik_conf.baud_rate.unwrap()) {
        Err(e) => {
            error!("[{}] {}", FN_NAME, e);
            process::exit(ConnectionState::Failed.exit_code());
        }
        Ok(port) => port,
    };
    let mut port = port.with_settle(Duration::from_millis(lostik_conf.settle_ms.unwrap()));

    let opts = Options {
        app_eui: join_conf.app_eui.unwrap(),
        app_key: join_conf.app_key.unwrap(),
        dev_eui: join_conf.dev_eui.unwrap(),
        data_rate: join_conf.data_rate.unwrap(),
        max_attempts: join_conf.max_attempts.unwrap(),
        retry_on_reject: join_conf.retry_on_reject.unwrap(),
        step_pause: Duration::from_millis(join::DEF_STEP_PAUSE_MS),
        retry_backoff: Duration::from_secs(join_conf.retry_backoff_secs.unwrap()),
    };
    let state = join::supervise(
        JoinSequencer::new(&mut port, opts),
        Duration::from_secs(join_conf.poll_interval_secs.unwrap()),
        join_conf.max_polls.unwrap(),
    )
    .await;
    port.close();

    info!("[{}] {:?}", FN_NAME, state);
    process::exit(state.exit_code());
}

fn init_config() -> Result<AppConfig, Box<dyn StdError>> {
    let mut args = Command::new(PROJ_NAME).version(PROJ_VER).arg(
        ClapArg::new("file")
            .short('f')
            .long("file")
            .help("config file")
            .num_args(1),
    );
    args = logger::reg_args(args);
    args = libs::config::lostik::reg_args(args);
    args = libs::config::join::reg_args(args);
    let args = args.get_matches();

    if let Some(v) = args.get_one::<String>("file") {
        let conf_str = fs::read_to_string(v)?;
        return Ok(json5::from_str(conf_str.as_str())?);
    }

    Ok(AppConfig {
        log: logger::read_args(&args),
        lostik: libs::config::lostik::read_args(&args),
        join: libs::config::join::read_args(&args),
    })
}
