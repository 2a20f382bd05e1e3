use std::{error::Error as StdError, fs, process, time::Duration};

use clap::{Arg as ClapArg, Command};
use log::{error, info};
use serde::Deserialize;
use sylvia_iot_sdk::util::logger;

use lostik_lab::libs::{
    self,
    cycle::{self, AdaptPolicy, CycleDriver, Intervals, Options},
    lostik_usb::LostikUsb,
    moisture::ChirpSensor,
    telemetry::{InfluxSink, TelemetrySink},
};

#[derive(Deserialize)]
struct AppConfig {
    log: logger::Config,
    #[serde(default)]
    lostik: libs::config::lostik::Config,
    #[serde(default)]
    influx: libs::config::influx::Config,
    #[serde(default)]
    monitor: libs::config::monitor::Config,
}

const PROJ_NAME: &'static str = "lostik-monitor";
const PROJ_VER: &'static str = env!("CARGO_PKG_VERSION");

/// Polls the LoStik link parameters and the optional soil sensor into InfluxDB.
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
            process::exit(1);
        }
        Ok(conf) => conf,
    };

    logger::init(PROJ_NAME, &conf.log);

    let lostik_conf = libs::config::lostik::apply_default(&conf.lostik);
    let influx_conf = libs::config::influx::apply_default(&conf.influx);
    let monitor_conf = libs::config::monitor::apply_default(&conf.monitor);

    // create influx connection
    let db_name = influx_conf.db_name.unwrap();
    let sink = match InfluxSink::new(influx_conf.db_uri.unwrap().as_str(), db_name.as_str()) {
        Err(e) => {
            error!("[{}] {}", FN_NAME, e);
            process::exit(1);
        }
        Ok(sink) => sink,
    };
    if let Err(e) = sink.ensure_database(db_name.as_str()).await {
        error!("[{}] {}", FN_NAME, e);
        process::exit(1);
    }

    let dev_path = lostik_conf.dev_path.unwrap();
    let port = match LostikUsb::open(dev_path.as_str(), lostik_conf.baud_rate.unwrap()) {
        Err(e) => {
            error!("[{}] {}", FN_NAME, e);
            process::exit(1);
        }
        Ok(port) => port,
    };
    let settle = Duration::from_millis(lostik_conf.settle_ms.unwrap());
    let mut port = port.with_settle(settle);

    let sensor = match monitor_conf.moisture_path.as_ref() {
        None => None,
        Some(path) => match ChirpSensor::open(path.as_str(), monitor_conf.moisture_address.unwrap()) {
            Err(e) => {
                error!("[{}] {}", FN_NAME, e);
                process::exit(1);
            }
            Ok(sensor) => Some(sensor),
        },
    };

    let adapt = match monitor_conf.adapt_interval.unwrap() {
        false => None,
        true => Some(AdaptPolicy {
            warm_up: monitor_conf.warm_up.unwrap(),
            step: monitor_conf.step.unwrap(),
            resend_linkchk: monitor_conf.resend_linkchk.unwrap(),
            ..Default::default()
        }),
    };
    let opts = Options {
        runs: monitor_conf.runs.unwrap(),
        intervals: Intervals {
            uplink: monitor_conf.ul_interval.unwrap(),
            downlink: monitor_conf.dl_interval.unwrap(),
        },
        adapt,
        commands: cycle::default_commands(),
        measurement: monitor_conf.measurement.unwrap(),
        tags: libs::device_tags(monitor_conf.dev_eui.unwrap().as_str()),
        response_timeout: Duration::from_millis(lostik_conf.response_timeout_ms.unwrap()),
        drain_quiet: settle,
    };
    let mut driver = CycleDriver::new(&mut port, &sink, opts);
    if let Some(sensor) = sensor {
        driver = driver.with_sensor(Box::new(sensor));
    }
    let code = match driver.run().await {
        Err(e) => {
            error!("[{}] measurement stopped: {}", FN_NAME, e);
            1
        }
        Ok(intervals) => {
            info!("[{}] measurement done, final intervals {:?}", FN_NAME, intervals);
            0
        }
    };
    port.close();
    process::exit(code);
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
    args = libs::config::influx::reg_args(args);
    args = libs::config::monitor::reg_args(args);
    let args = args.get_matches();

    if let Some(v) = args.get_one::<String>("file") {
        let conf_str = fs::read_to_string(v)?;
        return Ok(json5::from_str(conf_str.as_str())?);
    }

    Ok(AppConfig {
        log: logger::read_args(&args),
        lostik: libs::config::lostik::read_args(&args),
        influx: libs::config::influx::read_args(&args),
        monitor: libs::config::monitor::read_args(&args),
    })
}
