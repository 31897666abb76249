//! Device entry point: loads config, opens the threshold store, wires the
//! queues, and spawns the task set — samplers, monitor, alarm, LCD,
//! cloud, and command — then parks until a termination signal.
//!
//! Safety features:
//! - Watchdog over the safety-critical path (alarm, monitor, temperature
//!   sampler): starvation is fatal
//! - Alarm task reconciles the transducer against the declared device
//!   state every tick, surviving lost queue messages
//! - Offline telemetry buffering with bounded rings; broker LWT announces
//!   `offline` if the session drops

mod channels;
mod classifier;
mod config;
mod hardware;
mod models;
mod ring;
mod state;
mod tasks;
mod thresholds;
mod timesync;
mod watchdog;

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::info;

use channels::Wiring;
use config::Config;
use hardware::buzzer::Transducer;
use hardware::lcd::MockLcd;
use hardware::probe::{MoistureProbe, SharedAdc, SimAdc, TemperatureProbe};
use state::DeviceState;
use tasks::cloud::OsManagedLink;
use thresholds::{ThresholdStore, ThresholdValues};
use timesync::{TimeSync, Uptime};
use watchdog::Watchdog;

/// ADC channel assignments.
const TEMP_ADC_CHANNEL: u8 = 0;
const MOIST_ADC_CHANNEL: u8 = 1;

// Simulated sensor baselines (raw counts): a comfortable room and
// moderately damp soil.
const SIM_TEMP_BASE: f64 = 1760.0;
const SIM_MOIST_BASE: f64 = 19_000.0;

#[tokio::main]
async fn main() -> Result<()> {
    // ── Structured logging ──────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Configuration (file + env overlay for secrets) ──────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "device.toml".to_string());
    let mut config = Config::load(&config_path)?;
    config.overlay(|key| env::var(key).ok());

    info!(
        device = %config.device.id,
        broker = %config.mqtt.host,
        port = config.mqtt.port,
        "configuration loaded"
    );
    info!(
        ssid = %config.wifi.ssid,
        auto_connect = config.wifi.auto_connect,
        max_retry = config.wifi.max_retry,
        backoff_ms = config.wifi.backoff_ms,
        credentials = !config.wifi.password.is_empty(),
        "wifi configuration (association managed by the OS)"
    );

    let uptime = Uptime::new();
    let timesync = TimeSync::new();

    // ── Persistent thresholds (loaded before any classifying task) ──
    let thresholds = Arc::new(
        ThresholdStore::open(&config.storage.db_url, ThresholdValues::default()).await?,
    );

    // ── Shared device state (initialized before any task may set it) ─
    let device_state = Arc::new(DeviceState::new());

    // ── Queues ──────────────────────────────────────────────────────
    let w = Wiring::new();

    // ── Hardware ────────────────────────────────────────────────────
    let adc = SharedAdc::new(Box::new(SimAdc::new(&[
        (TEMP_ADC_CHANNEL, SIM_TEMP_BASE, 30.0),
        (MOIST_ADC_CHANNEL, SIM_MOIST_BASE, 150.0),
    ])));
    let temp_probe = TemperatureProbe::new(
        adc.clone(),
        TEMP_ADC_CHANNEL,
        config.calibration.temperature_samples,
    );
    let moist_probe = MoistureProbe::new(
        adc,
        MOIST_ADC_CHANNEL,
        config.calibration.moisture_samples,
        config.calibration.raw_dry,
        config.calibration.raw_wet,
    );

    #[cfg(feature = "gpio")]
    let transducer: Box<dyn Transducer> = {
        let pin: u8 = env::var("BUZZER_GPIO")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(18);
        let active_high = env::var("BUZZER_ACTIVE_LOW")
            .map(|v| !(v == "1" || v.eq_ignore_ascii_case("true")))
            .unwrap_or(true);
        Box::new(hardware::buzzer::GpioBuzzer::new(pin, active_high)?)
    };
    #[cfg(not(feature = "gpio"))]
    let transducer: Box<dyn Transducer> = Box::new(hardware::buzzer::MockTransducer::new());

    let lcd = Box::new(MockLcd::new());

    // ── Watchdog over the safety-critical path ──────────────────────
    let watchdog = Watchdog::new(Duration::from_millis(watchdog::TIMEOUT_MS));
    tokio::spawn(watchdog.clone().run());

    // ── Samplers ────────────────────────────────────────────────────
    tokio::spawn(tasks::sampler::run(
        "temp_sampler",
        temp_probe,
        Duration::from_millis(config.sampling.temperature_ms),
        w.temp_tx,
        uptime.clone(),
        Some(watchdog.subscribe("temp_sampler")),
    ));
    tokio::spawn(tasks::sampler::run(
        "moist_sampler",
        moist_probe,
        Duration::from_millis(config.sampling.moisture_ms),
        w.moist_tx,
        uptime.clone(),
        None,
    ));

    // ── Monitor ─────────────────────────────────────────────────────
    tokio::spawn(tasks::monitor::run(tasks::monitor::MonitorDeps {
        temp_rx: w.temp_rx,
        moist_rx: w.moist_rx,
        alarm_tx: w.alarm_tx,
        lcd_tx: w.lcd_tx,
        cmd_internal_tx: w.cmd_internal_tx,
        temp_latest_tx: w.temp_latest_tx,
        moist_latest_tx: w.moist_latest_tx,
        device_state: Arc::clone(&device_state),
        thresholds: Arc::clone(&thresholds),
        debounce: config.debounce.clone(),
        uptime: uptime.clone(),
        watchdog: Some(watchdog.subscribe("monitor")),
    }));

    // ── Alarm ───────────────────────────────────────────────────────
    tokio::spawn(tasks::alarm::run(tasks::alarm::AlarmDeps {
        alarm_rx: w.alarm_rx,
        device_state: Arc::clone(&device_state),
        transducer,
        patterns: config.patterns.clone(),
        watchdog: Some(watchdog.subscribe("alarm")),
    }));

    // ── LCD ─────────────────────────────────────────────────────────
    tokio::spawn(tasks::lcd::run(tasks::lcd::LcdDeps {
        lcd_rx: w.lcd_rx,
        lcd,
        device_id: config.device.id.clone(),
    }));

    // ── Command ─────────────────────────────────────────────────────
    tokio::spawn(tasks::command::run(tasks::command::CommandDeps {
        cmd_external_rx: w.cmd_external_rx,
        ack_tx: w.ack_tx,
        thresholds: Arc::clone(&thresholds),
        timesync: timesync.clone(),
        ack_topic: config.topic("thresholds-changed"),
    }));

    // ── Cloud ───────────────────────────────────────────────────────
    tokio::spawn(tasks::cloud::run(tasks::cloud::CloudDeps {
        config: config.clone(),
        temp_latest_rx: w.temp_latest_rx,
        moist_latest_rx: w.moist_latest_rx,
        cmd_internal_rx: w.cmd_internal_rx,
        ack_rx: w.ack_rx,
        cmd_external_tx: w.cmd_external_tx,
        device_state: Arc::clone(&device_state),
        link: Box::new(OsManagedLink),
        timesync,
        uptime,
        watchdog: None,
    }));

    info!("all tasks spawned");

    // ── Park until termination ──────────────────────────────────────
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    let exit_reason = tokio::select! {
        _ = &mut ctrl_c => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
    };

    info!(signal = exit_reason, "shutting down");
    Ok(())
}
