//! Cloud task: owns the broker session end to end — connection lifecycle,
//! rate-limited telemetry with offline ring buffering, alert/status/ack
//! publishing, and command ingress from the broker.
//!
//! All publishes originate here; other tasks hand work over through
//! queues and never touch the client.

use std::time::Duration;

use rumqttc::{AsyncClient, Event, LastWill, MqttOptions, Packet, QoS};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::channels::send_or_drop;
use crate::config::Config;
use crate::models::{
    reason_flags, CloudPublishRequest, Command, CommandKind, MoistureSample, Reason, Severity,
    TemperatureSample, ThresholdId,
};
use crate::ring::RingBuffer;
use crate::state::{SharedDeviceState, StateSnapshot};
use crate::timesync::{TimeSync, Uptime};
use crate::watchdog::WatchdogHandle;

/// Steady-state tick.
const TICK: Duration = Duration::from_millis(100);

/// Spacing between buffered publishes during the post-connect flush.
const FLUSH_SPACING: Duration = Duration::from_millis(50);

/// Offline ring capacity per telemetry kind.
const OFFLINE_RING_DEPTH: usize = 512;

/// Longest accepted command payload.
const MAX_CMD_PAYLOAD: usize = 256;

/// Bound on waiting for a reasonable wall clock after link-up.
const TIME_SYNC_WAIT: Duration = Duration::from_secs(10);

/// Back-off after a broker session error before polling again.
const BROKER_ERROR_BACKOFF: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Network link collaborator
// ---------------------------------------------------------------------------

/// The WiFi association state machine is external; the core only asks
/// whether the link is up and occasionally nudges a reconnect.
pub trait NetworkLink: Send + Sync {
    fn is_up(&mut self) -> bool;
    fn reconnect(&mut self);
}

/// Link managed entirely by the operating system (wired, or wpa_supplicant
/// keeps WiFi associated). Always reports up; reconnect is a no-op.
pub struct OsManagedLink;

impl NetworkLink for OsManagedLink {
    fn is_up(&mut self) -> bool {
        true
    }

    fn reconnect(&mut self) {}
}

// ---------------------------------------------------------------------------
// Payload rendering (strings only at the transport boundary)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct TemperaturePayload<'a> {
    value: f32,
    ts: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffered: Option<u8>,
}

#[derive(Serialize)]
struct MoisturePayload<'a> {
    percent: f32,
    ts: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    buffered: Option<u8>,
}

#[derive(Serialize)]
struct AlertPayload<'a> {
    state: &'a str,
    reason: &'a str,
    temp: f32,
    moisture: f32,
    ts: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<u8>,
}

#[derive(Serialize)]
struct StatusPayload<'a> {
    status: &'a str,
    uptime_ms: u32,
    buffered: usize,
    buffered_temp: usize,
    buffered_moist: usize,
    state: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    reasons: Vec<&'a str>,
}

fn flag(set: bool) -> Option<u8> {
    set.then_some(1)
}

pub(crate) fn render_temperature(value: f32, ts14: &str, buffered: bool) -> String {
    serde_json::to_string(&TemperaturePayload {
        value,
        ts: ts14,
        buffered: flag(buffered),
    })
    .expect("temperature payload serializes")
}

pub(crate) fn render_moisture(percent: f32, ts14: &str, buffered: bool) -> String {
    serde_json::to_string(&MoisturePayload {
        percent,
        ts: ts14,
        buffered: flag(buffered),
    })
    .expect("moisture payload serializes")
}

pub(crate) fn render_alert(
    state: Severity,
    reason: Reason,
    temp: f32,
    moisture: f32,
    ts14: &str,
    snapshot: bool,
) -> String {
    serde_json::to_string(&AlertPayload {
        state: state.as_str(),
        reason: reason.as_str(),
        temp,
        moisture,
        ts: ts14,
        snapshot: flag(snapshot),
    })
    .expect("alert payload serializes")
}

pub(crate) fn render_status(
    uptime_ms: u32,
    buffered_temp: usize,
    buffered_moist: usize,
    snapshot: StateSnapshot,
) -> String {
    serde_json::to_string(&StatusPayload {
        status: "online",
        uptime_ms,
        buffered: buffered_temp + buffered_moist,
        buffered_temp,
        buffered_moist,
        state: snapshot.state.as_str(),
        reasons: reason_flags::names(snapshot.reasons),
    })
    .expect("status payload serializes")
}

// ---------------------------------------------------------------------------
// Command ingress parsing
// ---------------------------------------------------------------------------

/// Parse a broker command payload into external threshold-update commands.
///
/// Two shapes are accepted:
/// `{"command":"update_threshold","threshold":"<name>","value":<num>}` and
/// `{"command":"update_thresholds","<name>":<num>,...}`. Unknown threshold
/// names are logged and skipped; a malformed document is an error.
pub(crate) fn parse_command_payload(payload: &[u8], now_ms: u32) -> anyhow::Result<Vec<Command>> {
    anyhow::ensure!(
        payload.len() <= MAX_CMD_PAYLOAD,
        "command payload too large ({} > {MAX_CMD_PAYLOAD} bytes)",
        payload.len()
    );

    let doc: serde_json::Value = serde_json::from_slice(payload)?;
    let command = doc
        .get("command")
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("missing command field"))?;

    let make = |id: ThresholdId, value: f64| Command {
        ts_ms: now_ms,
        kind: CommandKind::UpdateThreshold { id },
        value: value as f32,
    };

    match command {
        "update_threshold" => {
            let name = doc
                .get("threshold")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow::anyhow!("missing threshold field"))?;
            let value = doc
                .get("value")
                .and_then(|v| v.as_f64())
                .ok_or_else(|| anyhow::anyhow!("missing numeric value field"))?;
            match ThresholdId::from_name(name) {
                Some(id) => Ok(vec![make(id, value)]),
                None => {
                    warn!(name, "unknown threshold name — ignored");
                    Ok(Vec::new())
                }
            }
        }
        "update_thresholds" => {
            let object = doc
                .as_object()
                .ok_or_else(|| anyhow::anyhow!("payload is not an object"))?;
            let mut commands = Vec::new();
            for (key, value) in object {
                if key == "command" {
                    continue;
                }
                let Some(value) = value.as_f64() else {
                    warn!(name = key.as_str(), "non-numeric threshold value — ignored");
                    continue;
                };
                match ThresholdId::from_name(key) {
                    Some(id) => commands.push(make(id, value)),
                    None => warn!(name = key.as_str(), "unknown threshold name — ignored"),
                }
            }
            Ok(commands)
        }
        other => anyhow::bail!("unknown command '{other}'"),
    }
}

// ---------------------------------------------------------------------------
// Rate-limited telemetry with offline buffering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub(crate) struct BufferedReading {
    pub value: f32,
    pub ts14: String,
}

/// One telemetry kind: the cached last-known value, the emission rate
/// limit, and the offline ring.
pub(crate) struct TelemetrySlot {
    period_ms: u32,
    last_emit_ms: Option<u32>,
    pub cached: Option<f32>,
    pub ring: RingBuffer<BufferedReading>,
}

impl TelemetrySlot {
    pub fn new(period_ms: u32) -> Self {
        Self {
            period_ms,
            last_emit_ms: None,
            cached: None,
            ring: RingBuffer::new(OFFLINE_RING_DEPTH),
        }
    }

    pub fn cache(&mut self, value: f32) {
        self.cached = Some(value);
    }

    /// Rate-limited emission decision for one tick. Returns the value to
    /// publish now, or buffers it when the broker is away. A closed
    /// timestamp gate defers emission without consuming the rate slot.
    pub fn tick(&mut self, now_ms: u32, connected: bool, gate_open: bool, ts14: &str) -> Option<f32> {
        let value = self.cached?;
        if let Some(last) = self.last_emit_ms {
            if now_ms.wrapping_sub(last) < self.period_ms {
                return None;
            }
        }
        if connected && !gate_open {
            return None; // wait for the clock before a timestamped publish
        }
        self.last_emit_ms = Some(now_ms);
        if connected {
            Some(value)
        } else {
            let reading = BufferedReading {
                value,
                ts14: ts14.to_string(),
            };
            if !self.ring.push(reading) {
                warn!("offline ring full — dropping sample");
            }
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

pub struct CloudDeps {
    pub config: Config,
    pub temp_latest_rx: watch::Receiver<Option<TemperatureSample>>,
    pub moist_latest_rx: watch::Receiver<Option<MoistureSample>>,
    pub cmd_internal_rx: mpsc::Receiver<Command>,
    pub ack_rx: mpsc::Receiver<CloudPublishRequest>,
    pub cmd_external_tx: mpsc::Sender<Command>,
    pub device_state: SharedDeviceState,
    pub link: Box<dyn NetworkLink>,
    pub timesync: TimeSync,
    pub uptime: Uptime,
    pub watchdog: Option<WatchdogHandle>,
}

fn qos_from(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

struct CloudTask {
    deps: CloudDeps,
    client: AsyncClient,
    qos: QoS,
    topic_temperature: String,
    topic_moisture: String,
    topic_alert: String,
    topic_status: String,
    topic_cmd: String,

    connected: bool,
    /// Post-connect one-shot in progress: drain rings, then snapshot alert.
    flushing: bool,
    time_inited: bool,
    time_deadline: Option<Instant>,

    temp_slot: TelemetrySlot,
    moist_slot: TelemetrySlot,
    last_temp: Option<TemperatureSample>,
    last_moist: Option<MoistureSample>,

    last_status: Option<Instant>,
    last_link_attempt: Option<Instant>,
}

impl CloudTask {
    async fn publish(&self, topic: &str, payload: String, retain: bool) {
        if let Err(e) = self
            .client
            .publish(topic, self.qos, retain, payload.into_bytes())
            .await
        {
            error!(topic, "publish failed: {e}");
        }
    }

    /// Gate for timestamped publishes: open once the clock is synced or
    /// the bounded wait has elapsed.
    fn time_gate_open(&self) -> bool {
        if self.deps.timesync.is_synced() {
            return true;
        }
        match self.time_deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    async fn on_connected(&mut self) {
        info!("broker connected");
        self.connected = true;
        self.flushing = true;
        if let Err(e) = self.client.subscribe(&self.topic_cmd, self.qos).await {
            error!(topic = %self.topic_cmd, "subscribe failed: {e}");
        }
    }

    fn on_disconnected(&mut self, why: &str) {
        if self.connected {
            warn!(why, "broker disconnected");
        }
        self.connected = false;
        self.flushing = false;
    }

    fn on_publish_packet(&mut self, topic: &str, payload: &[u8]) {
        if topic != self.topic_cmd {
            warn!(topic, "unhandled topic");
            return;
        }
        match parse_command_payload(payload, self.deps.uptime.millis()) {
            Ok(commands) => {
                debug!(count = commands.len(), "command payload accepted");
                for command in commands {
                    send_or_drop(&self.deps.cmd_external_tx, command, "q_cmd_external");
                }
            }
            Err(e) => warn!("bad command payload: {e:#}"),
        }
    }

    /// Continue the post-connect flush: up to two buffered publishes per
    /// tick at 50 ms spacing, temperature ring first, then the snapshot
    /// alert once both rings are dry.
    async fn flush_step(&mut self) {
        for i in 0..2 {
            if i > 0 {
                tokio::time::sleep(FLUSH_SPACING).await;
            }
            let (payload, topic) = if let Some(r) = self.temp_slot.ring.pop() {
                (
                    render_temperature(r.value, &r.ts14, true),
                    &self.topic_temperature,
                )
            } else if let Some(r) = self.moist_slot.ring.pop() {
                (render_moisture(r.value, &r.ts14, true), &self.topic_moisture)
            } else {
                // Rings are dry: close the one-shot with a snapshot alert
                // reflecting the current device state.
                let snapshot = self.deps.device_state.get();
                let payload = render_alert(
                    snapshot.state,
                    Reason::first_from_flags(snapshot.reasons),
                    self.last_temp.map_or(0.0, |s| s.temp_c),
                    self.last_moist.map_or(0.0, |s| s.percent),
                    &self.deps.timesync.ts14(),
                    true,
                );
                let topic = self.topic_alert.clone();
                self.publish(&topic, payload, false).await;
                self.flushing = false;
                info!("post-connect flush complete");
                return;
            };
            let topic = topic.clone();
            self.publish(&topic, payload, false).await;
        }
    }

    async fn steady_tick(&mut self) {
        // Link upkeep, paced to the reconnect interval.
        if !self.deps.link.is_up() {
            let due = self
                .last_link_attempt
                .map_or(true, |at| at.elapsed() >= Duration::from_millis(self.deps.config.sampling.reconnect_ms));
            if due {
                info!("attempting link reconnect");
                self.deps.link.reconnect();
                self.last_link_attempt = Some(Instant::now());
            }
            self.on_disconnected("link down");
            return;
        }

        // One-time clock sync arm once the link is up.
        if !self.time_inited {
            self.deps.timesync.init();
            self.time_deadline = Some(Instant::now() + TIME_SYNC_WAIT);
            self.time_inited = true;
        }

        // Latest-only reads: at most one sample of each kind per tick.
        if self.deps.temp_latest_rx.has_changed().unwrap_or(false) {
            if let Some(sample) = *self.deps.temp_latest_rx.borrow_and_update() {
                self.last_temp = Some(sample);
                self.temp_slot.cache(sample.temp_c);
            }
        }
        if self.deps.moist_latest_rx.has_changed().unwrap_or(false) {
            if let Some(sample) = *self.deps.moist_latest_rx.borrow_and_update() {
                debug!(raw = sample.raw, percent = sample.percent, "moisture cached");
                self.last_moist = Some(sample);
                self.moist_slot.cache(sample.percent);
            }
        }

        if self.connected && self.flushing {
            self.flush_step().await;
            return; // steady-state publishing resumes after the flush
        }

        let now_ms = self.deps.uptime.millis();
        let gate_open = self.time_gate_open();
        let ts14 = self.deps.timesync.ts14();

        // Rate-limited telemetry (buffers itself while offline).
        if let Some(value) = self.temp_slot.tick(now_ms, self.connected, gate_open, &ts14) {
            let payload = render_temperature(value, &ts14, false);
            let topic = self.topic_temperature.clone();
            self.publish(&topic, payload, self.deps.config.mqtt.telemetry_retain)
                .await;
        }
        if let Some(value) = self.moist_slot.tick(now_ms, self.connected, gate_open, &ts14) {
            let payload = render_moisture(value, &ts14, false);
            let topic = self.topic_moisture.clone();
            self.publish(&topic, payload, self.deps.config.mqtt.telemetry_retain)
                .await;
        }

        // Alert emits from the monitor.
        while let Ok(command) = self.deps.cmd_internal_rx.try_recv() {
            let CommandKind::EmitAlert { state, reason } = command.kind else {
                warn!("non-alert command on the internal queue — dropped");
                continue;
            };
            if !self.connected {
                debug!("alert while offline — dropped");
                continue;
            }
            let payload = render_alert(
                state,
                reason,
                self.last_temp.map_or(0.0, |s| s.temp_c),
                self.last_moist.map_or(0.0, |s| s.percent),
                &ts14,
                false,
            );
            let topic = self.topic_alert.clone();
            self.publish(&topic, payload, false).await;
        }

        // Pre-rendered threshold-change ACKs.
        while let Ok(request) = self.deps.ack_rx.try_recv() {
            if self.connected {
                self.publish(&request.topic, request.payload, false).await;
            } else {
                debug!("ack while offline — dropped");
            }
        }

        // Retained status heartbeat.
        let status_due = self
            .last_status
            .map_or(true, |at| at.elapsed() >= Duration::from_millis(self.deps.config.sampling.cloud_status_ms));
        if self.connected && status_due {
            let payload = render_status(
                now_ms,
                self.temp_slot.ring.len(),
                self.moist_slot.ring.len(),
                self.deps.device_state.get(),
            );
            let topic = self.topic_status.clone();
            self.publish(&topic, payload, true).await;
            self.last_status = Some(Instant::now());
        }
    }
}

pub async fn run(deps: CloudDeps) {
    info!("cloud task started");

    let config = &deps.config;
    let mut options = MqttOptions::new(
        config.device.id.clone(),
        config.mqtt.host.clone(),
        config.mqtt.port,
    );
    options.set_keep_alive(Duration::from_secs(config.mqtt.keepalive_s));
    options.set_clean_session(true);
    if config.mqtt.lwt_enable {
        options.set_last_will(LastWill::new(
            config.topic("status"),
            b"offline".to_vec(),
            qos_from(config.mqtt.default_qos),
            true,
        ));
    }

    let (client, mut eventloop) = AsyncClient::new(options, 20);

    let telemetry_ms = config.sampling.telemetry_ms as u32;
    let qos = qos_from(config.mqtt.default_qos);
    let topic_temperature = config.topic("temperature");
    let topic_moisture = config.topic("moisture");
    let topic_alert = config.topic("alert");
    let topic_status = config.topic("status");
    let topic_cmd = config.topic("cmd");

    let mut task = CloudTask {
        qos,
        topic_temperature,
        topic_moisture,
        topic_alert,
        topic_status,
        topic_cmd,
        client,
        connected: false,
        flushing: false,
        time_inited: false,
        time_deadline: None,
        temp_slot: TelemetrySlot::new(telemetry_ms),
        moist_slot: TelemetrySlot::new(telemetry_ms),
        last_temp: None,
        last_moist: None,
        last_status: None,
        last_link_attempt: None,
        deps,
    };

    let mut ticker = tokio::time::interval(TICK);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if let Some(wd) = &task.deps.watchdog {
            wd.feed();
        }

        tokio::select! {
            event = eventloop.poll() => {
                match event {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => task.on_connected().await,
                    Ok(Event::Incoming(Packet::Publish(p))) => {
                        let topic = p.topic.clone();
                        task.on_publish_packet(&topic, &p.payload);
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => task.on_disconnected("server disconnect"),
                    Ok(_) => {}
                    Err(e) => {
                        debug!("broker session error: {e}");
                        task.on_disconnected("session error");
                        tokio::time::sleep(BROKER_ERROR_BACKOFF).await;
                    }
                }
            }
            _ = ticker.tick() => {
                task.steady_tick().await;
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reason_flags;

    // -- Payload rendering ----------------------------------------------------

    #[test]
    fn temperature_payload_shape() {
        let p = render_temperature(21.5, "20260307140509", false);
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert_eq!(v["value"], 21.5);
        assert_eq!(v["ts"], "20260307140509");
        assert!(v.get("buffered").is_none());
    }

    #[test]
    fn buffered_temperature_payload_is_marked() {
        let p = render_temperature(21.5, "00000000000000", true);
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert_eq!(v["buffered"], 1);
    }

    #[test]
    fn moisture_payload_shape() {
        let p = render_moisture(48.0, "20260307140509", false);
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert_eq!(v["percent"], 48.0);
        assert!(v.get("buffered").is_none());
    }

    #[test]
    fn alert_payload_shape() {
        let p = render_alert(
            Severity::Warning,
            Reason::TempHigh,
            29.0,
            55.0,
            "20260307140509",
            false,
        );
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert_eq!(v["state"], "WARNING");
        assert_eq!(v["reason"], "temp_high");
        assert_eq!(v["temp"], 29.0);
        assert_eq!(v["moisture"], 55.0);
        assert!(v.get("snapshot").is_none());
    }

    #[test]
    fn snapshot_alert_is_marked() {
        let p = render_alert(Severity::Ok, Reason::Clear, 20.0, 50.0, "00000000000000", true);
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert_eq!(v["snapshot"], 1);
        assert_eq!(v["state"], "OK");
        assert_eq!(v["reason"], "clear");
    }

    #[test]
    fn status_buffered_counts_always_sum() {
        let snapshot = StateSnapshot {
            state: Severity::Warning,
            reasons: reason_flags::TEMP_HIGH | reason_flags::MOIST_LOW,
            last_change_ms: 0,
        };
        let p = render_status(123_456, 4, 2, snapshot);
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert_eq!(v["status"], "online");
        assert_eq!(v["uptime_ms"], 123_456);
        assert_eq!(v["buffered"], 6);
        assert_eq!(v["buffered_temp"], 4);
        assert_eq!(v["buffered_moist"], 2);
        assert_eq!(v["state"], "WARNING");
        assert_eq!(v["reasons"][0], "temp_high");
        assert_eq!(v["reasons"][1], "moisture_low");
    }

    #[test]
    fn status_omits_empty_reasons() {
        let snapshot = StateSnapshot {
            state: Severity::Ok,
            reasons: 0,
            last_change_ms: 0,
        };
        let p = render_status(1, 0, 0, snapshot);
        let v: serde_json::Value = serde_json::from_str(&p).unwrap();
        assert!(v.get("reasons").is_none());
    }

    #[test]
    fn payloads_fit_the_size_budget() {
        let p = render_alert(
            Severity::Critical,
            Reason::MoistureHigh,
            -40.375,
            100.0,
            "20261231235959",
            true,
        );
        assert!(p.len() <= crate::models::MAX_PAYLOAD_LEN);
    }

    // -- Command parsing ------------------------------------------------------

    #[test]
    fn parse_single_threshold_update() {
        let payload = br#"{"command":"update_threshold","threshold":"temp_high_warn","value":27.5}"#;
        let commands = parse_command_payload(payload, 42).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].ts_ms, 42);
        assert_eq!(commands[0].value, 27.5);
        assert!(matches!(
            commands[0].kind,
            CommandKind::UpdateThreshold {
                id: ThresholdId::TempHighWarn
            }
        ));
    }

    #[test]
    fn parse_batched_threshold_update() {
        let payload =
            br#"{"command":"update_thresholds","temp_low_warn":8,"temp_high_crit":35,"moisture_low_warn":30}"#;
        let commands = parse_command_payload(payload, 0).unwrap();
        assert_eq!(commands.len(), 3);
        let ids: Vec<ThresholdId> = commands
            .iter()
            .map(|c| match c.kind {
                CommandKind::UpdateThreshold { id } => id,
                _ => panic!("unexpected kind"),
            })
            .collect();
        assert!(ids.contains(&ThresholdId::TempLowWarn));
        assert!(ids.contains(&ThresholdId::TempHighCrit));
        assert!(ids.contains(&ThresholdId::MoistureLowWarn));
    }

    #[test]
    fn parse_unknown_name_is_skipped() {
        let payload = br#"{"command":"update_threshold","threshold":"frobnication","value":1}"#;
        let commands = parse_command_payload(payload, 0).unwrap();
        assert!(commands.is_empty());
    }

    #[test]
    fn parse_batch_skips_unknown_and_non_numeric_fields() {
        let payload =
            br#"{"command":"update_thresholds","temp_low_warn":8,"bogus":1,"temp_high_warn":"hot"}"#;
        let commands = parse_command_payload(payload, 0).unwrap();
        assert_eq!(commands.len(), 1);
    }

    #[test]
    fn parse_malformed_json_is_an_error() {
        assert!(parse_command_payload(b"{not json", 0).is_err());
    }

    #[test]
    fn parse_unknown_command_is_an_error() {
        assert!(parse_command_payload(br#"{"command":"reboot"}"#, 0).is_err());
    }

    #[test]
    fn parse_missing_value_is_an_error() {
        let payload = br#"{"command":"update_threshold","threshold":"temp_low_warn"}"#;
        assert!(parse_command_payload(payload, 0).is_err());
    }

    #[test]
    fn parse_oversized_payload_is_rejected() {
        let mut payload = br#"{"command":"update_thresholds""#.to_vec();
        payload.extend(std::iter::repeat(b' ').take(300));
        payload.push(b'}');
        assert!(parse_command_payload(&payload, 0).is_err());
    }

    // -- Telemetry slot -------------------------------------------------------

    #[test]
    fn slot_emits_nothing_without_a_cached_value() {
        let mut slot = TelemetrySlot::new(5000);
        assert_eq!(slot.tick(0, true, true, "ts"), None);
    }

    #[test]
    fn slot_rate_limits_to_the_period() {
        let mut slot = TelemetrySlot::new(5000);
        slot.cache(21.0);
        assert_eq!(slot.tick(1000, true, true, "ts"), Some(21.0));
        slot.cache(22.0);
        assert_eq!(slot.tick(2000, true, true, "ts"), None);
        assert_eq!(slot.tick(5999, true, true, "ts"), None);
        assert_eq!(slot.tick(6000, true, true, "ts"), Some(22.0));
    }

    #[test]
    fn slot_buffers_while_disconnected() {
        let mut slot = TelemetrySlot::new(5000);
        slot.cache(21.0);
        assert_eq!(slot.tick(1000, false, true, "00000000000000"), None);
        assert_eq!(slot.ring.len(), 1);
        assert_eq!(slot.ring.peek().unwrap().value, 21.0);
    }

    #[test]
    fn slot_closed_gate_defers_without_consuming_the_period() {
        let mut slot = TelemetrySlot::new(5000);
        slot.cache(21.0);
        assert_eq!(slot.tick(1000, true, false, "ts"), None);
        // The gate opens 200 ms later: emission happens immediately rather
        // than waiting a full period.
        assert_eq!(slot.tick(1200, true, true, "ts"), Some(21.0));
    }

    #[test]
    fn thirty_seconds_offline_buffers_six_samples() {
        let mut slot = TelemetrySlot::new(5000);
        // Fresh samples each second; ticks every 100 ms, broker away.
        for now_ms in (0..30_000u32).step_by(100) {
            if now_ms % 1000 == 0 {
                slot.cache(20.0 + (now_ms / 1000) as f32);
            }
            slot.tick(now_ms, false, true, "00000000000000");
        }
        assert_eq!(slot.ring.len(), 6);
    }

    #[test]
    fn slot_ring_never_exceeds_capacity() {
        let mut slot = TelemetrySlot::new(0); // emit every tick
        slot.cache(1.0);
        for now_ms in 0..OFFLINE_RING_DEPTH as u32 + 100 {
            slot.tick(now_ms, false, true, "ts");
        }
        assert_eq!(slot.ring.len(), OFFLINE_RING_DEPTH);
    }

    // -- QoS mapping ----------------------------------------------------------

    #[test]
    fn qos_levels_map_through() {
        assert_eq!(qos_from(0), QoS::AtMostOnce);
        assert_eq!(qos_from(1), QoS::AtLeastOnce);
        assert_eq!(qos_from(2), QoS::ExactlyOnce);
        assert_eq!(qos_from(9), QoS::AtLeastOnce);
    }
}
