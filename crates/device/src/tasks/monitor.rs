//! Monitor task: drains the sample queues to the freshest value, runs the
//! classifier with debounce and hysteresis, and fans committed
//! transitions out to the device state, the alarm task, the cloud task,
//! and the LCD.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::channels::send_or_drop;
use crate::classifier::{
    active_reason_flags, classify_moisture, classify_temperature, combine, ChannelState, Debouncer,
    ThresholdSnapshot,
};
use crate::config::DebounceSection;
use crate::models::{
    AlarmEvent, AlarmKind, Command, CommandKind, LcdUpdate, MoistureSample, Reason, Severity,
    TemperatureSample,
};
use crate::state::SharedDeviceState;
use crate::thresholds::ThresholdStore;
use crate::timesync::Uptime;
use crate::watchdog::WatchdogHandle;

/// Classification loop period.
const TICK: Duration = Duration::from_millis(100);

/// How long a threshold snapshot is served before re-reading the store.
const SNAPSHOT_REFRESH: Duration = Duration::from_secs(5);

/// LCD refresh cadence: steady states at 1 Hz, critical flashing at 2 Hz.
const LCD_STEADY: Duration = Duration::from_millis(1000);
const LCD_FLASH: Duration = Duration::from_millis(500);

// ---------------------------------------------------------------------------
// Core state machine (pure — no channels, time passed in)
// ---------------------------------------------------------------------------

/// A committed state transition and everything the fan-out needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Transition {
    pub state: Severity,
    pub reason: Reason,
    /// Union of all currently non-OK channel reasons.
    pub reason_flags: u8,
    /// Alarm event to emit, if this transition warrants one.
    pub alarm: Option<AlarmKind>,
}

pub(crate) struct MonitorCore {
    hysteresis_c: f32,
    hysteresis_pct: f32,
    debouncer: Debouncer,
    pub last_temp: Option<TemperatureSample>,
    pub last_moist: Option<MoistureSample>,
    pub temp_ch: ChannelState,
    pub moist_ch: ChannelState,
    pub current: ChannelState,
}

impl MonitorCore {
    pub fn new(debounce: &DebounceSection) -> Self {
        Self {
            hysteresis_c: debounce.hysteresis_c,
            hysteresis_pct: debounce.hysteresis_pct,
            debouncer: Debouncer::new(debounce.confirm_warn_ms, debounce.confirm_crit_ms),
            last_temp: None,
            last_moist: None,
            temp_ch: ChannelState::OK,
            moist_ch: ChannelState::OK,
            current: ChannelState::OK,
        }
    }

    pub fn absorb_temp(&mut self, sample: TemperatureSample) {
        self.last_temp = Some(sample);
    }

    pub fn absorb_moist(&mut self, sample: MoistureSample) {
        self.last_moist = Some(sample);
    }

    /// One classification tick. Returns a transition when the debouncer
    /// commits a new overall state.
    pub fn step(&mut self, snapshot: &ThresholdSnapshot, now_ms: u32) -> Option<Transition> {
        self.temp_ch = match self.last_temp {
            Some(s) => classify_temperature(s.temp_c, snapshot.temp, self.temp_ch, self.hysteresis_c),
            None => ChannelState::OK,
        };
        self.moist_ch = match self.last_moist {
            Some(s) => classify_moisture(s.percent, snapshot.moist, self.moist_ch, self.hysteresis_pct),
            None => ChannelState::OK,
        };

        let candidate = combine(self.temp_ch, self.moist_ch);
        if !self
            .debouncer
            .update(self.current.severity, candidate.severity, now_ms)
        {
            return None;
        }

        let previous = self.current.severity;
        self.current = candidate;

        let alarm = if candidate.severity == Severity::Critical {
            Some(AlarmKind::Critical)
        } else if previous == Severity::Critical {
            Some(AlarmKind::Clear)
        } else if candidate.severity == Severity::Warning {
            Some(AlarmKind::Warning)
        } else {
            None
        };

        Some(Transition {
            state: candidate.severity,
            reason: candidate.reason,
            reason_flags: active_reason_flags(self.temp_ch, self.moist_ch),
            alarm,
        })
    }
}

// ---------------------------------------------------------------------------
// LCD rendering
// ---------------------------------------------------------------------------

/// Backlight colors per state; critical alternates bright and dim red.
fn backlight_for(state: Severity, flash_phase: bool) -> (u8, u8, u8) {
    match state {
        Severity::Ok => (0, 255, 0),
        Severity::Warning => (255, 128, 0),
        Severity::Critical => {
            if flash_phase {
                (255, 0, 0)
            } else {
                (20, 0, 0)
            }
        }
    }
}

/// Suffix naming the channels sitting at `level`: "T", "M", or "T+M".
fn channel_suffix(temp_ch: ChannelState, moist_ch: ChannelState, level: Severity) -> Option<&'static str> {
    match (temp_ch.severity == level, moist_ch.severity == level) {
        (true, true) => Some("T+M"),
        (true, false) => Some("T"),
        (false, true) => Some("M"),
        (false, false) => None,
    }
}

pub(crate) fn render_lcd(
    state: Severity,
    temp_ch: ChannelState,
    moist_ch: ChannelState,
    last_temp: Option<TemperatureSample>,
    last_moist: Option<MoistureSample>,
    flash_phase: bool,
) -> LcdUpdate {
    let t = last_temp.map_or(0.0, |s| s.temp_c);
    let m = last_moist.map_or(0.0, |s| s.percent);
    let line1 = format!("T:{t:4.1}C M:{m:4.1}%");

    let line2 = match state {
        Severity::Ok => "OK".to_string(),
        Severity::Warning => match channel_suffix(temp_ch, moist_ch, Severity::Warning) {
            Some(chs) => format!("Warn: {chs}"),
            None => "Warning".to_string(),
        },
        Severity::Critical => match channel_suffix(temp_ch, moist_ch, Severity::Critical) {
            Some(chs) => format!("Crit: {chs}"),
            None => "Critical".to_string(),
        },
    };

    LcdUpdate::new(&line1, &line2, Some(backlight_for(state, flash_phase)), false)
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

pub struct MonitorDeps {
    pub temp_rx: mpsc::Receiver<TemperatureSample>,
    pub moist_rx: mpsc::Receiver<MoistureSample>,
    pub alarm_tx: mpsc::Sender<AlarmEvent>,
    pub lcd_tx: mpsc::Sender<LcdUpdate>,
    pub cmd_internal_tx: mpsc::Sender<Command>,
    pub temp_latest_tx: watch::Sender<Option<TemperatureSample>>,
    pub moist_latest_tx: watch::Sender<Option<MoistureSample>>,
    pub device_state: SharedDeviceState,
    pub thresholds: Arc<ThresholdStore>,
    pub debounce: DebounceSection,
    pub uptime: Uptime,
    pub watchdog: Option<WatchdogHandle>,
}

pub async fn run(mut deps: MonitorDeps) {
    info!("monitor task started");

    let mut core = MonitorCore::new(&deps.debounce);
    let mut snapshot = deps.thresholds.snapshot();
    let mut snapshot_at = Instant::now();

    let mut flash_phase = false;
    let mut last_lcd = Instant::now() - LCD_STEADY; // draw on the first tick

    let mut ticker = tokio::time::interval(TICK);

    loop {
        ticker.tick().await;
        if let Some(wd) = &deps.watchdog {
            wd.feed();
        }

        // Drain to the freshest sample of each kind; stale samples only
        // matter for their absence.
        while let Ok(sample) = deps.temp_rx.try_recv() {
            core.absorb_temp(sample);
        }
        while let Ok(sample) = deps.moist_rx.try_recv() {
            core.absorb_moist(sample);
        }

        // Bounded-staleness threshold snapshot.
        if snapshot_at.elapsed() >= SNAPSHOT_REFRESH {
            snapshot = deps.thresholds.snapshot();
            snapshot_at = Instant::now();
            debug!("threshold snapshot refreshed");
        }

        let now_ms = deps.uptime.millis();
        if let Some(transition) = core.step(&snapshot, now_ms) {
            info!(
                state = transition.state.as_str(),
                reason = transition.reason.as_str(),
                flags = transition.reason_flags,
                "state transition committed"
            );

            deps.device_state
                .set(transition.state, transition.reason_flags, now_ms);

            if let Some(kind) = transition.alarm {
                let event = AlarmEvent {
                    ts_ms: now_ms,
                    temperature_c: core.last_temp.map_or(0.0, |s| s.temp_c),
                    kind,
                };
                send_or_drop(&deps.alarm_tx, event, "q_alarm");
            }

            let command = Command {
                ts_ms: now_ms,
                kind: CommandKind::EmitAlert {
                    state: transition.state,
                    reason: transition.reason,
                },
                value: 0.0,
            };
            send_or_drop(&deps.cmd_internal_tx, command, "q_cmd_internal");
        }

        // Latest-only forwards to the cloud task (overwrite semantics).
        if let Some(sample) = core.last_temp {
            deps.temp_latest_tx.send_replace(Some(sample));
        }
        if let Some(sample) = core.last_moist {
            deps.moist_latest_tx.send_replace(Some(sample));
        }

        // LCD cadence: 1 Hz steady, 2 Hz alternating red when critical.
        let (interval, next_phase) = if core.current.severity == Severity::Critical {
            (LCD_FLASH, !flash_phase)
        } else {
            (LCD_STEADY, false)
        };
        if last_lcd.elapsed() >= interval {
            flash_phase = next_phase;
            let update = render_lcd(
                core.current.severity,
                core.temp_ch,
                core.moist_ch,
                core.last_temp,
                core.last_moist,
                flash_phase,
            );
            send_or_drop(&deps.lcd_tx, update, "q_lcd");
            last_lcd = Instant::now();
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
