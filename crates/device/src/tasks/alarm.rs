//! Alarm task: drives the alert transducer from committed transitions,
//! and every tick reconciles its mode against the shared device state so
//! the transducer reflects the declared state even if a queue message was
//! lost.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::PatternSection;
use crate::hardware::buzzer::{beep, pulse, Transducer};
use crate::models::{AlarmEvent, AlarmKind, Severity};
use crate::state::SharedDeviceState;
use crate::watchdog::WatchdogHandle;

/// Receive timeout, which doubles as the reconciliation poll period.
const TICK: Duration = Duration::from_millis(100);

// Startup chime: two short blips.
const CHIME_ON_MS: u64 = 100;
const CHIME_OFF_MS: u64 = 80;
const CHIME_REPEAT: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    None,
    Critical,
}

pub struct AlarmDeps {
    pub alarm_rx: mpsc::Receiver<AlarmEvent>,
    pub device_state: SharedDeviceState,
    pub transducer: Box<dyn Transducer>,
    pub patterns: PatternSection,
    pub watchdog: Option<WatchdogHandle>,
}

pub async fn run(mut deps: AlarmDeps) {
    info!("alarm task started");
    let t = deps.transducer.as_mut();

    // Boot chime: audible confirmation that the alert path works.
    pulse(t, CHIME_ON_MS, CHIME_OFF_MS, CHIME_REPEAT).await;

    let mut mode = Mode::None;
    let mut next_cycle = Instant::now();

    loop {
        if let Some(wd) = &deps.watchdog {
            wd.feed();
        }

        match tokio::time::timeout(TICK, deps.alarm_rx.recv()).await {
            Ok(Some(event)) => match event.kind {
                AlarmKind::Warning => {
                    debug!(
                        ts_ms = event.ts_ms,
                        temp_c = event.temperature_c,
                        "warning beep"
                    );
                    beep(t, deps.patterns.warn_beep_ms).await;
                }
                AlarmKind::Critical => {
                    if mode != Mode::Critical {
                        mode = Mode::Critical;
                        next_cycle = Instant::now(); // play immediately
                    }
                }
                AlarmKind::Clear => {
                    mode = Mode::None;
                    t.off();
                }
            },
            Ok(None) => {
                // Producer gone; reconciliation below still runs.
                tokio::time::sleep(TICK).await;
            }
            Err(_) => {} // timeout — fall through to reconciliation
        }

        // Independent safety reconciliation against the declared state.
        let snapshot = deps.device_state.get();
        let declared = snapshot.state;
        if declared == Severity::Critical {
            if mode != Mode::Critical {
                debug!(
                    last_change_ms = snapshot.last_change_ms,
                    "reconciling to critical from device state"
                );
                mode = Mode::Critical;
                next_cycle = Instant::now();
            }
        } else if mode != Mode::None {
            debug!("reconciling to idle from device state");
            mode = Mode::None;
            t.off();
        }

        // Repeating critical pattern; the cycle period is start-to-start.
        if mode == Mode::Critical && Instant::now() >= next_cycle {
            let cycle_start = Instant::now();
            pulse(
                t,
                deps.patterns.crit_on_ms,
                deps.patterns.crit_off_ms,
                deps.patterns.crit_repeat,
            )
            .await;
            next_cycle = cycle_start + Duration::from_millis(deps.patterns.crit_cycle_ms);
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::buzzer::MockTransducer;
    use crate::models::reason_flags;
    use crate::state::DeviceState;
    use std::sync::{Arc, Mutex};

    /// Transducer handle the test can inspect while the task owns a clone.
    #[derive(Clone)]
    struct SharedTransducer(Arc<Mutex<MockTransducer>>);

    impl Transducer for SharedTransducer {
        fn on(&mut self) {
            self.0.lock().unwrap().on();
        }
        fn off(&mut self) {
            self.0.lock().unwrap().off();
        }
    }

    fn activations(t: &Arc<Mutex<MockTransducer>>) -> u32 {
        t.lock().unwrap().activations
    }

    fn spawn_alarm(
        device_state: SharedDeviceState,
    ) -> (mpsc::Sender<AlarmEvent>, Arc<Mutex<MockTransducer>>) {
        let (tx, rx) = mpsc::channel(16);
        let inner = Arc::new(Mutex::new(MockTransducer::new()));
        let deps = AlarmDeps {
            alarm_rx: rx,
            device_state,
            transducer: Box::new(SharedTransducer(Arc::clone(&inner))),
            patterns: PatternSection::default(),
            watchdog: None,
        };
        tokio::spawn(run(deps));
        (tx, inner)
    }

    fn event(kind: AlarmKind) -> AlarmEvent {
        AlarmEvent {
            ts_ms: 0,
            temperature_c: 0.0,
            kind,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn boot_chime_plays_on_startup() {
        let ds = Arc::new(DeviceState::new());
        let (_tx, t) = spawn_alarm(ds);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(activations(&t), CHIME_REPEAT);
    }

    #[tokio::test(start_paused = true)]
    async fn warning_event_beeps_once() {
        let ds = Arc::new(DeviceState::new());
        let (tx, t) = spawn_alarm(ds);
        tokio::time::sleep(Duration::from_secs(1)).await; // past the chime
        tx.send(event(AlarmKind::Warning)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(activations(&t), CHIME_REPEAT + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn critical_repeats_the_pattern_until_cleared() {
        let ds = Arc::new(DeviceState::new());
        let (tx, t) = spawn_alarm(Arc::clone(&ds));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after_chime = activations(&t);

        // The monitor publishes the device state before the alarm event;
        // mirror that ordering so reconciliation agrees with the event.
        ds.set(Severity::Critical, reason_flags::MOIST_LOW, 0);
        tx.send(event(AlarmKind::Critical)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1200)).await;
        // First cycle: three pulses.
        assert_eq!(activations(&t) - after_chime, 3);

        // A full cycle later the pattern has played again.
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert_eq!(activations(&t) - after_chime, 6);

        // Clearing stops the repetition.
        ds.set(Severity::Ok, 0, 0);
        tx.send(event(AlarmKind::Clear)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        let after_clear = activations(&t);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(activations(&t), after_clear);
        assert!(!t.lock().unwrap().active);
    }

    #[tokio::test(start_paused = true)]
    async fn reconciliation_starts_pattern_without_an_event() {
        let ds = Arc::new(DeviceState::new());
        let (_tx, t) = spawn_alarm(Arc::clone(&ds));
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after_chime = activations(&t);

        // No queue message — only the declared state flips.
        ds.set(Severity::Critical, reason_flags::TEMP_LOW, 0);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(
            activations(&t) > after_chime,
            "pattern should start from reconciliation alone"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn reconciliation_silences_a_stale_critical() {
        let ds = Arc::new(DeviceState::new());
        ds.set(Severity::Critical, reason_flags::TEMP_LOW, 0);
        let (tx, t) = spawn_alarm(Arc::clone(&ds));
        tx.send(event(AlarmKind::Critical)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(activations(&t) > 0);

        // Declared state recovers, but the Clear event was "lost".
        ds.set(Severity::Ok, 0, 0);
        tokio::time::sleep(Duration::from_millis(500)).await;
        let settled = activations(&t);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(activations(&t), settled, "no pulses after reconciliation");
    }
}
