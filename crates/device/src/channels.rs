//! Inter-task queues. Bounded mpsc channels carry events with a
//! drop-newest-on-full policy; the two latest-only forwards to the cloud
//! task are watch channels, where a write overwrites and the reader
//! always observes the most recent value.

use tokio::sync::{mpsc, watch};

use crate::models::{AlarmEvent, Command, CloudPublishRequest, LcdUpdate, MoistureSample, TemperatureSample};

// Queue depths, sized to absorb a bounded burst without unbounded latency.
pub const Q_TEMP_DEPTH: usize = 32;
pub const Q_MOIST_DEPTH: usize = 16;
pub const Q_ALARM_DEPTH: usize = 16;
pub const Q_LCD_DEPTH: usize = 8;
pub const Q_CMD_INTERNAL_DEPTH: usize = 16;
pub const Q_CMD_EXTERNAL_DEPTH: usize = 16;
pub const Q_ACK_DEPTH: usize = 4;

/// Every queue in the system, created once at startup. `main` moves each
/// endpoint into the task that owns it; each receiver has exactly one
/// consumer task.
pub struct Wiring {
    // samplers -> monitor
    pub temp_tx: mpsc::Sender<TemperatureSample>,
    pub temp_rx: mpsc::Receiver<TemperatureSample>,
    pub moist_tx: mpsc::Sender<MoistureSample>,
    pub moist_rx: mpsc::Receiver<MoistureSample>,

    // monitor -> alarm
    pub alarm_tx: mpsc::Sender<AlarmEvent>,
    pub alarm_rx: mpsc::Receiver<AlarmEvent>,

    // monitor -> lcd
    pub lcd_tx: mpsc::Sender<LcdUpdate>,
    pub lcd_rx: mpsc::Receiver<LcdUpdate>,

    // monitor -> cloud (alert emits)
    pub cmd_internal_tx: mpsc::Sender<Command>,
    pub cmd_internal_rx: mpsc::Receiver<Command>,

    // cloud -> command (threshold updates)
    pub cmd_external_tx: mpsc::Sender<Command>,
    pub cmd_external_rx: mpsc::Receiver<Command>,

    // command -> cloud (rendered ACK publishes)
    pub ack_tx: mpsc::Sender<CloudPublishRequest>,
    pub ack_rx: mpsc::Receiver<CloudPublishRequest>,

    // monitor -> cloud, latest-only overwrite
    pub temp_latest_tx: watch::Sender<Option<TemperatureSample>>,
    pub temp_latest_rx: watch::Receiver<Option<TemperatureSample>>,
    pub moist_latest_tx: watch::Sender<Option<MoistureSample>>,
    pub moist_latest_rx: watch::Receiver<Option<MoistureSample>>,
}

impl Wiring {
    pub fn new() -> Self {
        let (temp_tx, temp_rx) = mpsc::channel(Q_TEMP_DEPTH);
        let (moist_tx, moist_rx) = mpsc::channel(Q_MOIST_DEPTH);
        let (alarm_tx, alarm_rx) = mpsc::channel(Q_ALARM_DEPTH);
        let (lcd_tx, lcd_rx) = mpsc::channel(Q_LCD_DEPTH);
        let (cmd_internal_tx, cmd_internal_rx) = mpsc::channel(Q_CMD_INTERNAL_DEPTH);
        let (cmd_external_tx, cmd_external_rx) = mpsc::channel(Q_CMD_EXTERNAL_DEPTH);
        let (ack_tx, ack_rx) = mpsc::channel(Q_ACK_DEPTH);
        let (temp_latest_tx, temp_latest_rx) = watch::channel(None);
        let (moist_latest_tx, moist_latest_rx) = watch::channel(None);

        Self {
            temp_tx,
            temp_rx,
            moist_tx,
            moist_rx,
            alarm_tx,
            alarm_rx,
            lcd_tx,
            lcd_rx,
            cmd_internal_tx,
            cmd_internal_rx,
            cmd_external_tx,
            cmd_external_rx,
            ack_tx,
            ack_rx,
            temp_latest_tx,
            temp_latest_rx,
            moist_latest_tx,
            moist_latest_rx,
        }
    }
}

impl Default for Wiring {
    fn default() -> Self {
        Self::new()
    }
}

/// Non-blocking enqueue with the standard on-full policy: the newest
/// message is dropped and a warning logged. Queue-full is non-fatal.
pub fn send_or_drop<T>(tx: &mpsc::Sender<T>, value: T, queue: &'static str) {
    if let Err(e) = tx.try_send(value) {
        match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(queue, "queue full — dropping message");
            }
            mpsc::error::TrySendError::Closed(_) => {
                tracing::warn!(queue, "queue closed — dropping message");
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
    use crate::models::{AlarmKind, Severity};

    #[test]
    fn ack_queue_enforces_depth_four() {
        let mut w = Wiring::new();
        for i in 0..Q_ACK_DEPTH {
            let req = CloudPublishRequest::new(format!("t/{i}"), "{}".into()).unwrap();
            assert!(w.ack_tx.try_send(req).is_ok());
        }
        let overflow = CloudPublishRequest::new("t/x".into(), "{}".into()).unwrap();
        assert!(w.ack_tx.try_send(overflow).is_err());
        // Consumer still sees the first four in order.
        assert_eq!(w.ack_rx.try_recv().unwrap().topic, "t/0");
    }

    #[test]
    fn event_queues_preserve_fifo_order() {
        let mut w = Wiring::new();
        for kind in [AlarmKind::Warning, AlarmKind::Critical, AlarmKind::Clear] {
            w.alarm_tx
                .try_send(AlarmEvent {
                    ts_ms: 0,
                    temperature_c: 0.0,
                    kind,
                })
                .unwrap();
        }
        assert_eq!(w.alarm_rx.try_recv().unwrap().kind, AlarmKind::Warning);
        assert_eq!(w.alarm_rx.try_recv().unwrap().kind, AlarmKind::Critical);
        assert_eq!(w.alarm_rx.try_recv().unwrap().kind, AlarmKind::Clear);
    }

    #[test]
    fn latest_only_queue_overwrites() {
        let mut w = Wiring::new();
        for ts_ms in [100, 200, 300] {
            w.temp_latest_tx
                .send(Some(TemperatureSample { temp_c: 20.0, ts_ms }))
                .unwrap();
        }
        // Only the most recent write is observable.
        let seen = *w.temp_latest_rx.borrow_and_update();
        assert_eq!(seen.unwrap().ts_ms, 300);
        // And it is consumed exactly once per write generation.
        assert!(!w.temp_latest_rx.has_changed().unwrap());
    }

    #[test]
    fn latest_only_queue_starts_empty() {
        let w = Wiring::new();
        assert!(w.moist_latest_rx.borrow().is_none());
    }

    #[test]
    fn send_or_drop_swallows_overflow() {
        let mut w = Wiring::new();
        for _ in 0..Q_LCD_DEPTH + 3 {
            send_or_drop(
                &w.lcd_tx,
                LcdUpdate::new("a", "b", None, false),
                "q_lcd",
            );
        }
        // Exactly the queue depth survived.
        let mut drained = 0;
        while w.lcd_rx.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, Q_LCD_DEPTH);
    }

    #[test]
    fn send_or_drop_ignores_closed_receiver() {
        let w = Wiring::new();
        drop(w.cmd_internal_rx);
        // Must not panic.
        send_or_drop(
            &w.cmd_internal_tx,
            Command {
                ts_ms: 0,
                kind: crate::models::CommandKind::EmitAlert {
                    state: Severity::Ok,
                    reason: crate::models::Reason::Clear,
                },
                value: 0.0,
            },
            "q_cmd_internal",
        );
    }
}
