//! Process-wide device health state, written only by the monitor task and
//! polled by the cloud and alarm tasks.

use std::sync::{Arc, Mutex};

use crate::models::Severity;

pub type SharedDeviceState = Arc<DeviceState>;

/// One consistent observation of the device state. Readers always see all
/// three fields from the same write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: Severity,
    /// Bitmask of `models::reason_flags` values currently active.
    pub reasons: u8,
    /// Monotonic device milliseconds of the last committed transition.
    pub last_change_ms: u32,
}

/// The `(state, reasons, last_change_ms)` triple behind a mutex. Critical
/// sections only copy the triple in or out; no subscription mechanism —
/// readers poll.
pub struct DeviceState {
    inner: Mutex<StateSnapshot>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateSnapshot {
                state: Severity::Ok,
                reasons: 0,
                last_change_ms: 0,
            }),
        }
    }

    /// Publish a committed transition. All three fields update atomically
    /// with respect to `get`.
    pub fn set(&self, state: Severity, reasons: u8, now_ms: u32) {
        let mut guard = self.inner.lock().expect("device state mutex poisoned");
        *guard = StateSnapshot {
            state,
            reasons,
            last_change_ms: now_ms,
        };
    }

    pub fn get(&self) -> StateSnapshot {
        *self.inner.lock().expect("device state mutex poisoned")
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::reason_flags;

    #[test]
    fn starts_ok_with_no_reasons() {
        let ds = DeviceState::new();
        let snap = ds.get();
        assert_eq!(snap.state, Severity::Ok);
        assert_eq!(snap.reasons, 0);
        assert_eq!(snap.last_change_ms, 0);
    }

    #[test]
    fn set_updates_all_three_fields() {
        let ds = DeviceState::new();
        ds.set(Severity::Critical, reason_flags::TEMP_LOW, 4200);
        let snap = ds.get();
        assert_eq!(snap.state, Severity::Critical);
        assert_eq!(snap.reasons, reason_flags::TEMP_LOW);
        assert_eq!(snap.last_change_ms, 4200);
    }

    #[test]
    fn later_set_overwrites_earlier() {
        let ds = DeviceState::new();
        ds.set(Severity::Warning, reason_flags::MOIST_LOW, 1000);
        ds.set(Severity::Ok, 0, 2000);
        let snap = ds.get();
        assert_eq!(snap.state, Severity::Ok);
        assert_eq!(snap.reasons, 0);
        assert_eq!(snap.last_change_ms, 2000);
    }

    #[test]
    fn readers_see_a_consistent_triple() {
        // Hammer the state from a writer thread while a reader checks that
        // the (state, reasons) pairing is never torn.
        let ds = Arc::new(DeviceState::new());
        let writer = {
            let ds = Arc::clone(&ds);
            std::thread::spawn(move || {
                for i in 0..10_000u32 {
                    if i % 2 == 0 {
                        ds.set(Severity::Ok, 0, i);
                    } else {
                        ds.set(Severity::Critical, reason_flags::TEMP_HIGH, i);
                    }
                }
            })
        };
        for _ in 0..10_000 {
            let snap = ds.get();
            match snap.state {
                Severity::Ok => assert_eq!(snap.reasons, 0),
                Severity::Critical => assert_eq!(snap.reasons, reason_flags::TEMP_HIGH),
                Severity::Warning => panic!("never written"),
            }
        }
        writer.join().unwrap();
    }
}
