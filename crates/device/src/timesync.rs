//! Time sources: a monotonic millisecond clock for internal timestamps
//! and a wall-clock sync gate for the 14-character publish timestamp.
//!
//! Internal data always carries monotonic `u32` milliseconds; wall-clock
//! string formatting happens only at publish time. On this target the OS
//! disciplines the clock (timesyncd/chrony), so "initializing SNTP"
//! reduces to arming the gate and watching for the clock to become
//! reasonable.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Emitted in place of a timestamp while the wall clock is not yet synced.
pub const ZERO_TS14: &str = "00000000000000";

/// Any wall clock before this epoch second is assumed unsynced
/// (2025-12-11 00:00:00 UTC — well before any production build of this
/// firmware existed).
const MIN_REASONABLE_EPOCH: i64 = 1_765_411_200;

// ---------------------------------------------------------------------------
// Monotonic uptime
// ---------------------------------------------------------------------------

/// Monotonic milliseconds since boot, shared by every task. Wraps after
/// ~49.7 days, which all consumers tolerate via wrapping subtraction.
#[derive(Clone)]
pub struct Uptime {
    started: Instant,
}

impl Uptime {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn millis(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
}

impl Default for Uptime {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Wall-clock sync
// ---------------------------------------------------------------------------

/// Wall-clock sync gate. Cheap to clone; all clones share the armed flag.
#[derive(Clone)]
pub struct TimeSync {
    inited: Arc<AtomicBool>,
}

impl TimeSync {
    pub fn new() -> Self {
        Self {
            inited: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Arm the sync gate. Idempotent.
    pub fn init(&self) {
        if !self.inited.swap(true, Ordering::Relaxed) {
            tracing::info!("time sync armed");
        }
    }

    pub fn is_synced(&self) -> bool {
        self.inited.load(Ordering::Relaxed) && epoch_is_reasonable(Utc::now().timestamp())
    }

    /// The 14-character `YYYYMMDDHHMMSS` UTC timestamp, or all zeros when
    /// the clock is not yet synced.
    pub fn ts14(&self) -> String {
        if self.is_synced() {
            ts14_at(Utc::now())
        } else {
            ZERO_TS14.to_string()
        }
    }
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new()
    }
}

fn epoch_is_reasonable(epoch_secs: i64) -> bool {
    epoch_secs >= MIN_REASONABLE_EPOCH
}

/// Format an explicit instant as the 14-character publish timestamp.
pub fn ts14_at(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

// ===========================================================================
// Tests
// ===========================================================================
