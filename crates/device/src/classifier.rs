//! Health classification: per-sensor band matching with clearing
//! hysteresis, severity combination across channels, and transition
//! debouncing with per-level confirmation windows.
//!
//! Everything here is pure — time and thresholds come in as arguments —
//! so the monitor task stays a thin shell around testable logic.

use crate::models::{Reason, Severity};

// ---------------------------------------------------------------------------
// Threshold bands
// ---------------------------------------------------------------------------

/// The four band edges for one sensor channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bands {
    pub low_warn: f32,
    pub low_crit: f32,
    pub high_warn: f32,
    pub high_crit: f32,
}

/// Point-in-time copy of both channels' bands. The monitor refreshes this
/// from the threshold store every few seconds rather than locking the
/// store on every classification.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSnapshot {
    pub temp: Bands,
    pub moist: Bands,
}

// ---------------------------------------------------------------------------
// Per-channel classification
// ---------------------------------------------------------------------------

/// Result of classifying one channel, fed back in as `prev` on the next
/// tick so clearing hysteresis can widen the band the channel is sitting in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    pub severity: Severity,
    pub reason: Reason,
}

impl ChannelState {
    pub const OK: ChannelState = ChannelState {
        severity: Severity::Ok,
        reason: Reason::Clear,
    };
}

/// Which side of the band range a reason sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Low,
    High,
}

fn side_of(reason: Reason) -> Option<Side> {
    match reason {
        Reason::TempLow | Reason::MoistureLow => Some(Side::Low),
        Reason::TempHigh | Reason::MoistureHigh => Some(Side::High),
        Reason::Clear => None,
    }
}

/// Widen the band `prev` currently occupies by `margin`, in the clearing
/// direction only: low thresholds shift up, high thresholds shift down.
/// A reading must retreat past the original edge by the margin before the
/// channel re-classifies out of that band.
fn effective_bands(bands: Bands, prev: ChannelState, margin: f32) -> Bands {
    let mut b = bands;
    match (prev.severity, side_of(prev.reason)) {
        (Severity::Critical, Some(Side::Low)) => b.low_crit += margin,
        (Severity::Critical, Some(Side::High)) => b.high_crit -= margin,
        (Severity::Warning, Some(Side::Low)) => b.low_warn += margin,
        (Severity::Warning, Some(Side::High)) => b.high_warn -= margin,
        _ => {}
    }
    b
}

/// Classify a temperature reading. Band matching is greedy in severity
/// order with inclusive edges; inconsistent band orderings are accepted
/// and resolved by match order.
pub fn classify_temperature(t: f32, bands: Bands, prev: ChannelState, hysteresis_c: f32) -> ChannelState {
    let b = effective_bands(bands, prev, hysteresis_c);
    let (severity, reason) = if t <= b.low_crit {
        (Severity::Critical, Reason::TempLow)
    } else if t >= b.high_crit {
        (Severity::Critical, Reason::TempHigh)
    } else if t <= b.low_warn {
        (Severity::Warning, Reason::TempLow)
    } else if t >= b.high_warn {
        (Severity::Warning, Reason::TempHigh)
    } else {
        (Severity::Ok, Reason::Clear)
    };
    ChannelState { severity, reason }
}

/// Classify a moisture percentage. Low bands are matched before high
/// bands; both critical-low and warning-low outrank the high side.
pub fn classify_moisture(m: f32, bands: Bands, prev: ChannelState, hysteresis_pct: f32) -> ChannelState {
    let b = effective_bands(bands, prev, hysteresis_pct);
    let (severity, reason) = if m <= b.low_crit {
        (Severity::Critical, Reason::MoistureLow)
    } else if m <= b.low_warn {
        (Severity::Warning, Reason::MoistureLow)
    } else if m >= b.high_crit {
        (Severity::Critical, Reason::MoistureHigh)
    } else if m >= b.high_warn {
        (Severity::Warning, Reason::MoistureHigh)
    } else {
        (Severity::Ok, Reason::Clear)
    };
    ChannelState { severity, reason }
}

// ---------------------------------------------------------------------------
// Combination across channels
// ---------------------------------------------------------------------------

/// Overall severity is the max across channels. The reported reason comes
/// from whichever channel contributed the peak; temperature wins ties.
pub fn combine(temp: ChannelState, moist: ChannelState) -> ChannelState {
    let severity = temp.severity.max(moist.severity);
    if severity == Severity::Ok {
        return ChannelState::OK;
    }
    let reason = if temp.severity == severity {
        temp.reason
    } else {
        moist.reason
    };
    ChannelState { severity, reason }
}

/// Bitmask union of all channel reasons that are currently non-OK,
/// regardless of which channel forced the peak severity.
pub fn active_reason_flags(temp: ChannelState, moist: ChannelState) -> u8 {
    let mut flags = 0;
    if temp.severity != Severity::Ok {
        flags |= temp.reason.flag();
    }
    if moist.severity != Severity::Ok {
        flags |= moist.reason.flag();
    }
    flags
}

// ---------------------------------------------------------------------------
// Debouncing
// ---------------------------------------------------------------------------

/// Confirmation-window debouncer for committed state transitions.
///
/// A candidate `Warning` or `Critical` must be observed continuously for
/// its confirmation window before the transition commits; any tick where
/// the candidate differs resets that window. Returning to `Ok` commits
/// immediately (clearing is governed by hysteresis, not debounce).
#[derive(Debug)]
pub struct Debouncer {
    confirm_warn_ms: u32,
    confirm_crit_ms: u32,
    warn_since: Option<u32>,
    crit_since: Option<u32>,
}

impl Debouncer {
    pub fn new(confirm_warn_ms: u32, confirm_crit_ms: u32) -> Self {
        Self {
            confirm_warn_ms,
            confirm_crit_ms,
            warn_since: None,
            crit_since: None,
        }
    }

    /// Feed one classification tick. Returns `true` when a transition from
    /// `current` to `candidate` should commit now.
    pub fn update(&mut self, current: Severity, candidate: Severity, now_ms: u32) -> bool {
        // Continuity requirement: a window only survives while its level
        // keeps being observed.
        if candidate != Severity::Warning {
            self.warn_since = None;
        }
        if candidate != Severity::Critical {
            self.crit_since = None;
        }

        if candidate == current {
            // Keep the window armed so a later flicker away and back
            // restarts it from scratch.
            if candidate == Severity::Warning {
                self.warn_since.get_or_insert(now_ms);
            }
            if candidate == Severity::Critical {
                self.crit_since.get_or_insert(now_ms);
            }
            return false;
        }

        match candidate {
            Severity::Ok => true,
            Severity::Warning => {
                let since = *self.warn_since.get_or_insert(now_ms);
                now_ms.wrapping_sub(since) >= self.confirm_warn_ms
            }
            Severity::Critical => {
                let since = *self.crit_since.get_or_insert(now_ms);
                now_ms.wrapping_sub(since) >= self.confirm_crit_ms
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
