//! Shared message and value types flowing between tasks: sensor samples,
//! alarm events, LCD updates, commands, and pre-rendered publish requests.

use std::fmt;

// ---------------------------------------------------------------------------
// Severity and reasons
// ---------------------------------------------------------------------------

/// Overall health level. Ordered: `Ok < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a sensor channel is (or was) out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Clear,
    TempHigh,
    TempLow,
    MoistureLow,
    MoistureHigh,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        match self {
            Reason::Clear => "clear",
            Reason::TempHigh => "temp_high",
            Reason::TempLow => "temp_low",
            Reason::MoistureLow => "moisture_low",
            Reason::MoistureHigh => "moisture_high",
        }
    }
}

/// Bitmask flags for the set of currently active reasons on `DeviceState`.
pub mod reason_flags {
    pub const TEMP_HIGH: u8 = 1 << 0;
    pub const TEMP_LOW: u8 = 1 << 1;
    pub const MOIST_LOW: u8 = 1 << 2;
    pub const MOIST_HIGH: u8 = 1 << 3;

    /// Expand a flags byte into reason name strings (status payload order).
    pub fn names(flags: u8) -> Vec<&'static str> {
        let mut out = Vec::new();
        if flags & TEMP_HIGH != 0 {
            out.push("temp_high");
        }
        if flags & TEMP_LOW != 0 {
            out.push("temp_low");
        }
        if flags & MOIST_LOW != 0 {
            out.push("moisture_low");
        }
        if flags & MOIST_HIGH != 0 {
            out.push("moisture_high");
        }
        out
    }
}

impl Reason {
    /// The bitmask flag for this reason, or 0 for `Clear`.
    pub fn flag(self) -> u8 {
        match self {
            Reason::Clear => 0,
            Reason::TempHigh => reason_flags::TEMP_HIGH,
            Reason::TempLow => reason_flags::TEMP_LOW,
            Reason::MoistureLow => reason_flags::MOIST_LOW,
            Reason::MoistureHigh => reason_flags::MOIST_HIGH,
        }
    }

    /// The first reason present in a flags byte (temperature first), or
    /// `Clear` when no flag is set. Used where a payload wants a single
    /// representative reason for a whole state.
    pub fn first_from_flags(flags: u8) -> Reason {
        if flags & reason_flags::TEMP_HIGH != 0 {
            Reason::TempHigh
        } else if flags & reason_flags::TEMP_LOW != 0 {
            Reason::TempLow
        } else if flags & reason_flags::MOIST_LOW != 0 {
            Reason::MoistureLow
        } else if flags & reason_flags::MOIST_HIGH != 0 {
            Reason::MoistureHigh
        } else {
            Reason::Clear
        }
    }
}

// ---------------------------------------------------------------------------
// Sensor samples
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureSample {
    /// Averaged reading in degrees Celsius.
    pub temp_c: f32,
    /// Monotonic device milliseconds since boot.
    pub ts_ms: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MoistureSample {
    /// Averaged raw ADC value.
    pub raw: u16,
    /// Calibrated percentage, 0.0..=100.0.
    pub percent: f32,
    /// Monotonic device milliseconds since boot.
    pub ts_ms: u32,
}

// ---------------------------------------------------------------------------
// Alarm events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    Warning,
    Critical,
    Clear,
}

#[derive(Debug, Clone, Copy)]
pub struct AlarmEvent {
    pub ts_ms: u32,
    pub temperature_c: f32,
    pub kind: AlarmKind,
}

// ---------------------------------------------------------------------------
// LCD updates
// ---------------------------------------------------------------------------

/// Width of the character display in columns.
pub const LCD_COLS: usize = 16;

/// A full-screen update for the 16x2 character LCD. Lines are always
/// exactly [`LCD_COLS`] characters, space-padded, so stale content from a
/// previous longer string never survives.
#[derive(Debug, Clone, PartialEq)]
pub struct LcdUpdate {
    pub line1: String,
    pub line2: String,
    /// RGB backlight to apply before writing, if any.
    pub backlight: Option<(u8, u8, u8)>,
    pub clear_first: bool,
}

impl LcdUpdate {
    pub fn new(line1: &str, line2: &str, backlight: Option<(u8, u8, u8)>, clear_first: bool) -> Self {
        Self {
            line1: pad_line(line1),
            line2: pad_line(line2),
            backlight,
            clear_first,
        }
    }
}

/// Truncate or space-pad `text` to exactly [`LCD_COLS`] characters.
/// Non-printable bytes are replaced so the controller never sees raw
/// control codes.
pub fn pad_line(text: &str) -> String {
    let mut out = String::with_capacity(LCD_COLS);
    for c in text.chars().take(LCD_COLS) {
        out.push(if (' '..='~').contains(&c) { c } else { '?' });
    }
    while out.len() < LCD_COLS {
        out.push(' ');
    }
    out
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// One adjustable threshold. Names match the command payload fields and
/// the persisted blob order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdId {
    TempLowWarn,
    TempLowCrit,
    TempHighWarn,
    TempHighCrit,
    MoistureLowWarn,
    MoistureLowCrit,
    MoistureHighWarn,
    MoistureHighCrit,
}

impl ThresholdId {
    /// All ids in blob/payload order.
    pub const ALL: [ThresholdId; 8] = [
        ThresholdId::TempLowWarn,
        ThresholdId::TempLowCrit,
        ThresholdId::TempHighWarn,
        ThresholdId::TempHighCrit,
        ThresholdId::MoistureLowWarn,
        ThresholdId::MoistureLowCrit,
        ThresholdId::MoistureHighWarn,
        ThresholdId::MoistureHighCrit,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ThresholdId::TempLowWarn => "temp_low_warn",
            ThresholdId::TempLowCrit => "temp_low_crit",
            ThresholdId::TempHighWarn => "temp_high_warn",
            ThresholdId::TempHighCrit => "temp_high_crit",
            ThresholdId::MoistureLowWarn => "moisture_low_warn",
            ThresholdId::MoistureLowCrit => "moisture_low_crit",
            ThresholdId::MoistureHighWarn => "moisture_high_warn",
            ThresholdId::MoistureHighCrit => "moisture_high_crit",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|id| id.name() == name)
    }

    pub fn is_temperature(self) -> bool {
        matches!(
            self,
            ThresholdId::TempLowWarn
                | ThresholdId::TempLowCrit
                | ThresholdId::TempHighWarn
                | ThresholdId::TempHighCrit
        )
    }
}

/// What a [`Command`] asks for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CommandKind {
    /// Internal (monitor -> cloud): publish an alert reflecting a committed
    /// state transition.
    EmitAlert { state: Severity, reason: Reason },
    /// External (cloud -> command): apply one threshold update.
    UpdateThreshold { id: ThresholdId },
}

#[derive(Debug, Clone, Copy)]
pub struct Command {
    pub ts_ms: u32,
    pub kind: CommandKind,
    /// Threshold value for `UpdateThreshold`; unused for `EmitAlert`.
    pub value: f32,
}

// ---------------------------------------------------------------------------
// Pre-rendered publishes
// ---------------------------------------------------------------------------

pub const MAX_TOPIC_LEN: usize = 96;
pub const MAX_PAYLOAD_LEN: usize = 320;

/// A fully rendered MQTT publish handed to the cloud task (used for
/// threshold-change ACKs). Construction fails rather than silently
/// truncating an oversized render.
#[derive(Debug, Clone)]
pub struct CloudPublishRequest {
    pub topic: String,
    pub payload: String,
}

impl CloudPublishRequest {
    pub fn new(topic: String, payload: String) -> anyhow::Result<Self> {
        anyhow::ensure!(
            topic.len() <= MAX_TOPIC_LEN,
            "publish topic too long ({} > {MAX_TOPIC_LEN})",
            topic.len()
        );
        anyhow::ensure!(
            payload.len() <= MAX_PAYLOAD_LEN,
            "publish payload too long ({} > {MAX_PAYLOAD_LEN})",
            payload.len()
        );
        Ok(Self { topic, payload })
    }
}

// ===========================================================================
// Tests
// ===========================================================================
