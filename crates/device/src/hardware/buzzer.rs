//! Alert transducer. The `gpio` feature gates the real rppal driver;
//! without it, a mock implementation logs state changes to stderr.
//!
//! The alarm task holds the transducer generically: anything that can
//! switch on and off (buzzer, speaker, vibration motor) qualifies.
//! `set_frequency` is optional and a no-op for on/off-only hardware.

use std::time::Duration;

#[cfg(feature = "gpio")]
use anyhow::Result;
#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

// ---------------------------------------------------------------------------
// Capability
// ---------------------------------------------------------------------------

pub trait Transducer: Send {
    fn on(&mut self);
    fn off(&mut self);

    /// Optional tone control; on/off-only transducers ignore it.
    fn set_frequency(&mut self, _hz: u32) {}
}

/// Hold the transducer on for `on_ms`, then release it.
pub async fn beep(t: &mut dyn Transducer, on_ms: u64) {
    t.on();
    tokio::time::sleep(Duration::from_millis(on_ms)).await;
    t.off();
}

/// Play `repeat` pulses of `on_ms` on / `off_ms` off.
pub async fn pulse(t: &mut dyn Transducer, on_ms: u64, off_ms: u64, repeat: u32) {
    for i in 0..repeat {
        beep(t, on_ms).await;
        if i + 1 < repeat {
            tokio::time::sleep(Duration::from_millis(off_ms)).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Real GPIO buzzer (production — requires rppal + Raspberry Pi hardware)
// ---------------------------------------------------------------------------

#[cfg(feature = "gpio")]
pub struct GpioBuzzer {
    pin: OutputPin,
    active_high: bool,
}

#[cfg(feature = "gpio")]
impl GpioBuzzer {
    pub fn new(pin_num: u8, active_high: bool) -> Result<Self> {
        let mut pin = Gpio::new()?.get(pin_num)?.into_output();
        // Fail-safe: silent at startup.
        if active_high {
            pin.set_low();
        } else {
            pin.set_high();
        }
        tracing::info!(pin = pin_num, active_high, "buzzer ready");
        Ok(Self { pin, active_high })
    }
}

#[cfg(feature = "gpio")]
impl Transducer for GpioBuzzer {
    fn on(&mut self) {
        if self.active_high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
    }

    fn off(&mut self) {
        if self.active_high {
            self.pin.set_low();
        } else {
            self.pin.set_high();
        }
    }
}

// ---------------------------------------------------------------------------
// Mock transducer (development — no hardware, logs state to stderr)
// ---------------------------------------------------------------------------

pub struct MockTransducer {
    pub active: bool,
    pub activations: u32,
    pub frequency_hz: Option<u32>,
}

impl MockTransducer {
    pub fn new() -> Self {
        eprintln!("[mock-buzzer] transducer initialised (no hardware)");
        Self {
            active: false,
            activations: 0,
            frequency_hz: None,
        }
    }
}

impl Default for MockTransducer {
    fn default() -> Self {
        Self::new()
    }
}

impl Transducer for MockTransducer {
    fn on(&mut self) {
        if !self.active {
            self.activations += 1;
        }
        self.active = true;
        match self.frequency_hz {
            Some(hz) => eprintln!("[mock-buzzer] ON ({hz} Hz)"),
            None => eprintln!("[mock-buzzer] ON"),
        }
    }

    fn off(&mut self) {
        self.active = false;
        eprintln!("[mock-buzzer] OFF");
    }

    fn set_frequency(&mut self, hz: u32) {
        self.frequency_hz = Some(hz);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
