//! ADC access and the two sensor probes built on it.
//!
//! The converter itself is an external collaborator behind [`AdcUnit`];
//! the core's contribution is the shared-handle discipline (both probes
//! may sit on the same physical unit, so every conversion happens under
//! the shared lock) and the calibration mapping from raw counts to
//! engineering units.

use std::sync::{Arc, Mutex};

use anyhow::Result;

/// Full-scale PGA range of the converter in millivolts (±4.096 V
/// single-ended, 15 usable bits).
const ADC_FULL_SCALE_MV: f32 = 4096.0;
const ADC_FULL_SCALE_COUNTS: f32 = 32768.0;

/// Analog temperature sensor slope: 10 mV per degree Celsius.
const SENSOR_MV_PER_C: f32 = 10.0;

// ---------------------------------------------------------------------------
// ADC collaborator
// ---------------------------------------------------------------------------

/// One analog-to-digital converter unit. Implementations block for the
/// conversion internally.
pub trait AdcUnit: Send {
    fn init(&mut self) -> Result<()>;

    /// Average `samples` single-shot conversions on `channel`.
    fn read_average(&mut self, channel: u8, samples: u8) -> Result<u16>;
}

/// Shared handle to one ADC unit. Probes on different tasks clone the
/// handle; the internal mutex serializes conversions on the unit.
#[derive(Clone)]
pub struct SharedAdc {
    unit: Arc<Mutex<Box<dyn AdcUnit>>>,
}

impl SharedAdc {
    pub fn new(unit: Box<dyn AdcUnit>) -> Self {
        Self {
            unit: Arc::new(Mutex::new(unit)),
        }
    }

    pub fn init(&self) -> Result<()> {
        self.unit.lock().expect("adc mutex poisoned").init()
    }

    /// Lock the unit for the whole averaged conversion.
    pub fn read_average(&self, channel: u8, samples: u8) -> Result<u16> {
        self.unit
            .lock()
            .expect("adc mutex poisoned")
            .read_average(channel, samples)
    }
}

// ---------------------------------------------------------------------------
// Calibration math
// ---------------------------------------------------------------------------

/// Convert a raw count to degrees Celsius for the analog temperature
/// sensor (linear, 10 mV/degree against the PGA full scale).
pub fn raw_to_celsius(raw: u16) -> f32 {
    let mv = raw as f32 * ADC_FULL_SCALE_MV / ADC_FULL_SCALE_COUNTS;
    mv / SENSOR_MV_PER_C
}

/// Map a raw count to 0..=100 % using the dry/wet calibration endpoints.
/// Capacitive sensors usually read lower when wet, but either orientation
/// is accepted. Out-of-range readings clamp.
pub fn raw_to_percent(raw: u16, raw_dry: u16, raw_wet: u16) -> f32 {
    let dry = raw_dry as f32;
    let wet = raw_wet as f32;
    if dry == wet {
        return 0.0; // degenerate calibration — avoid div-by-zero
    }
    let percent = if dry > wet {
        // lower raw = wetter
        100.0 * (dry - raw as f32) / (dry - wet)
    } else {
        // higher raw = wetter
        100.0 * (raw as f32 - dry) / (wet - dry)
    };
    percent.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Probes
// ---------------------------------------------------------------------------

/// Analog temperature probe on one ADC channel.
pub struct TemperatureProbe {
    adc: SharedAdc,
    channel: u8,
    samples: u8,
}

impl TemperatureProbe {
    pub fn new(adc: SharedAdc, channel: u8, samples: u8) -> Self {
        Self {
            adc,
            channel,
            samples: samples.max(1),
        }
    }

    pub fn init(&mut self) -> Result<()> {
        self.adc.init()
    }

    /// One averaged reading in degrees Celsius (timestamp supplied by the
    /// sampler).
    pub fn read(&mut self) -> Result<f32> {
        let raw = self.adc.read_average(self.channel, self.samples)?;
        Ok(raw_to_celsius(raw))
    }
}

/// Capacitive soil-moisture probe on one ADC channel.
pub struct MoistureProbe {
    adc: SharedAdc,
    channel: u8,
    samples: u8,
    raw_dry: u16,
    raw_wet: u16,
}

impl MoistureProbe {
    pub fn new(adc: SharedAdc, channel: u8, samples: u8, raw_dry: u16, raw_wet: u16) -> Self {
        Self {
            adc,
            channel,
            samples: samples.max(1),
            raw_dry,
            raw_wet,
        }
    }

    pub fn init(&mut self) -> Result<()> {
        self.adc.init()
    }

    /// One averaged reading: raw counts plus calibrated percentage.
    pub fn read(&mut self) -> Result<(u16, f32)> {
        let raw = self.adc.read_average(self.channel, self.samples)?;
        Ok((raw, raw_to_percent(raw, self.raw_dry, self.raw_wet)))
    }
}

// ---------------------------------------------------------------------------
// Simulated ADC (development — no hardware)
// ---------------------------------------------------------------------------

struct SimChannel {
    base: f64,
    sigma: f64,
}

/// Random-walk ADC simulator. Each configured channel wanders around its
/// base value with per-read noise, so classifications and telemetry look
/// alive during development.
pub struct SimAdc {
    channels: Vec<(u8, SimChannel)>,
}

impl SimAdc {
    /// `channels` maps a channel index to `(base, sigma)` in raw counts.
    pub fn new(channels: &[(u8, f64, f64)]) -> Self {
        Self {
            channels: channels
                .iter()
                .map(|&(ch, base, sigma)| (ch, SimChannel { base, sigma }))
                .collect(),
        }
    }
}

impl AdcUnit for SimAdc {
    fn init(&mut self) -> Result<()> {
        tracing::info!(channels = self.channels.len(), "simulated adc ready");
        Ok(())
    }

    fn read_average(&mut self, channel: u8, samples: u8) -> Result<u16> {
        let Some((_, state)) = self.channels.iter_mut().find(|(ch, _)| *ch == channel) else {
            anyhow::bail!("sim adc: channel {channel} not configured");
        };
        // Slow walk of the underlying value plus per-read noise; averaging
        // narrows the noise like it would on real hardware.
        state.base += (fastrand::f64() - 0.5) * state.sigma;
        let noise = (fastrand::f64() - 0.5) * state.sigma / (samples.max(1) as f64).sqrt();
        let value = (state.base + noise).clamp(0.0, 32767.0);
        Ok(value as u16)
    }
}

// ---------------------------------------------------------------------------
// Scripted ADC (tests)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) struct ScriptedAdc {
    pub(crate) values: std::collections::VecDeque<Result<u16>>,
    pub(crate) init_results: std::collections::VecDeque<Result<()>>,
}

#[cfg(test)]
impl ScriptedAdc {
    pub(crate) fn ok(values: &[u16]) -> Self {
        Self {
            values: values.iter().map(|&v| Ok(v)).collect(),
            init_results: std::collections::VecDeque::new(),
        }
    }
}

#[cfg(test)]
impl AdcUnit for ScriptedAdc {
    fn init(&mut self) -> Result<()> {
        self.init_results.pop_front().unwrap_or(Ok(()))
    }

    fn read_average(&mut self, _channel: u8, _samples: u8) -> Result<u16> {
        self.values
            .pop_front()
            .unwrap_or_else(|| Err(anyhow::anyhow!("script exhausted")))
    }
}

// ===========================================================================
// Tests
// ===========================================================================
