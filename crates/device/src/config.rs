//! Device configuration: one record covering network, broker session,
//! sampling cadence, debounce, alarm patterns, calibration, and storage.
//!
//! Loaded from a TOML file (every field optional, compiled-in defaults
//! otherwise), then overlaid with secrets from the environment so
//! credentials stay out of the config file.

use anyhow::{Context, Result};
use serde::Deserialize;

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    /// Device id: MQTT client id and the `<id>` segment of every topic.
    pub id: String,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            id: "plant-0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WifiSection {
    pub ssid: String,
    pub password: String,
    pub auto_connect: bool,
    pub max_retry: u32,
    pub backoff_ms: u64,
}

impl Default for WifiSection {
    fn default() -> Self {
        Self {
            ssid: String::new(),
            password: String::new(),
            auto_connect: true,
            max_retry: 5,
            backoff_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub keepalive_s: u64,
    pub default_qos: u8,
    pub telemetry_retain: bool,
    pub lwt_enable: bool,
    pub lwt_prefix: String,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            keepalive_s: 60,
            default_qos: 1,
            telemetry_retain: false,
            lwt_enable: true,
            lwt_prefix: "thermometer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingSection {
    pub temperature_ms: u64,
    pub moisture_ms: u64,
    pub cloud_status_ms: u64,
    pub telemetry_ms: u64,
    pub reconnect_ms: u64,
}

impl Default for SamplingSection {
    fn default() -> Self {
        Self {
            temperature_ms: 1000,
            moisture_ms: 1000,
            cloud_status_ms: 5000,
            telemetry_ms: 5000,
            reconnect_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DebounceSection {
    pub confirm_warn_ms: u32,
    pub confirm_crit_ms: u32,
    pub hysteresis_c: f32,
    pub hysteresis_pct: f32,
}

impl Default for DebounceSection {
    fn default() -> Self {
        Self {
            confirm_warn_ms: 5000,
            confirm_crit_ms: 3000,
            hysteresis_c: 1.0,
            hysteresis_pct: 2.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternSection {
    pub warn_beep_ms: u64,
    pub crit_on_ms: u64,
    pub crit_off_ms: u64,
    pub crit_repeat: u32,
    pub crit_cycle_ms: u64,
}

impl Default for PatternSection {
    fn default() -> Self {
        Self {
            warn_beep_ms: 200,
            crit_on_ms: 200,
            crit_off_ms: 150,
            crit_repeat: 3,
            crit_cycle_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalibrationSection {
    /// Raw ADC reading in open air (dry).
    pub raw_dry: u16,
    /// Raw ADC reading in water (wet).
    pub raw_wet: u16,
    /// Conversions averaged per moisture reading.
    pub moisture_samples: u8,
    /// Conversions averaged per temperature reading.
    pub temperature_samples: u8,
}

impl Default for CalibrationSection {
    fn default() -> Self {
        Self {
            raw_dry: 26_000,
            raw_wet: 12_000,
            moisture_samples: 8,
            temperature_samples: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite database holding persisted runtime state.
    pub db_url: String,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            db_url: "sqlite:plant-device.db?mode=rwc".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// The record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub wifi: WifiSection,
    pub mqtt: MqttSection,
    pub sampling: SamplingSection,
    pub debounce: DebounceSection,
    pub patterns: PatternSection,
    pub calibration: CalibrationSection,
    pub storage: StorageSection,
}

impl Config {
    /// Read and parse the TOML config file. A missing file yields the
    /// compiled-in defaults; a malformed file is an error.
    pub fn load(path: &str) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path, "no config file — using defaults");
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("failed to read config: {path}"));
            }
        };
        let config =
            toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
        Ok(config)
    }

    /// Overlay secrets and endpoint overrides from an environment lookup
    /// (`|k| std::env::var(k).ok()` in production).
    pub fn overlay<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(id) = lookup("DEVICE_ID") {
            self.device.id = id;
        }
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT").and_then(|p| p.parse().ok()) {
            self.mqtt.port = port;
        }
        if let Some(ssid) = lookup("WIFI_SSID") {
            self.wifi.ssid = ssid;
        }
        if let Some(password) = lookup("WIFI_PASSWORD") {
            self.wifi.password = password;
        }
    }

    /// Topic for this device: `<lwt_prefix>/<id>/<leaf>`.
    pub fn topic(&self, leaf: &str) -> String {
        format!("{}/{}/{}", self.mqtt.lwt_prefix, self.device.id, leaf)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
