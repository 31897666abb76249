//! Runtime-adjustable classification thresholds with persistent commit.
//!
//! Eight floats live in memory behind a mutex; every successful write
//! persists the whole record as an opaque 32-byte little-endian blob under
//! a stable namespace/key in SQLite. On startup the blob is loaded if
//! present and of the expected size; otherwise compiled-in defaults are
//! seeded and immediately persisted so future boots are self-consistent.

use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};

use crate::classifier::{Bands, ThresholdSnapshot};
use crate::models::ThresholdId;

const NAMESPACE: &str = "thresholds";
const KEY: &str = "data";

/// Size of the persisted record: eight little-endian f32s.
pub const BLOB_SIZE: usize = 32;

// Write-time clamp ranges.
const TEMP_MIN: f32 = -50.0;
const TEMP_MAX: f32 = 100.0;
const MOIST_MIN: f32 = 0.0;
const MOIST_MAX: f32 = 100.0;

// ---------------------------------------------------------------------------
// Value record
// ---------------------------------------------------------------------------

/// The eight threshold values, in blob order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdValues {
    pub temp_low_warn: f32,
    pub temp_low_crit: f32,
    pub temp_high_warn: f32,
    pub temp_high_crit: f32,
    pub moisture_low_warn: f32,
    pub moisture_low_crit: f32,
    pub moisture_high_warn: f32,
    pub moisture_high_crit: f32,
}

impl Default for ThresholdValues {
    /// Compiled-in defaults for a typical indoor plant.
    fn default() -> Self {
        Self {
            temp_low_warn: 10.0,
            temp_low_crit: 5.0,
            temp_high_warn: 28.0,
            temp_high_crit: 32.0,
            moisture_low_warn: 35.0,
            moisture_low_crit: 20.0,
            moisture_high_warn: 80.0,
            moisture_high_crit: 90.0,
        }
    }
}

impl ThresholdValues {
    pub fn get(&self, id: ThresholdId) -> f32 {
        match id {
            ThresholdId::TempLowWarn => self.temp_low_warn,
            ThresholdId::TempLowCrit => self.temp_low_crit,
            ThresholdId::TempHighWarn => self.temp_high_warn,
            ThresholdId::TempHighCrit => self.temp_high_crit,
            ThresholdId::MoistureLowWarn => self.moisture_low_warn,
            ThresholdId::MoistureLowCrit => self.moisture_low_crit,
            ThresholdId::MoistureHighWarn => self.moisture_high_warn,
            ThresholdId::MoistureHighCrit => self.moisture_high_crit,
        }
    }

    fn set_clamped(&mut self, id: ThresholdId, value: f32) -> f32 {
        let clamped = if id.is_temperature() {
            value.clamp(TEMP_MIN, TEMP_MAX)
        } else {
            value.clamp(MOIST_MIN, MOIST_MAX)
        };
        let slot = match id {
            ThresholdId::TempLowWarn => &mut self.temp_low_warn,
            ThresholdId::TempLowCrit => &mut self.temp_low_crit,
            ThresholdId::TempHighWarn => &mut self.temp_high_warn,
            ThresholdId::TempHighCrit => &mut self.temp_high_crit,
            ThresholdId::MoistureLowWarn => &mut self.moisture_low_warn,
            ThresholdId::MoistureLowCrit => &mut self.moisture_low_crit,
            ThresholdId::MoistureHighWarn => &mut self.moisture_high_warn,
            ThresholdId::MoistureHighCrit => &mut self.moisture_high_crit,
        };
        *slot = clamped;
        clamped
    }

    pub fn to_blob(&self) -> [u8; BLOB_SIZE] {
        let mut blob = [0u8; BLOB_SIZE];
        for (i, id) in ThresholdId::ALL.iter().enumerate() {
            blob[i * 4..i * 4 + 4].copy_from_slice(&self.get(*id).to_le_bytes());
        }
        blob
    }

    /// Decode a persisted blob. Any size other than [`BLOB_SIZE`] is
    /// treated as "not present" by the caller.
    pub fn from_blob(blob: &[u8]) -> Option<Self> {
        if blob.len() != BLOB_SIZE {
            return None;
        }
        let mut values = ThresholdValues::default();
        for (i, id) in ThresholdId::ALL.iter().enumerate() {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&blob[i * 4..i * 4 + 4]);
            values.set_clamped(*id, f32::from_le_bytes(bytes));
        }
        Some(values)
    }

    pub fn temp_bands(&self) -> Bands {
        Bands {
            low_warn: self.temp_low_warn,
            low_crit: self.temp_low_crit,
            high_warn: self.temp_high_warn,
            high_crit: self.temp_high_crit,
        }
    }

    pub fn moist_bands(&self) -> Bands {
        Bands {
            low_warn: self.moisture_low_warn,
            low_crit: self.moisture_low_crit,
            high_warn: self.moisture_high_warn,
            high_crit: self.moisture_high_crit,
        }
    }

    pub fn snapshot(&self) -> ThresholdSnapshot {
        ThresholdSnapshot {
            temp: self.temp_bands(),
            moist: self.moist_bands(),
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Process-wide threshold store. Reads copy a value out under the mutex;
/// writes update memory then persist the whole record. Concurrent writers
/// are serialized by the store's mutex plus the single-connection pool.
pub struct ThresholdStore {
    pool: Pool<Sqlite>,
    values: Mutex<ThresholdValues>,
}

impl ThresholdStore {
    /// Open (or create) the backing database and load the threshold blob.
    /// If no blob of the expected size exists, `defaults` are used and
    /// persisted immediately.
    pub async fn open(db_url: &str, defaults: ThresholdValues) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open threshold store: {db_url}"))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS kv (
                namespace TEXT NOT NULL,
                key       TEXT NOT NULL,
                value     BLOB NOT NULL,
                PRIMARY KEY (namespace, key)
            )",
        )
        .execute(&pool)
        .await
        .context("failed to create kv table")?;

        let store = Self {
            pool,
            values: Mutex::new(defaults),
        };

        match store.load_blob().await? {
            Some(values) => {
                *store.values.lock().expect("threshold mutex poisoned") = values;
                tracing::info!("loaded thresholds from storage");
            }
            None => {
                tracing::info!("no stored thresholds — seeding defaults");
                store.persist(defaults).await?;
            }
        }

        Ok(store)
    }

    pub fn get(&self, id: ThresholdId) -> f32 {
        self.values.lock().expect("threshold mutex poisoned").get(id)
    }

    /// Copy out all eight values in one critical section.
    pub fn snapshot(&self) -> ThresholdSnapshot {
        self.values
            .lock()
            .expect("threshold mutex poisoned")
            .snapshot()
    }

    /// Update one threshold (clamped to its valid range) and persist the
    /// whole record. Returns the stored value.
    pub async fn set(&self, id: ThresholdId, value: f32) -> Result<f32> {
        let (stored, values) = {
            let mut guard = self.values.lock().expect("threshold mutex poisoned");
            let stored = guard.set_clamped(id, value);
            (stored, *guard)
        };
        self.persist(values).await?;
        tracing::info!(threshold = id.name(), value = stored, "threshold updated");
        Ok(stored)
    }

    async fn load_blob(&self) -> Result<Option<ThresholdValues>> {
        let row = sqlx::query("SELECT value FROM kv WHERE namespace = ? AND key = ?")
            .bind(NAMESPACE)
            .bind(KEY)
            .fetch_optional(&self.pool)
            .await
            .context("failed to read threshold blob")?;

        let Some(row) = row else {
            return Ok(None);
        };
        let blob: Vec<u8> = row.get("value");
        match ThresholdValues::from_blob(&blob) {
            Some(values) => Ok(Some(values)),
            None => {
                tracing::warn!(
                    size = blob.len(),
                    expected = BLOB_SIZE,
                    "stored threshold blob has unexpected size — using defaults"
                );
                Ok(None)
            }
        }
    }

    async fn persist(&self, values: ThresholdValues) -> Result<()> {
        let blob = values.to_blob();
        sqlx::query(
            "INSERT INTO kv (namespace, key, value) VALUES (?, ?, ?)
             ON CONFLICT (namespace, key) DO UPDATE SET value = excluded.value",
        )
        .bind(NAMESPACE)
        .bind(KEY)
        .bind(blob.to_vec())
        .execute(&self.pool)
        .await
        .context("failed to persist threshold blob")?;
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
