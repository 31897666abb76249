//! Task watchdog: safety-critical tasks subscribe and must feed on every
//! loop iteration; a starved task is fatal by policy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// A subscribed task that goes this long without feeding kills the process.
pub const TIMEOUT_MS: u64 = 8_000;

/// How often the enforcement loop scans for starvation.
const SCAN_INTERVAL: Duration = Duration::from_secs(1);

struct Registry {
    timeout: Duration,
    last_feed: Mutex<HashMap<&'static str, Instant>>,
}

/// Shared watchdog registry. Clones are handles to the same registry.
#[derive(Clone)]
pub struct Watchdog {
    registry: Arc<Registry>,
}

/// Feed handle owned by a subscribed task.
pub struct WatchdogHandle {
    name: &'static str,
    registry: Arc<Registry>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            registry: Arc::new(Registry {
                timeout,
                last_feed: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a task. The subscription counts as the first feed.
    pub fn subscribe(&self, name: &'static str) -> WatchdogHandle {
        self.registry
            .last_feed
            .lock()
            .expect("watchdog mutex poisoned")
            .insert(name, Instant::now());
        tracing::info!(task = name, "watchdog subscription");
        WatchdogHandle {
            name,
            registry: Arc::clone(&self.registry),
        }
    }

    /// Tasks whose last feed is older than the timeout as of `now`.
    fn starved(&self, now: Instant) -> Vec<(&'static str, Duration)> {
        self.registry
            .last_feed
            .lock()
            .expect("watchdog mutex poisoned")
            .iter()
            .filter_map(|(name, fed)| {
                let age = now.saturating_duration_since(*fed);
                (age > self.registry.timeout).then_some((*name, age))
            })
            .collect()
    }

    /// Run the enforcement loop. Never returns normally: a starved task
    /// aborts the whole process, matching the firmware panic-on-timeout
    /// policy.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(SCAN_INTERVAL);
        loop {
            ticker.tick().await;
            let starved = self.starved(Instant::now());
            if starved.is_empty() {
                continue;
            }
            for (name, age) in &starved {
                tracing::error!(
                    task = name,
                    starved_ms = age.as_millis() as u64,
                    "watchdog timeout"
                );
            }
            std::process::abort();
        }
    }
}

impl WatchdogHandle {
    pub fn feed(&self) {
        self.registry
            .last_feed
            .lock()
            .expect("watchdog mutex poisoned")
            .insert(self.name, Instant::now());
    }
}

// ===========================================================================
// Tests
// ===========================================================================
