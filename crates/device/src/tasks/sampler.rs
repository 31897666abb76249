//! Generic periodic sampler: both sensor tasks are this one driver
//! parameterized over a probe, a period, and an output queue.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::channels::send_or_drop;
use crate::hardware::probe::{MoistureProbe, TemperatureProbe};
use crate::models::{MoistureSample, TemperatureSample};
use crate::timesync::Uptime;
use crate::watchdog::WatchdogHandle;

/// Back-off before re-attempting a failed probe init.
const INIT_RETRY: Duration = Duration::from_secs(2);

/// One periodic sensor source.
pub trait Probe: Send + 'static {
    type Reading: Send + 'static;

    fn init(&mut self) -> Result<()>;

    /// Take one reading stamped with the given monotonic timestamp.
    fn sample(&mut self, ts_ms: u32) -> Result<Self::Reading>;
}

impl Probe for TemperatureProbe {
    type Reading = TemperatureSample;

    fn init(&mut self) -> Result<()> {
        TemperatureProbe::init(self)
    }

    fn sample(&mut self, ts_ms: u32) -> Result<TemperatureSample> {
        let temp_c = self.read()?;
        Ok(TemperatureSample { temp_c, ts_ms })
    }
}

impl Probe for MoistureProbe {
    type Reading = MoistureSample;

    fn init(&mut self) -> Result<()> {
        MoistureProbe::init(self)
    }

    fn sample(&mut self, ts_ms: u32) -> Result<MoistureSample> {
        let (raw, percent) = self.read()?;
        Ok(MoistureSample { raw, percent, ts_ms })
    }
}

/// Run one sampler forever.
///
/// Every period: feed the watchdog (when subscribed), take a reading, and
/// enqueue it without blocking. A failed init backs off and retries; a
/// failed read is logged and skipped until the next period. The task
/// never exits.
pub async fn run<P: Probe>(
    name: &'static str,
    mut probe: P,
    period: Duration,
    tx: mpsc::Sender<P::Reading>,
    uptime: Uptime,
    watchdog: Option<WatchdogHandle>,
) {
    info!(task = name, period_ms = period.as_millis() as u64, "sampler started");

    let mut inited = match probe.init() {
        Ok(()) => true,
        Err(e) => {
            warn!(task = name, "probe init failed; will retry: {e:#}");
            false
        }
    };

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if let Some(wd) = &watchdog {
            wd.feed();
        }

        if !inited {
            match probe.init() {
                Ok(()) => {
                    info!(task = name, "probe init successful");
                    inited = true;
                }
                Err(e) => {
                    warn!(task = name, "probe init retry failed: {e:#}");
                    tokio::time::sleep(INIT_RETRY).await;
                    continue;
                }
            }
        }

        match probe.sample(uptime.millis()) {
            Ok(reading) => send_or_drop(&tx, reading, name),
            Err(e) => warn!(task = name, "read failed: {e:#}"),
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Probe that replays a script of init and read results.
    struct ScriptedProbe {
        inits: VecDeque<bool>,
        reads: VecDeque<Option<f32>>,
    }

    impl Probe for ScriptedProbe {
        type Reading = TemperatureSample;

        fn init(&mut self) -> Result<()> {
            match self.inits.pop_front() {
                Some(true) | None => Ok(()),
                Some(false) => anyhow::bail!("init refused"),
            }
        }

        fn sample(&mut self, ts_ms: u32) -> Result<TemperatureSample> {
            match self.reads.pop_front() {
                Some(Some(temp_c)) => Ok(TemperatureSample { temp_c, ts_ms }),
                Some(None) => anyhow::bail!("conversion failed"),
                None => anyhow::bail!("script exhausted"),
            }
        }
    }

    fn spawn_sampler(probe: ScriptedProbe) -> mpsc::Receiver<TemperatureSample> {
        let (tx, rx) = mpsc::channel(8);
        tokio::spawn(run(
            "temp_sampler",
            probe,
            Duration::from_millis(1000),
            tx,
            Uptime::new(),
            None,
        ));
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn produces_one_sample_per_period() {
        let probe = ScriptedProbe {
            inits: VecDeque::from([true]),
            reads: VecDeque::from([Some(21.0), Some(22.0), Some(23.0)]),
        };
        let mut rx = spawn_sampler(probe);

        assert_eq!(rx.recv().await.unwrap().temp_c, 21.0);
        assert_eq!(rx.recv().await.unwrap().temp_c, 22.0);
        assert_eq!(rx.recv().await.unwrap().temp_c, 23.0);
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_skips_the_period() {
        let probe = ScriptedProbe {
            inits: VecDeque::from([true]),
            reads: VecDeque::from([Some(21.0), None, Some(23.0)]),
        };
        let mut rx = spawn_sampler(probe);

        assert_eq!(rx.recv().await.unwrap().temp_c, 21.0);
        // The failed read produces nothing; the next period succeeds.
        assert_eq!(rx.recv().await.unwrap().temp_c, 23.0);
    }

    #[tokio::test(start_paused = true)]
    async fn init_failure_retries_then_samples() {
        let probe = ScriptedProbe {
            inits: VecDeque::from([false, false, true]),
            reads: VecDeque::from([Some(19.5)]),
        };
        let mut rx = spawn_sampler(probe);

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.temp_c, 19.5);
        // Two failed init attempts back off 2 s each before the successful
        // one, so the first sample lands after at least ~4 s of test time.
        assert!(sample.ts_ms >= 4000, "sampled too early: {}", sample.ts_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_carry_monotonic_timestamps() {
        let probe = ScriptedProbe {
            inits: VecDeque::from([true]),
            reads: VecDeque::from([Some(1.0), Some(2.0)]),
        };
        let mut rx = spawn_sampler(probe);

        let a = rx.recv().await.unwrap();
        let b = rx.recv().await.unwrap();
        assert!(b.ts_ms >= a.ts_ms);
    }
}
