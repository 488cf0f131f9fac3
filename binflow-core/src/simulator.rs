//! Periodic fill-level perturbation standing in for bin sensors.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::Duration;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::model::BinStatus;
use crate::ports::Clock;
use crate::registry::BinRegistry;

/// Simulator fill level at or above which a bin is FULL.
pub const SIM_FULL_THRESHOLD: i32 = 90;
/// Simulator fill level at or above which a bin is PARTIAL.
pub const SIM_PARTIAL_THRESHOLD: i32 = 60;
/// Simulator fill level at or above which a FULL bin raises its alert.
pub const SIM_ALERT_THRESHOLD: i32 = 95;
/// Hours since emptying after which a FULL bin turns OVERDUE in the simulator.
pub const SIM_OVERDUE_AFTER_HOURS: i64 = 48;

/// Random drift of a fill level, clamped to `0..=100`.
///
/// Nearly empty bins (below 20) only fill up, by 1 to 6 points. Nearly full
/// bins (above 80) wobble by at most 2 points. Everything else moves up to 5
/// points either way.
pub fn perturb<R: Rng + ?Sized>(fill_level: i32, rng: &mut R) -> i32 {
    let delta = if fill_level < 20 {
        rng.random_range(1..=6)
    } else if fill_level > 80 {
        rng.random_range(-2..=2)
    } else {
        rng.random_range(-5..=5)
    };
    fill_level.saturating_add(delta).clamp(0, 100)
}

/// Status and alert flag for a simulated reading (60/90 thresholds).
///
/// These thresholds intentionally differ from
/// [`status_for_fill_level`](crate::registry::status_for_fill_level).
#[must_use]
pub fn simulated_state(fill_level: i32, since_emptied: Option<Duration>) -> (BinStatus, bool) {
    let stale = since_emptied.is_some_and(|age| age > Duration::hours(SIM_OVERDUE_AFTER_HOURS));
    if fill_level >= SIM_FULL_THRESHOLD {
        if stale {
            (BinStatus::Overdue, true)
        } else {
            (BinStatus::Full, fill_level >= SIM_ALERT_THRESHOLD)
        }
    } else if fill_level >= SIM_PARTIAL_THRESHOLD {
        (BinStatus::Partial, false)
    } else {
        (BinStatus::Empty, false)
    }
}

/// Outcome of one simulator pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Bins whose record changed.
    pub updated: usize,
    /// Bins that raised their alert flag during the pass.
    pub alerts_raised: usize,
    /// Bins that could not be written.
    pub failures: usize,
}

/// Emulates sensor feeds by nudging every bin's fill level.
pub struct FleetSimulator<R = StdRng> {
    registry: Arc<BinRegistry>,
    clock: Arc<dyn Clock>,
    rng: Mutex<R>,
}

impl FleetSimulator<StdRng> {
    /// Simulator seeded from the config, or from OS entropy when unset.
    #[must_use]
    pub fn from_config(
        registry: Arc<BinRegistry>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) -> Self {
        let rng = config
            .simulator_seed
            .map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
        Self::new(registry, clock, rng)
    }
}

impl<R: Rng + Send> FleetSimulator<R> {
    /// Simulator drawing randomness from `rng`.
    #[must_use]
    pub fn new(registry: Arc<BinRegistry>, clock: Arc<dyn Clock>, rng: R) -> Self {
        Self {
            registry,
            clock,
            rng: Mutex::new(rng),
        }
    }

    /// Perturb and re-derive every bin once.
    ///
    /// Per-bin write failures are logged and counted, not propagated.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError`] when the bin list
    /// cannot be loaded.
    pub async fn tick(&self) -> Result<TickReport, EngineError> {
        let bins = self.registry.list().await?;
        let now = self.clock.now();
        let mut report = TickReport::default();

        for bin in bins {
            let result = self
                .registry
                .update(&bin.id, |current| {
                    let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
                    current.fill_level = perturb(current.fill_level, &mut *rng);
                    let since_emptied = current.last_emptied.map(|emptied| now - emptied);
                    let (status, alert) = simulated_state(current.fill_level, since_emptied);
                    current.status = status;
                    current.alert = alert;
                })
                .await;

            match result {
                Ok(change) => {
                    if change.before != change.after {
                        report.updated += 1;
                    }
                    if change.raised_alert() {
                        report.alerts_raised += 1;
                    }
                }
                Err(err) => {
                    warn!(bin_id = %bin.id, error = %err, "simulator could not update bin");
                    report.failures += 1;
                }
            }
        }

        debug!(
            updated = report.updated,
            alerts = report.alerts_raised,
            failures = report.failures,
            "simulator tick"
        );
        Ok(report)
    }

    /// Tick every `period` until `shutdown` carries `true` or its sender is dropped.
    pub async fn run(&self, period: StdDuration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), "fleet simulator running");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.tick().await {
                        warn!(error = %err, "simulator tick failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("fleet simulator stopped");
    }
}
