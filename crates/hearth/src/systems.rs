//! Demo Systems.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use hearth_core::{ComponentType, System, SystemContext, SystemError};
use hearth_tasks::TaskScheduler;
use tracing::{debug, info, warn};

use crate::scene::{Orbit, Spark};

/// Synchronous: checks every orbiter for a sane angle and radius.
#[derive(Debug, Default)]
pub struct OrbitMonitor;

impl System for OrbitMonitor {
    fn name(&self) -> &str {
        "orbit_monitor"
    }

    fn interests(&self) -> Vec<ComponentType> {
        vec![ComponentType::of::<Orbit>()]
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError> {
        let mut mean = 0.0;
        let orbits = ctx.components.of::<Orbit>();
        for slot in orbits {
            let Some(orbit) = slot.read::<Orbit>() else {
                continue;
            };
            if !orbit.angle.is_finite() || orbit.radius <= 0.0 {
                return Err(SystemError::new(format!(
                    "orbiter {} is degenerate: angle {}, radius {}",
                    slot.owner(),
                    orbit.angle,
                    orbit.radius
                )));
            }
            mean += orbit.angle / orbits.len() as f32;
        }
        if ctx.frame % 60 == 0 {
            debug!(frame = ctx.frame, orbiters = orbits.len(), mean_angle = mean, "orbit check");
        }
        Ok(())
    }
}

/// Running totals written by [`SparkCensus`] and its report tasks.
#[derive(Debug, Default)]
pub struct CensusTotals {
    /// Highest number of sparks seen in one frame.
    pub peak: AtomicU64,
    /// Reports completed on the task pool.
    pub reports: AtomicU64,
}

/// Concurrent: counts live sparks on its own thread and hands a report to
/// the task pool once per `report_every` frames.
pub struct SparkCensus {
    pool: Arc<TaskScheduler>,
    totals: Arc<CensusTotals>,
    report_every: u64,
}

impl SparkCensus {
    /// Creates the census.
    pub fn new(pool: Arc<TaskScheduler>, totals: Arc<CensusTotals>, report_every: u64) -> Self {
        Self {
            pool,
            totals,
            report_every: report_every.max(1),
        }
    }
}

impl System for SparkCensus {
    fn name(&self) -> &str {
        "spark_census"
    }

    fn interests(&self) -> Vec<ComponentType> {
        vec![ComponentType::of::<Spark>()]
    }

    fn update(&mut self, ctx: &mut SystemContext<'_>) -> Result<(), SystemError> {
        let live = ctx.components.len_of::<Spark>() as u64;
        self.totals.peak.fetch_max(live, Ordering::Relaxed);

        if ctx.frame % self.report_every == 0 {
            let totals = Arc::clone(&self.totals);
            let frame = ctx.frame;
            let scheduled = self.pool.schedule(move || {
                let reports = totals.reports.fetch_add(1, Ordering::Relaxed) + 1;
                info!(frame, live, peak = totals.peak.load(Ordering::Relaxed), reports, "spark report");
            });
            if let Err(e) = scheduled {
                warn!(frame, error = %e, "spark report dropped");
            }
        }
        Ok(())
    }
}
