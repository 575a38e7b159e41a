use crate::config::Config;
use crate::history::RollingHistory;
use serde::Serialize;
use std::time::Duration;

pub const PACING_HISTORY_SIZE: usize = 60;
pub const HIGH_CPU_PERCENT: f32 = 70.0;
pub const LOW_CPU_PERCENT: f32 = 30.0;
pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 2000;
pub const NOTE_DURATION: Duration = Duration::from_secs(5);

const SLOWDOWN_FACTOR: f64 = 1.2;
const SPEEDUP_FACTOR: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaceChange {
    Unchanged,
    Slowed(Duration),
    Relaxed(Duration),
}

#[derive(Debug, Clone, Serialize)]
pub struct PacingReport {
    pub adaptive: bool,
    pub interval_ms: u64,
    pub avg_cpu_percent: Option<f32>,
    pub avg_tick_ms: Option<f32>,
    pub samples: usize,
}

/// Stretches the poll interval while the machine is busy and eases it back
/// once load drops. Inactive unless `adaptiveRefresh` is set.
#[derive(Debug, Clone)]
pub struct PerfGovernor {
    adaptive: bool,
    floor: Duration,
    current: Duration,
    tick_times: RollingHistory,
    cpu_usage: RollingHistory,
}

impl PerfGovernor {
    pub fn new(config: &Config) -> Self {
        let base = config.refresh_interval();
        Self {
            adaptive: config.adaptive_refresh,
            floor: base.max(Duration::from_millis(MIN_INTERVAL_MS)),
            current: base,
            tick_times: RollingHistory::with_capacity(PACING_HISTORY_SIZE),
            cpu_usage: RollingHistory::with_capacity(PACING_HISTORY_SIZE),
        }
    }

    pub fn interval(&self) -> Duration {
        self.current
    }

    pub fn is_adaptive(&self) -> bool {
        self.adaptive
    }

    /// Records one finished tick and re-evaluates the interval.
    pub fn record_tick(&mut self, wall: Duration, cpu_percent: Option<f32>) -> PaceChange {
        self.tick_times.push(wall.as_secs_f32() * 1000.0);
        if let Some(cpu) = cpu_percent {
            self.cpu_usage.push(cpu);
        }

        if !self.adaptive {
            return PaceChange::Unchanged;
        }
        let Some(avg_cpu) = self.cpu_usage.average() else {
            return PaceChange::Unchanged;
        };

        if avg_cpu > HIGH_CPU_PERCENT {
            let next =
                scale(self.current, SLOWDOWN_FACTOR).min(Duration::from_millis(MAX_INTERVAL_MS));
            if next > self.current {
                self.current = next;
                tracing::debug!("Average CPU {:.0}%, interval now {:?}", avg_cpu, next);
                return PaceChange::Slowed(next);
            }
        } else if avg_cpu < LOW_CPU_PERCENT {
            let next = scale(self.current, SPEEDUP_FACTOR).max(self.floor);
            if next < self.current {
                self.current = next;
                return PaceChange::Relaxed(next);
            }
        }

        PaceChange::Unchanged
    }

    pub fn report(&self) -> PacingReport {
        PacingReport {
            adaptive: self.adaptive,
            interval_ms: self.current.as_millis() as u64,
            avg_cpu_percent: self.cpu_usage.average(),
            avg_tick_ms: self.tick_times.average(),
            samples: self.tick_times.len(),
        }
    }
}

fn scale(interval: Duration, factor: f64) -> Duration {
    Duration::from_millis((interval.as_millis() as f64 * factor).round() as u64)
}

pub fn slowdown_note(interval: Duration) -> String {
    format!("High CPU load, refresh slowed to {} ms", interval.as_millis())
}
