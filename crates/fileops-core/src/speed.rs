//! Throughput smoothing shared by transfers and job observation.

use std::time::Duration;

use tokio::time::Instant;

/// Weight of the newest instantaneous sample.
const SMOOTHING: f64 = 0.25;

/// EWMA speed estimator over cumulative byte counts.
///
/// The first sample only seeds the baseline and reports zero. Each later
/// sample computes the instantaneous rate since the previous one (elapsed
/// time floored at one millisecond) and folds it in as
/// `speed * 0.75 + inst * 0.25`, or takes it verbatim while the estimate is
/// still zero.
#[derive(Debug, Clone, Default)]
pub struct SpeedMeter {
    last: Option<(Instant, u64)>,
    speed: f64,
}

impl SpeedMeter {
    /// Fresh estimator.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            last: None,
            speed: 0.0,
        }
    }

    /// Record `loaded` bytes at the current instant.
    pub fn sample(&mut self, loaded: u64) -> f64 {
        self.sample_at(Instant::now(), loaded)
    }

    /// Record `loaded` bytes at `now`, returning the updated estimate in bytes per second.
    #[allow(clippy::cast_precision_loss)]
    pub fn sample_at(&mut self, now: Instant, loaded: u64) -> f64 {
        let Some((previous_at, previous_loaded)) = self.last.replace((now, loaded)) else {
            self.speed = 0.0;
            return 0.0;
        };
        let elapsed_ms = now
            .saturating_duration_since(previous_at)
            .as_millis()
            .max(1) as f64;
        let delta = loaded.saturating_sub(previous_loaded) as f64;
        let instantaneous = delta * 1_000.0 / elapsed_ms;
        self.speed = if self.speed > 0.0 {
            self.speed.mul_add(1.0 - SMOOTHING, instantaneous * SMOOTHING)
        } else {
            instantaneous
        };
        self.speed
    }

    /// Current estimate in bytes per second.
    #[must_use]
    pub const fn speed(&self) -> f64 {
        self.speed
    }

    /// Remaining time, withheld when the total is unknown or the speed is negligible.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn eta(&self, loaded: u64, total: Option<u64>) -> Option<Duration> {
        let total = total.filter(|total| *total > 0)?;
        if self.speed <= 1.0 || loaded > total {
            return None;
        }
        let remaining = (total - loaded) as f64 / self.speed;
        Duration::try_from_secs_f64(remaining).ok()
    }

    /// Forget all samples.
    pub const fn reset(&mut self) {
        self.last = None;
        self.speed = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_seeds_zero_then_ewma_applies() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new();
        assert!(meter.sample_at(start, 500).abs() < f64::EPSILON);

        let first = meter.sample_at(start + Duration::from_secs(1), 1_500);
        assert!((first - 1_000.0).abs() < 1e-9);

        let second = meter.sample_at(start + Duration::from_secs(2), 3_500);
        assert!((second - (0.75 * 1_000.0 + 0.25 * 2_000.0)).abs() < 1e-9);

        let third = meter.sample_at(start + Duration::from_secs(3), 3_500);
        assert!((third - 0.75 * second).abs() < 1e-9);
    }

    #[test]
    fn zero_elapsed_time_is_floored_to_one_millisecond() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new();
        meter.sample_at(start, 0);
        let speed = meter.sample_at(start, 10);
        assert!((speed - 10_000.0).abs() < 1e-9);
    }

    #[test]
    fn eta_needs_known_total_and_real_speed() {
        let start = Instant::now();
        let mut meter = SpeedMeter::new();
        meter.sample_at(start, 0);
        meter.sample_at(start + Duration::from_secs(1), 1_000);
        assert_eq!(meter.eta(1_000, Some(5_000)), Some(Duration::from_secs(4)));
        assert_eq!(meter.eta(1_000, None), None);
        assert_eq!(meter.eta(1_000, Some(0)), None);

        meter.reset();
        assert_eq!(meter.eta(0, Some(10)), None);
    }
}
