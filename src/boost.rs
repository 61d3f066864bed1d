//! I/O-wait boost detection.
//!
//! A sharp rise in a core's cumulative I/O-wait time signals an I/O-driven
//! stall; the detector raises a transient boost flag so the selector lifts
//! the core to its nominal frequency while the stall resolves.

use crate::types::GovernorConfig;
use std::time::{Duration, Instant};

/// Tuning for the detector, taken from live configuration.
#[derive(Debug, Clone, Copy)]
pub struct BoostParams {
    /// I/O-wait delta between samples that triggers a boost, in µs.
    pub delta_threshold_us: u64,
    /// How long an activated boost is held.
    pub duration: Duration,
    /// Minimum I/O utilization for [`should_boost`], in percent.
    pub min_util_pct: u64,
}

impl From<&GovernorConfig> for BoostParams {
    fn from(cfg: &GovernorConfig) -> Self {
        Self {
            delta_threshold_us: cfg.io_boost_delta_us,
            duration: Duration::from_millis(cfg.io_boost_duration_ms),
            min_util_pct: cfg.io_boost_min_util_pct,
        }
    }
}

/// Per-core transient boost state. Single writer: the tick path.
#[derive(Debug)]
pub struct IoBoostDetector {
    /// Previous cumulative counter; `None` until the first sample, which
    /// only establishes the baseline.
    last_io_wait_us: Option<u64>,
    active: bool,
    expires_at: Option<Instant>,
}

impl IoBoostDetector {
    pub fn new() -> Self {
        Self {
            last_io_wait_us: None,
            active: false,
            expires_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Feed one cumulative I/O-wait sample. Activates the boost on a delta
    /// above the threshold and independently clears it once the hold time
    /// has elapsed with no further spikes. Returns the resulting flag.
    pub fn on_sample(&mut self, io_wait_us: u64, now: Instant, params: &BoostParams) -> bool {
        let delta = match self.last_io_wait_us {
            Some(prev) => io_wait_us.saturating_sub(prev),
            None => 0,
        };
        self.last_io_wait_us = Some(io_wait_us);

        if delta > params.delta_threshold_us {
            self.active = true;
            self.expires_at = Some(now + params.duration);
        }

        if self.active {
            if let Some(expiry) = self.expires_at {
                if now > expiry {
                    self.active = false;
                    self.expires_at = None;
                }
            }
        }

        self.active
    }
}

impl Default for IoBoostDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Pure boost-worthiness predicate: true when I/O wait accounts for at
/// least the configured minimum share of total time. Does not mutate
/// detector state.
pub fn should_boost(io_wait: u64, total: u64, params: &BoostParams) -> bool {
    if total == 0 {
        return false;
    }
    io_wait * 100 / total >= params.min_util_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> BoostParams {
        BoostParams {
            delta_threshold_us: 100,
            duration: Duration::from_millis(50),
            min_util_pct: 5,
        }
    }

    #[test]
    fn test_spike_activates_boost() {
        let mut det = IoBoostDetector::new();
        let t0 = Instant::now();

        assert!(!det.on_sample(1_000, t0, &params()));
        // +150 µs between samples
        assert!(det.on_sample(1_150, t0 + Duration::from_millis(4), &params()));
        assert!(det.is_active());
    }

    #[test]
    fn test_small_delta_does_not_activate() {
        let mut det = IoBoostDetector::new();
        let t0 = Instant::now();

        det.on_sample(1_000, t0, &params());
        assert!(!det.on_sample(1_050, t0 + Duration::from_millis(4), &params()));
    }

    #[test]
    fn test_boost_expires_without_further_spikes() {
        let mut det = IoBoostDetector::new();
        let t0 = Instant::now();

        det.on_sample(1_000, t0, &params());
        assert!(det.on_sample(1_200, t0 + Duration::from_millis(1), &params()));

        // flat samples past the hold time clear the flag
        assert!(det.on_sample(1_200, t0 + Duration::from_millis(30), &params()));
        assert!(!det.on_sample(1_200, t0 + Duration::from_millis(60), &params()));
        assert!(!det.is_active());
    }

    #[test]
    fn test_renewed_spike_extends_boost() {
        let mut det = IoBoostDetector::new();
        let t0 = Instant::now();

        det.on_sample(1_000, t0, &params());
        det.on_sample(1_200, t0 + Duration::from_millis(1), &params());
        // another spike just before expiry pushes the window out
        det.on_sample(1_400, t0 + Duration::from_millis(45), &params());
        assert!(det.on_sample(1_400, t0 + Duration::from_millis(80), &params()));
    }

    #[test]
    fn test_should_boost_predicate() {
        let p = params();
        assert!(should_boost(5, 100, &p));
        assert!(should_boost(80, 100, &p));
        assert!(!should_boost(4, 100, &p));
        assert!(!should_boost(100, 0, &p));

        let strict = BoostParams { min_util_pct: 50, ..p };
        assert!(!should_boost(5, 100, &strict));
        assert!(should_boost(60, 100, &strict));
    }
}
