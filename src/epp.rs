//! Dynamic power-preference tuning.
//!
//! Maps recent utilization into an EPP code with hysteresis: sustained low
//! utilization drifts toward powersave, high utilization snaps to
//! performance, and the band in between follows the operator-selected mode.

use crate::types::{epp, GovernorConfig, OperatingMode};
use std::time::{Duration, Instant};

/// Tuning for the classifier, taken from live configuration.
#[derive(Debug, Clone, Copy)]
pub struct EppParams {
    pub low_threshold_pct: u32,
    pub high_threshold_pct: u32,
    /// How long utilization must stay low before switching to powersave.
    pub low_delay: Duration,
    pub mode: OperatingMode,
}

impl EppParams {
    pub fn from_config(cfg: &GovernorConfig) -> Self {
        Self {
            low_threshold_pct: cfg.util_low_threshold_pct,
            high_threshold_pct: cfg.util_high_threshold_pct,
            low_delay: Duration::from_millis(cfg.epp_low_util_delay_ms),
            mode: cfg.mode,
        }
    }
}

/// Per-core tuner state. Single writer: the tick path.
#[derive(Debug)]
pub struct EppTuner {
    low_since: Option<Instant>,
    current: u8,
}

impl EppTuner {
    pub fn new() -> Self {
        Self {
            low_since: None,
            current: epp::BALANCE,
        }
    }

    pub fn current(&self) -> u8 {
        self.current
    }

    /// Feed one utilization sample. Returns the preference after this
    /// sample; unchanged values are idempotent no-ops.
    pub fn on_sample(&mut self, util_pct: u32, now: Instant, params: &EppParams) -> u8 {
        if util_pct < params.low_threshold_pct {
            match self.low_since {
                None => self.low_since = Some(now),
                Some(since) => {
                    if now > since + params.low_delay {
                        if self.current != epp::POWERSAVE {
                            log::debug!("dynamic EPP -> powersave (util={}%)", util_pct);
                            self.current = epp::POWERSAVE;
                        }
                        return self.current;
                    }
                }
            }
        } else {
            // any sample at or above the low threshold restarts the timer
            self.low_since = None;
        }

        let next = if util_pct > params.high_threshold_pct {
            epp::PERFORMANCE
        } else {
            match params.mode {
                OperatingMode::Powersave => epp::POWERSAVE,
                OperatingMode::Performance => epp::PERFORMANCE,
                OperatingMode::Balance | OperatingMode::Manual => epp::BALANCE,
            }
        };

        if next != self.current {
            log::debug!("dynamic EPP {:#04x} -> {:#04x} (util={}%)", self.current, next, util_pct);
            self.current = next;
        }

        self.current
    }
}

impl Default for EppTuner {
    fn default() -> Self {
        Self::new()
    }
}
