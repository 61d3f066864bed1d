//! Thermal guard: state machine, PI controller, and the background loop.
//!
//! The guard samples every managed core's temperature on a fixed interval,
//! runs the per-core state machine, and republishes a throttle ceiling the
//! hot-path selector reads lock-free. Entry into hard throttle additionally
//! forces an emergency transition to the core's lowest operating point.

use crate::core::CoreHandle;
use crate::hal::Platform;
use crate::types::{CoreId, GovernorConfig, GovernorError};
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Thermal control states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ThermalState {
    Normal = 0,
    SoftThrottle = 1,
    HardThrottle = 2,
    Recovery = 3,
}

impl ThermalState {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => ThermalState::SoftThrottle,
            2 => ThermalState::HardThrottle,
            3 => ThermalState::Recovery,
            _ => ThermalState::Normal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ThermalState::Normal => "normal",
            ThermalState::SoftThrottle => "soft_throttle",
            ThermalState::HardThrottle => "hard_throttle",
            ThermalState::Recovery => "recovery",
        }
    }
}

/// Per-poll tuning derived from live configuration.
#[derive(Debug, Clone, Copy)]
pub struct ThermalParams {
    pub soft_limit_c: u32,
    pub hard_limit_c: u32,
    pub hysteresis_c: u32,
    pub safe_limit_c: u32,
    pub kp: i32,
    pub ki: i32,
    pub scale: i32,
    pub integral_max: i32,
    pub recovery_step: u8,
    /// Configured maximum performance; the ceiling never exceeds it.
    pub max_perf: u8,
    /// Lowest performance point, used by hard throttle.
    pub lowest_perf: u8,
}

impl ThermalParams {
    pub fn from_config(cfg: &GovernorConfig, lowest_perf: u8) -> Self {
        Self {
            soft_limit_c: cfg.soft_temp_c,
            hard_limit_c: cfg.hard_temp_c,
            hysteresis_c: cfg.temp_hysteresis_c,
            safe_limit_c: cfg.safe_temp_c,
            kp: cfg.thermal_kp,
            ki: cfg.thermal_ki,
            scale: cfg.pi_scale.max(1),
            integral_max: cfg.integral_max,
            recovery_step: cfg.recovery_step,
            max_perf: cfg.max_perf,
            lowest_perf,
        }
    }
}

/// What one poll of the state machine did.
#[derive(Debug, Clone, Copy)]
pub struct ThermalOutcome {
    pub ceiling_changed: bool,
    pub entered_hard: bool,
}

/// Per-core thermal controller. Locked only by the guard loop.
#[derive(Debug)]
pub struct ThermalControl {
    pub state: ThermalState,
    integral: i32,
    pub throttle_perf: u8,
    pub last_temp_c: u32,
}

impl ThermalControl {
    pub fn new() -> Self {
        Self {
            state: ThermalState::Normal,
            integral: 0,
            throttle_perf: 255,
            last_temp_c: 0,
        }
    }

    /// PI controller: error against the soft limit, integral accumulated
    /// per poll with anti-windup. A positive adjustment pulls the ceiling
    /// down from 255; anything else leaves the full configured ceiling.
    fn pi_ceiling(&mut self, temp_c: u32, p: &ThermalParams) -> u8 {
        let error = temp_c as i32 - p.soft_limit_c as i32;
        let proportional = error * p.kp / p.scale;

        self.integral = (self.integral + error).clamp(-p.integral_max, p.integral_max);
        let integral = self.integral * p.ki / p.scale;

        let adjustment = proportional + integral;
        if adjustment > 0 {
            let ceiling = 255 - adjustment.clamp(0, 255) as u8;
            ceiling.min(p.max_perf)
        } else {
            p.max_perf
        }
    }

    /// Advance the state machine with one temperature sample.
    pub fn step(&mut self, temp_c: u32, p: &ThermalParams) -> ThermalOutcome {
        self.last_temp_c = temp_c;
        let prev_state = self.state;

        let (next, ceiling) = match self.state {
            ThermalState::Normal => {
                if temp_c >= p.hard_limit_c {
                    (ThermalState::HardThrottle, p.lowest_perf)
                } else if temp_c >= p.soft_limit_c {
                    let ceiling = self.pi_ceiling(temp_c, p);
                    (ThermalState::SoftThrottle, ceiling)
                } else {
                    (ThermalState::Normal, p.max_perf)
                }
            }

            ThermalState::SoftThrottle => {
                if temp_c >= p.hard_limit_c {
                    (ThermalState::HardThrottle, p.lowest_perf)
                } else if temp_c < p.soft_limit_c.saturating_sub(p.hysteresis_c) {
                    // integral reset on entering recovery; ceiling held
                    self.integral = 0;
                    (ThermalState::Recovery, self.throttle_perf.min(p.max_perf))
                } else {
                    let ceiling = self.pi_ceiling(temp_c, p);
                    (ThermalState::SoftThrottle, ceiling)
                }
            }

            ThermalState::HardThrottle => {
                if temp_c < p.hard_limit_c.saturating_sub(p.hysteresis_c) {
                    let ceiling = self.pi_ceiling(temp_c, p);
                    (ThermalState::SoftThrottle, ceiling)
                } else {
                    (ThermalState::HardThrottle, p.lowest_perf)
                }
            }

            ThermalState::Recovery => {
                if temp_c < p.safe_limit_c {
                    (ThermalState::Normal, p.max_perf)
                } else if temp_c >= p.soft_limit_c {
                    let ceiling = self.pi_ceiling(temp_c, p);
                    (ThermalState::SoftThrottle, ceiling)
                } else {
                    // gradual re-acceleration instead of an abrupt jump
                    let ceiling = self
                        .throttle_perf
                        .saturating_add(p.recovery_step)
                        .min(p.max_perf);
                    (ThermalState::Recovery, ceiling)
                }
            }
        };

        let ceiling_changed = ceiling != self.throttle_perf;
        self.throttle_perf = ceiling;
        self.state = next;

        ThermalOutcome {
            ceiling_changed,
            entered_hard: next == ThermalState::HardThrottle && prev_state != ThermalState::HardThrottle,
        }
    }
}

impl Default for ThermalControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Background loop polling every managed core.
///
/// Runs on its own thread, woken early by a stop message; `freeze`/`thaw`
/// support cooperative suspension by the host power-management framework.
/// The governor stops the guard before releasing any per-core state.
pub struct ThermalGuard {
    stop_tx: Sender<()>,
    frozen: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ThermalGuard {
    pub fn spawn(
        cores: Arc<DashMap<CoreId, CoreHandle>>,
        platform: Arc<dyn Platform>,
        config: Arc<RwLock<GovernorConfig>>,
    ) -> Result<Self, GovernorError> {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let frozen = Arc::new(AtomicBool::new(false));
        let frozen_flag = frozen.clone();

        let handle = std::thread::Builder::new()
            .name("pulsegov-thermal".to_string())
            .spawn(move || {
                log::info!("thermal guard started");

                loop {
                    let interval =
                        Duration::from_millis(config.read().thermal_poll_interval_ms.max(1));
                    match stop_rx.recv_timeout(interval) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {}
                    }

                    if frozen_flag.load(Ordering::Relaxed) {
                        continue;
                    }

                    let cfg = config.read().clone();
                    if !cfg.thermal_guard_enabled {
                        continue;
                    }

                    let ids: Vec<CoreId> = cores.iter().map(|entry| *entry.key()).collect();
                    for id in ids {
                        if let Some(handle) = cores.get(&id) {
                            Self::check_core(&cfg, platform.as_ref(), &handle);
                        }
                    }
                }

                log::info!("thermal guard stopped");
            })
            .map_err(|e| GovernorError::Internal(format!("spawn thermal guard: {}", e)))?;

        Ok(Self {
            stop_tx,
            frozen,
            handle: Some(handle),
        })
    }

    fn check_core(cfg: &GovernorConfig, platform: &dyn Platform, handle: &CoreHandle) {
        let core = &handle.state;

        let temp_c = match platform.read_temp_c(core.id) {
            Some(t) => t,
            None => {
                // invalid sample: keep the prior thermal state for this round
                log::trace!("core {}: invalid temperature sample, skipping poll", core.id);
                return;
            }
        };

        let params = ThermalParams::from_config(cfg, core.table.lowest_perf);

        let mut control = core.thermal.lock();
        let outcome = control.step(temp_c, &params);
        let state = control.state;
        let ceiling = control.throttle_perf;
        drop(control);

        core.publish_thermal(state, ceiling, temp_c);

        if outcome.ceiling_changed {
            core.stats.thermal_events.fetch_add(1, Ordering::Relaxed);
            log::debug!(
                "core {}: thermal {} at {} °C, ceiling {}",
                core.id,
                state.as_str(),
                temp_c,
                ceiling
            );
        }

        if outcome.entered_hard {
            log::warn!("core {}: hard thermal throttle at {} °C", core.id, temp_c);
            let lowest = core.table.lowest();
            match handle.executor.apply(lowest.hw_pstate, lowest.freq_khz) {
                Ok(()) => {
                    core.stats.transitions.fetch_add(1, Ordering::Relaxed);
                }
                Err(_) => {
                    core.stats.apply_failures.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Suspend polling without stopping the thread.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Relaxed);
        log::debug!("thermal guard frozen");
    }

    pub fn thaw(&self) {
        self.frozen.store(false, Ordering::Relaxed);
        log::debug!("thermal guard thawed");
    }
}

impl Drop for ThermalGuard {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
