//! Per-core state owned by the governor.
//!
//! Fast-path fields (applied frequency, current target, thermal ceiling,
//! boost flag) are atomics or epoch-protected and safe to read from any
//! context. Slow-path state (the thermal controller, the tick-side detector
//! and tuner) sits behind mutexes that the hot selector never touches.

use crate::boost::IoBoostDetector;
use crate::epp::EppTuner;
use crate::executor::CoreExecutor;
use crate::pstate::PstateTable;
use crate::target::TargetStore;
use crate::thermal::{ThermalControl, ThermalState};
use crate::types::{epp, CoreId, CoreStats, GovernorConfig, OperatingMode};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

/// Mutable state written only from the per-core tick path.
#[derive(Debug, Default)]
pub struct TickState {
    pub boost: IoBoostDetector,
    pub epp: EppTuner,
}

/// All state the governor keeps for one core.
pub struct CoreState {
    pub id: CoreId,
    /// Operating-point table, immutable after bring-up.
    pub table: PstateTable,
    pub target: TargetStore,
    pub stats: CoreStats,

    /// Rare slow-path mutations only (policy changes, suspend/resume).
    /// Never taken on the hot path.
    pub update_lock: Mutex<()>,
    /// Thermal controller internals; locked only by the thermal guard.
    pub thermal: Mutex<ThermalControl>,
    /// Detector and tuner internals; locked only by the tick path.
    pub tick: Mutex<TickState>,

    cur_freq_khz: AtomicU32,
    cur_pstate: AtomicU32,
    /// Policy bounds in kHz, kept alongside the perf-unit target so the
    /// selector clamps without quantizing through the 0-255 scale.
    policy_min_khz: AtomicU32,
    policy_max_khz: AtomicU32,
    boost_enabled: AtomicBool,
    thermal_state: AtomicU8,
    throttle_perf: AtomicU8,
    last_temp_c: AtomicU32,
    io_boost_active: AtomicBool,
    dynamic_epp: AtomicU8,
}

impl CoreState {
    pub fn new(id: CoreId, table: PstateTable, cfg: &GovernorConfig) -> Self {
        let min = cfg.min_perf.min(cfg.max_perf);
        let max = cfg.max_perf;
        let initial_epp = match cfg.mode {
            OperatingMode::Powersave => epp::POWERSAVE,
            OperatingMode::Performance => epp::PERFORMANCE,
            OperatingMode::Balance | OperatingMode::Manual => epp::BALANCE,
        };

        let policy_min_khz = table.perf_to_freq_khz(min);
        let policy_max_khz = table.perf_to_freq_khz(max);

        Self {
            id,
            target: TargetStore::new(max, min, max, initial_epp),
            table,
            stats: CoreStats::default(),
            update_lock: Mutex::new(()),
            thermal: Mutex::new(ThermalControl::new()),
            tick: Mutex::new(TickState::default()),
            cur_freq_khz: AtomicU32::new(0),
            cur_pstate: AtomicU32::new(0),
            policy_min_khz: AtomicU32::new(policy_min_khz),
            policy_max_khz: AtomicU32::new(policy_max_khz),
            boost_enabled: AtomicBool::new(cfg.boost_enabled),
            thermal_state: AtomicU8::new(ThermalState::Normal as u8),
            throttle_perf: AtomicU8::new(255),
            last_temp_c: AtomicU32::new(0),
            io_boost_active: AtomicBool::new(false),
            dynamic_epp: AtomicU8::new(initial_epp),
        }
    }

    /// Last frequency actually written to the hardware, 0 before the first
    /// transition.
    pub fn current_freq_khz(&self) -> u32 {
        self.cur_freq_khz.load(Ordering::Acquire)
    }

    pub fn current_pstate(&self) -> u8 {
        self.cur_pstate.load(Ordering::Acquire) as u8
    }

    /// Record an applied transition. Called on the owning core's executor
    /// thread after the hardware write succeeds.
    pub fn set_applied(&self, hw_pstate: u8, freq_khz: u32) {
        self.cur_pstate.store(hw_pstate as u32, Ordering::Release);
        self.cur_freq_khz.store(freq_khz, Ordering::Release);
    }

    /// Policy frequency bounds, `(min_khz, max_khz)`.
    pub fn policy_bounds_khz(&self) -> (u32, u32) {
        (
            self.policy_min_khz.load(Ordering::Acquire),
            self.policy_max_khz.load(Ordering::Acquire),
        )
    }

    pub fn set_policy_bounds_khz(&self, min_khz: u32, max_khz: u32) {
        self.policy_min_khz.store(min_khz, Ordering::Release);
        self.policy_max_khz.store(max_khz, Ordering::Release);
    }

    pub fn boost_enabled(&self) -> bool {
        self.boost_enabled.load(Ordering::Relaxed)
    }

    pub fn set_boost_enabled(&self, enabled: bool) {
        self.boost_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn thermal_state(&self) -> ThermalState {
        ThermalState::from_u8(self.thermal_state.load(Ordering::Acquire))
    }

    /// Current thermal throttle ceiling in performance units.
    pub fn throttle_perf(&self) -> u8 {
        self.throttle_perf.load(Ordering::Acquire)
    }

    pub fn last_temp_c(&self) -> u32 {
        self.last_temp_c.load(Ordering::Relaxed)
    }

    /// Republish the thermal guard's outputs for lock-free consumption.
    pub fn publish_thermal(&self, state: ThermalState, throttle_perf: u8, temp_c: u32) {
        self.last_temp_c.store(temp_c, Ordering::Relaxed);
        self.throttle_perf.store(throttle_perf, Ordering::Release);
        self.thermal_state.store(state as u8, Ordering::Release);
    }

    pub fn io_boost_active(&self) -> bool {
        self.io_boost_active.load(Ordering::Acquire)
    }

    pub fn set_io_boost(&self, active: bool) {
        self.io_boost_active.store(active, Ordering::Release);
    }

    pub fn dynamic_epp(&self) -> u8 {
        self.dynamic_epp.load(Ordering::Relaxed)
    }

    pub fn set_dynamic_epp(&self, value: u8) {
        self.dynamic_epp.store(value, Ordering::Relaxed);
    }
}

/// A core's state together with its apply executor. Dropping the handle
/// joins the executor thread before the state can go away.
pub struct CoreHandle {
    pub state: Arc<CoreState>,
    pub executor: CoreExecutor,
}
