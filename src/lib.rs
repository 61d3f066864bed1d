//! pulsegov: a closed-loop per-core frequency and voltage governor.
//!
//! The governor owns one operating-point table, one lock-free performance
//! target, and one apply executor per managed core. Policy changes and the
//! periodic tick publish new targets; the selector reads the current target
//! without locks, picks the best hardware point under the thermal ceiling,
//! and routes the register write to the owning core. A background thermal
//! guard closes the loop on temperature.
//!
//! ```no_run
//! use pulsegov::{FreqGovernor, GovernorConfig, SimulatedPlatform, CoreId};
//! use std::sync::Arc;
//!
//! let platform = Arc::new(SimulatedPlatform::with_defaults(4));
//! let governor = FreqGovernor::new(platform, GovernorConfig::default()).unwrap();
//! governor.init_all_cores().unwrap();
//! governor.start().unwrap();
//! let khz = governor.select_and_apply(CoreId(0), 1_200_000).unwrap();
//! println!("core 0 running at {} kHz", khz);
//! ```

pub mod boost;
pub mod core;
pub mod epp;
pub mod executor;
pub mod hal;
pub mod pstate;
pub mod target;
pub mod thermal;
pub mod types;
pub mod voltage;

pub use crate::hal::{Platform, SimulatedPlatform};
pub use crate::pstate::{OperatingPoint, PstateTable, RawDescriptor};
pub use crate::target::PerfTarget;
pub use crate::thermal::ThermalState;
pub use crate::types::{
    epp as epp_codes, features, CoreId, GovernorConfig, GovernorError, OperatingMode,
    StatsSnapshot,
};

use crate::boost::BoostParams;
use crate::core::{CoreHandle, CoreState};
use crate::epp::EppParams;
use crate::executor::CoreExecutor;
use crate::pstate::MAX_PSTATE_SLOTS;
use crate::thermal::ThermalGuard;
use crate::voltage::VoltageLimits;
use crossbeam::epoch;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// One scheduler-side sample fed to [`FreqGovernor::on_tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickSample {
    /// Cumulative I/O-wait time of the core, in µs.
    pub io_wait_us: u64,
    /// Recent utilization of the core, in percent.
    pub util_pct: u32,
    /// When the sample was taken.
    pub now: Instant,
}

/// Point-in-time view of one managed core, for status surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub core: usize,
    pub freq_khz: u32,
    pub hw_pstate: u8,
    pub thermal_state: &'static str,
    pub temp_c: u32,
    pub throttle_perf: u8,
    pub io_boost_active: bool,
    pub dynamic_epp: u8,
    pub stats: StatsSnapshot,
}

/// The governor. One instance drives every managed core of a platform.
///
/// All methods take `&self`; the governor is meant to be shared behind an
/// [`Arc`] between the policy surface, the tick source, and the thermal
/// guard it spawns.
pub struct FreqGovernor {
    platform: Arc<dyn Platform>,
    config: Arc<RwLock<GovernorConfig>>,
    // declared before `cores` so the guard thread is joined first on drop
    thermal_guard: Mutex<Option<ThermalGuard>>,
    cores: Arc<DashMap<CoreId, CoreHandle>>,
    features: AtomicU32,
    suspended: AtomicBool,
}

impl FreqGovernor {
    /// Probe the platform and create a governor over it. No cores are
    /// managed until [`init_core`](Self::init_core) brings them up.
    pub fn new(platform: Arc<dyn Platform>, config: GovernorConfig) -> Result<Self, GovernorError> {
        if !platform.supports_managed_pstates() {
            return Err(GovernorError::HardwareUnsupported);
        }

        let mut feature_bits = features::EPP | features::IO_BOOST | features::VOLTAGE_GUARD;
        if platform.boost_capable() {
            feature_bits |= features::BOOST;
        }
        if config.thermal_guard_enabled {
            feature_bits |= features::THERMAL_GUARD;
        }

        log::info!(
            "governor created: {} cores, mode={}, features={:#x}",
            platform.core_count(),
            config.mode.as_str(),
            feature_bits
        );

        Ok(Self {
            platform,
            config: Arc::new(RwLock::new(config)),
            thermal_guard: Mutex::new(None),
            cores: Arc::new(DashMap::new()),
            features: AtomicU32::new(feature_bits),
            suspended: AtomicBool::new(false),
        })
    }

    /// Feature bits probed at creation, see [`features`].
    pub fn features(&self) -> u32 {
        self.features.load(Ordering::Relaxed)
    }

    /// Start the background thermal guard. Idempotent.
    pub fn start(&self) -> Result<(), GovernorError> {
        let mut slot = self.thermal_guard.lock();
        if slot.is_some() {
            return Ok(());
        }
        let guard = ThermalGuard::spawn(
            self.cores.clone(),
            self.platform.clone(),
            self.config.clone(),
        )?;
        *slot = Some(guard);
        Ok(())
    }

    /// Stop the thermal guard and release every core. After shutdown the
    /// governor can be re-initialized from scratch.
    pub fn shutdown(&self) {
        *self.thermal_guard.lock() = None;
        self.cores.clear();
        log::info!("governor shut down");
    }

    /// Bring one core under governor control: probe its descriptor slots,
    /// decode and voltage-verify the operating points, spawn its apply
    /// executor, and run an initial transition to the published target.
    ///
    /// Re-initializing an already managed core replaces its state wholesale.
    pub fn init_core(&self, core: CoreId) -> Result<(), GovernorError> {
        if core.0 >= self.platform.core_count() {
            return Err(GovernorError::UnknownCore(core));
        }

        let mut raw = Vec::with_capacity(MAX_PSTATE_SLOTS);
        for slot in 0..MAX_PSTATE_SLOTS {
            if let Some(desc) = self.platform.read_descriptor(core, slot) {
                raw.push((slot as u8, desc));
            }
        }

        let cfg = self.config.read().clone();
        let mut table = PstateTable::build(core, &raw, self.platform.boost_capable())?;
        let clamped = voltage::verify_table(core, &mut table, VoltageLimits::from(&cfg));

        let state = Arc::new(CoreState::new(core, table, &cfg));
        state
            .stats
            .voltage_clamps
            .fetch_add(clamped as u64, Ordering::Relaxed);
        let executor = CoreExecutor::spawn(state.clone(), self.platform.clone())?;

        if self.cores.insert(core, CoreHandle { state, executor }).is_some() {
            log::warn!("core {}: re-initialized, previous state replaced", core);
        }

        self.reapply(core)?;
        log::info!("core {}: under governor control", core);
        Ok(())
    }

    /// Bring every core the platform reports under control.
    pub fn init_all_cores(&self) -> Result<(), GovernorError> {
        for i in 0..self.platform.core_count() {
            self.init_core(CoreId(i))?;
        }
        Ok(())
    }

    /// Release a core. Its executor thread is joined before this returns.
    pub fn release_core(&self, core: CoreId) -> Result<(), GovernorError> {
        match self.cores.remove(&core) {
            Some(_) => {
                log::info!("core {}: released", core);
                Ok(())
            }
            None => Err(GovernorError::UnknownCore(core)),
        }
    }

    pub fn core_ids(&self) -> Vec<CoreId> {
        let mut ids: Vec<CoreId> = self.cores.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Publish a new policy for one core and apply it immediately.
    ///
    /// Bounds are frequencies in kHz; they are converted to performance
    /// units against the core's own range. The published target always
    /// satisfies `min <= desired <= max`; the thermal ceiling is applied at
    /// selection time, not here, so a policy set during a throttle episode
    /// survives the episode intact.
    pub fn set_policy(
        &self,
        core: CoreId,
        min_freq_khz: u32,
        max_freq_khz: u32,
    ) -> Result<u32, GovernorError> {
        let handle = self.cores.get(&core).ok_or(GovernorError::UnknownCore(core))?;
        let state = &handle.state;
        let table = &state.table;

        // bounds are clamped into the core's real range and reordered
        let max_khz = max_freq_khz.clamp(table.min_freq_khz, table.max_freq_khz);
        let min_khz = min_freq_khz
            .clamp(table.min_freq_khz, table.max_freq_khz)
            .min(max_khz);

        let min_perf = table.freq_to_perf(min_khz);
        let max_perf = table.freq_to_perf(max_khz);
        let epp = state.dynamic_epp();

        {
            let _update = state.update_lock.lock();
            state.set_policy_bounds_khz(min_khz, max_khz);
            state.target.publish(max_perf, min_perf, max_perf, epp);
        }
        log::debug!(
            "core {}: policy min={} kHz max={} kHz (perf {}..{})",
            core,
            min_khz,
            max_khz,
            min_perf,
            max_perf
        );
        drop(handle);

        self.select_and_apply(core, max_khz)
    }

    /// The hot path, invoked with the scheduler's requested frequency: pick
    /// the closest operating point not exceeding the request, clamped into
    /// the published target's bounds and the thermal ceiling, and apply it
    /// on the owning core. Returns the core's frequency in kHz after the
    /// call.
    ///
    /// Repeating an identical request is a no-op: the already applied point
    /// is detected and no hardware write is issued.
    pub fn select_and_apply(&self, core: CoreId, requested_khz: u32) -> Result<u32, GovernorError> {
        let handle = self.cores.get(&core).ok_or(GovernorError::UnknownCore(core))?;
        let state = &handle.state;

        if self.suspended.load(Ordering::Acquire) {
            return Ok(state.current_freq_khz());
        }

        let table = &state.table;
        let thermal_state = state.thermal_state();

        // policy bounds first, then the thermal ceiling mapped onto the
        // core's frequency range
        let (policy_min_khz, policy_max_khz) = state.policy_bounds_khz();
        let mut ceiling_khz = policy_max_khz;
        if thermal_state != ThermalState::Normal {
            ceiling_khz = ceiling_khz.min(table.perf_to_freq_khz(state.throttle_perf()));
        }
        let floor_khz = policy_min_khz.min(ceiling_khz);

        let mut freq_khz = requested_khz.clamp(floor_khz, ceiling_khz);
        if state.io_boost_active() && freq_khz < table.nominal_freq_khz {
            // the lift never punches through an active thermal ceiling
            freq_khz = table.nominal_freq_khz.min(ceiling_khz);
        }

        let allow_boost = state.boost_enabled()
            && table.boost_supported
            && thermal_state == ThermalState::Normal;

        let point = table.select_not_above(freq_khz, allow_boost);

        if point.hw_pstate == state.current_pstate() && state.current_freq_khz() != 0 {
            return Ok(state.current_freq_khz());
        }

        match handle.executor.apply(point.hw_pstate, point.freq_khz) {
            Ok(()) => {
                state.stats.transitions.fetch_add(1, Ordering::Relaxed);
                Ok(point.freq_khz)
            }
            Err(e) => {
                // report the frequency the core is actually running at,
                // never the one that failed to take
                state.stats.apply_failures.fetch_add(1, Ordering::Relaxed);
                log::debug!("core {}: transition failed, holding current: {}", core, e);
                Ok(state.current_freq_khz())
            }
        }
    }

    /// Re-run selection with the policy ceiling as the request. Used after
    /// bring-up, policy-independent toggles, and resume, where no scheduler
    /// request is in flight.
    fn reapply(&self, core: CoreId) -> Result<u32, GovernorError> {
        let requested_khz = {
            let handle = self.cores.get(&core).ok_or(GovernorError::UnknownCore(core))?;
            handle.state.policy_bounds_khz().1
        };
        self.select_and_apply(core, requested_khz)
    }

    /// Periodic per-core update: feed the I/O-boost detector and the dynamic
    /// power-preference tuner with one sample, republish the target if the
    /// preference moved, and re-run selection with a request scaled from the
    /// utilization. Returns the frequency in kHz.
    pub fn on_tick(&self, core: CoreId, sample: TickSample) -> Result<u32, GovernorError> {
        let handle = self.cores.get(&core).ok_or(GovernorError::UnknownCore(core))?;
        let state = &handle.state;
        let cfg = self.config.read().clone();

        let (boost_active, new_epp) = {
            let mut tick = state.tick.lock();

            let boost_active =
                tick.boost
                    .on_sample(sample.io_wait_us, sample.now, &BoostParams::from(&cfg));

            let new_epp = if cfg.epp_enabled {
                Some(
                    tick.epp
                        .on_sample(sample.util_pct, sample.now, &EppParams::from_config(&cfg)),
                )
            } else {
                None
            };

            (boost_active, new_epp)
        };

        if boost_active && !state.io_boost_active() {
            state.stats.io_boosts.fetch_add(1, Ordering::Relaxed);
            log::debug!("core {}: I/O boost activated", core);
        }
        state.set_io_boost(boost_active);

        if let Some(epp) = new_epp {
            if epp != state.dynamic_epp() {
                state.set_dynamic_epp(epp);
                let _update = state.update_lock.lock();
                let guard = epoch::pin();
                let t = state.target.current(&guard);
                let (desired, min, max) = (t.desired_perf, t.min_perf, t.max_perf);
                drop(guard);
                state.target.publish(desired, min, max, epp);
            }
        }

        // utilization maps linearly onto the core's performance range
        let request_perf = (sample.util_pct.min(100) * 255 / 100) as u8;
        let requested_khz = state.table.perf_to_freq_khz(request_perf);
        drop(handle);

        self.select_and_apply(core, requested_khz)
    }

    /// Pure boost-worthiness check: true when I/O wait accounts for at
    /// least the configured minimum share of total time. Reads no per-core
    /// state.
    pub fn io_boost_worthy(&self, io_wait_us: u64, total_us: u64) -> bool {
        let params = BoostParams::from(&*self.config.read());
        boost::should_boost(io_wait_us, total_us, &params)
    }

    /// Enable or disable boost selection on every managed core, then
    /// re-select so a disable takes effect immediately.
    pub fn set_boost(&self, enabled: bool) {
        log::info!("boost {}", if enabled { "enabled" } else { "disabled" });
        for entry in self.cores.iter() {
            entry.value().state.set_boost_enabled(enabled);
        }
        for id in self.core_ids() {
            if let Err(e) = self.reapply(id) {
                log::warn!("core {}: re-selection after boost change failed: {}", id, e);
            }
        }
    }

    /// Quiesce for system sleep: freeze the thermal guard and drop every
    /// core to its lowest operating point. Selection is suspended until
    /// [`resume`](Self::resume).
    pub fn suspend(&self) {
        self.freeze();
        self.suspended.store(true, Ordering::Release);

        for entry in self.cores.iter() {
            let handle = entry.value();
            let lowest = handle.state.table.lowest();
            if let Err(e) = handle.executor.apply(lowest.hw_pstate, lowest.freq_khz) {
                log::warn!("core {}: suspend transition failed: {}", handle.state.id, e);
            }
        }
        log::info!("governor suspended");
    }

    /// Undo [`suspend`](Self::suspend): thaw the guard and restore every
    /// core to its published target.
    pub fn resume(&self) {
        self.suspended.store(false, Ordering::Release);
        self.thaw();

        for id in self.core_ids() {
            if let Err(e) = self.reapply(id) {
                log::warn!("core {}: resume transition failed: {}", id, e);
            }
        }
        log::info!("governor resumed");
    }

    /// Pause the thermal guard without stopping its thread.
    pub fn freeze(&self) {
        if let Some(guard) = self.thermal_guard.lock().as_ref() {
            guard.freeze();
        }
    }

    pub fn thaw(&self) {
        if let Some(guard) = self.thermal_guard.lock().as_ref() {
            guard.thaw();
        }
    }

    /// Replace the live configuration. Per-core boost flags follow the new
    /// value; thermal and tick parameters take effect on their next poll.
    pub fn update_config(&self, new: GovernorConfig) {
        let boost = new.boost_enabled;
        *self.config.write() = new;
        self.set_boost(boost);
        log::info!("configuration updated");
    }

    pub fn config(&self) -> GovernorConfig {
        self.config.read().clone()
    }

    /// Read a managed core's temperature sensor directly, bypassing the
    /// guard's cached last sample.
    pub fn read_temp_c(&self, core: CoreId) -> Result<u32, GovernorError> {
        if !self.cores.contains_key(&core) {
            return Err(GovernorError::UnknownCore(core));
        }
        self.platform
            .read_temp_c(core)
            .ok_or(GovernorError::SensorReadInvalid(core))
    }

    /// Status of one managed core.
    pub fn core_status(&self, core: CoreId) -> Result<CoreStatus, GovernorError> {
        let handle = self.cores.get(&core).ok_or(GovernorError::UnknownCore(core))?;
        let state = &handle.state;
        Ok(CoreStatus {
            core: core.0,
            freq_khz: state.current_freq_khz(),
            hw_pstate: state.current_pstate(),
            thermal_state: state.thermal_state().as_str(),
            temp_c: state.last_temp_c(),
            throttle_perf: state.throttle_perf(),
            io_boost_active: state.io_boost_active(),
            dynamic_epp: state.dynamic_epp(),
            stats: state.stats.snapshot(),
        })
    }
}

impl Drop for FreqGovernor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn governor(num_cores: usize) -> (Arc<SimulatedPlatform>, FreqGovernor) {
        let platform = Arc::new(SimulatedPlatform::with_defaults(num_cores));
        let gov = FreqGovernor::new(platform.clone(), GovernorConfig::default()).unwrap();
        gov.init_all_cores().unwrap();
        (platform, gov)
    }

    #[test]
    fn test_unsupported_platform_is_rejected() {
        let platform = Arc::new(SimulatedPlatform::unsupported());
        assert!(matches!(
            FreqGovernor::new(platform, GovernorConfig::default()),
            Err(GovernorError::HardwareUnsupported)
        ));
    }

    #[test]
    fn test_init_applies_initial_target() {
        let (platform, gov) = governor(2);

        // default policy asks for maximum performance; boost is allowed in
        // the normal thermal state, so the boost point wins
        for i in 0..2 {
            let status = gov.core_status(CoreId(i)).unwrap();
            assert_eq!(status.freq_khz, 1_450_000);
        }
        assert_eq!(platform.applied_pstate(CoreId(0)), 0);
    }

    #[test]
    fn test_unknown_core_errors() {
        let (_platform, gov) = governor(1);
        assert!(matches!(
            gov.select_and_apply(CoreId(9), 1_000_000),
            Err(GovernorError::UnknownCore(CoreId(9)))
        ));
        assert!(matches!(
            gov.init_core(CoreId(9)),
            Err(GovernorError::UnknownCore(CoreId(9)))
        ));
    }

    #[test]
    fn test_repeated_request_is_idempotent() {
        let (_platform, gov) = governor(1);

        let a = gov.select_and_apply(CoreId(0), 950_000).unwrap();
        let before = gov.core_status(CoreId(0)).unwrap().stats.transitions;

        let b = gov.select_and_apply(CoreId(0), 950_000).unwrap();
        assert_eq!(a, b);
        assert_eq!(b, 900_000);

        // an identical request issues no further hardware writes
        let after = gov.core_status(CoreId(0)).unwrap().stats.transitions;
        assert_eq!(before, after);
    }

    #[test]
    fn test_request_selects_closest_not_above() {
        let (_platform, gov) = governor(1);

        assert_eq!(gov.select_and_apply(CoreId(0), 400_000).unwrap(), 400_000);
        assert_eq!(gov.select_and_apply(CoreId(0), 1_000_000).unwrap(), 900_000);
        // below the lowest point the lowest still wins
        assert_eq!(gov.select_and_apply(CoreId(0), 100_000).unwrap(), 400_000);
    }

    #[test]
    fn test_set_policy_bounds_requests() {
        let (_platform, gov) = governor(1);

        let khz = gov.set_policy(CoreId(0), 400_000, 400_000).unwrap();
        assert_eq!(khz, 400_000);

        let khz = gov.set_policy(CoreId(0), 400_000, 1_450_000).unwrap();
        assert_eq!(khz, 1_450_000);

        // a low ceiling caps even a high request
        gov.set_policy(CoreId(0), 400_000, 900_000).unwrap();
        assert_eq!(gov.select_and_apply(CoreId(0), 1_450_000).unwrap(), 900_000);
    }

    #[test]
    fn test_policy_bounds_are_reordered_not_rejected() {
        let (_platform, gov) = governor(1);
        // min above max must not panic or wedge the core
        let khz = gov.set_policy(CoreId(0), 1_200_000, 400_000).unwrap();
        assert!(khz >= 400_000);
    }

    #[test]
    fn test_boost_disable_excludes_boost_points() {
        let (_platform, gov) = governor(1);
        gov.set_boost(false);

        let khz = gov.set_policy(CoreId(0), 400_000, 1_450_000).unwrap();
        // highest sustained point instead of the boost point
        assert_eq!(khz, 1_200_000);

        gov.set_boost(true);
        assert_eq!(gov.select_and_apply(CoreId(0), 1_450_000).unwrap(), 1_450_000);
    }

    #[test]
    fn test_thermal_ceiling_caps_selection() {
        let (_platform, gov) = governor(1);
        let handle = gov.cores.get(&CoreId(0)).unwrap();
        // soft throttle with a ceiling of half scale
        handle.state.publish_thermal(ThermalState::SoftThrottle, 128, 85);
        drop(handle);

        let khz = gov.select_and_apply(CoreId(0), 1_450_000).unwrap();
        // throttled and no boost outside the normal state
        assert!(khz < 1_200_000);
    }

    #[test]
    fn test_hard_throttle_selects_lowest() {
        let (_platform, gov) = governor(1);
        let handle = gov.cores.get(&CoreId(0)).unwrap();
        handle.state.publish_thermal(ThermalState::HardThrottle, 0, 95);
        drop(handle);

        assert_eq!(gov.select_and_apply(CoreId(0), 1_450_000).unwrap(), 400_000);
    }

    #[test]
    fn test_idle_ticks_downclock() {
        let (_platform, gov) = governor(1);
        // bring-up leaves the core at full tilt
        assert_eq!(gov.core_status(CoreId(0)).unwrap().freq_khz, 1_450_000);

        // a near-idle core must come down without any policy call
        let t0 = Instant::now();
        let mut khz = 0;
        for i in 0..100u64 {
            khz = gov
                .on_tick(
                    CoreId(0),
                    TickSample {
                        io_wait_us: i, // no I/O spikes
                        util_pct: 2,
                        now: t0 + Duration::from_millis(i * 20),
                    },
                )
                .unwrap();
        }
        assert_eq!(khz, 400_000);
        assert_eq!(gov.core_status(CoreId(0)).unwrap().freq_khz, 400_000);
    }

    #[test]
    fn test_io_boost_lifts_to_nominal() {
        let (_platform, gov) = governor(1);

        let t0 = Instant::now();
        let khz = gov
            .on_tick(CoreId(0), TickSample { io_wait_us: 1_000, util_pct: 50, now: t0 })
            .unwrap();
        assert_eq!(khz, 900_000); // mid utilization, no boost yet

        // +500 µs of I/O wait in one tick
        let khz = gov
            .on_tick(
                CoreId(0),
                TickSample {
                    io_wait_us: 1_500,
                    util_pct: 50,
                    now: t0 + Duration::from_millis(4),
                },
            )
            .unwrap();

        assert_eq!(khz, 1_200_000); // nominal, not boost
        let status = gov.core_status(CoreId(0)).unwrap();
        assert!(status.io_boost_active);
        assert_eq!(status.stats.io_boosts, 1);

        // past the hold time with no further spikes the boost drops out
        let khz = gov
            .on_tick(
                CoreId(0),
                TickSample {
                    io_wait_us: 1_500,
                    util_pct: 50,
                    now: t0 + Duration::from_millis(200),
                },
            )
            .unwrap();
        assert_eq!(khz, 900_000);
    }

    #[test]
    fn test_io_boost_worthiness_uses_configured_share() {
        let (_platform, gov) = governor(1);
        // default minimum share is 5 %
        assert!(gov.io_boost_worthy(5, 100));
        assert!(!gov.io_boost_worthy(4, 100));
        assert!(!gov.io_boost_worthy(100, 0));

        let cfg = GovernorConfig {
            io_boost_min_util_pct: 50,
            ..GovernorConfig::default()
        };
        gov.update_config(cfg);
        assert!(!gov.io_boost_worthy(5, 100));
        assert!(gov.io_boost_worthy(60, 100));
    }

    #[test]
    fn test_tick_publishes_dynamic_epp() {
        let (_platform, gov) = governor(1);
        let t0 = Instant::now();

        gov.on_tick(CoreId(0), TickSample { io_wait_us: 0, util_pct: 95, now: t0 })
            .unwrap();

        let status = gov.core_status(CoreId(0)).unwrap();
        assert_eq!(status.dynamic_epp, epp_codes::PERFORMANCE);

        let handle = gov.cores.get(&CoreId(0)).unwrap();
        let guard = epoch::pin();
        assert_eq!(handle.state.target.current(&guard).epp, epp_codes::PERFORMANCE);
    }

    #[test]
    fn test_apply_failure_returns_last_known_frequency() {
        let (platform, gov) = governor(1);
        assert_eq!(gov.core_status(CoreId(0)).unwrap().freq_khz, 1_450_000);

        platform.set_fail_apply(true);
        let khz = gov.set_policy(CoreId(0), 400_000, 400_000).unwrap();
        assert_eq!(khz, 1_450_000);
        assert!(gov.core_status(CoreId(0)).unwrap().stats.apply_failures >= 1);

        platform.set_fail_apply(false);
        assert_eq!(gov.select_and_apply(CoreId(0), 400_000).unwrap(), 400_000);
    }

    #[test]
    fn test_release_core() {
        let (_platform, gov) = governor(2);
        gov.release_core(CoreId(1)).unwrap();
        assert!(matches!(
            gov.release_core(CoreId(1)),
            Err(GovernorError::UnknownCore(CoreId(1)))
        ));
        assert_eq!(gov.core_ids(), vec![CoreId(0)]);
    }

    #[test]
    fn test_suspend_resume_cycle() {
        let (platform, gov) = governor(1);
        assert_eq!(gov.core_status(CoreId(0)).unwrap().freq_khz, 1_450_000);

        gov.suspend();
        // suspend drops to the lowest point and pins selection
        assert_eq!(platform.applied_pstate(CoreId(0)), 4);
        gov.set_policy(CoreId(0), 400_000, 1_450_000).unwrap();
        assert_eq!(platform.applied_pstate(CoreId(0)), 4);

        gov.resume();
        assert_eq!(gov.core_status(CoreId(0)).unwrap().freq_khz, 1_450_000);
    }

    #[test]
    fn test_thermal_guard_end_to_end() {
        let platform = Arc::new(SimulatedPlatform::with_defaults(1));
        let cfg = GovernorConfig {
            thermal_poll_interval_ms: 5,
            ..GovernorConfig::default()
        };
        let gov = FreqGovernor::new(platform.clone(), cfg).unwrap();
        gov.init_all_cores().unwrap();
        gov.start().unwrap();

        platform.set_temp(CoreId(0), 95);
        std::thread::sleep(Duration::from_millis(100));

        let status = gov.core_status(CoreId(0)).unwrap();
        assert_eq!(status.thermal_state, "hard_throttle");
        assert_eq!(status.freq_khz, 400_000);

        // cool back down through recovery to normal
        platform.set_temp(CoreId(0), 40);
        std::thread::sleep(Duration::from_millis(300));
        let status = gov.core_status(CoreId(0)).unwrap();
        assert_eq!(status.thermal_state, "normal");

        gov.shutdown();
    }

    #[test]
    fn test_invalid_sensor_keeps_prior_state() {
        let platform = Arc::new(SimulatedPlatform::with_defaults(1));
        let cfg = GovernorConfig {
            thermal_poll_interval_ms: 5,
            ..GovernorConfig::default()
        };
        let gov = FreqGovernor::new(platform.clone(), cfg).unwrap();
        gov.init_all_cores().unwrap();
        gov.start().unwrap();

        platform.set_temp(CoreId(0), 85);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(gov.core_status(CoreId(0)).unwrap().thermal_state, "soft_throttle");

        // the sensor goes bad; the throttle state must hold
        platform.set_temp_valid(CoreId(0), false);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(gov.core_status(CoreId(0)).unwrap().thermal_state, "soft_throttle");
        assert!(matches!(
            gov.read_temp_c(CoreId(0)),
            Err(GovernorError::SensorReadInvalid(CoreId(0)))
        ));

        gov.shutdown();
    }

    #[test]
    fn test_update_config_toggles_boost() {
        let (_platform, gov) = governor(1);

        let cfg = GovernorConfig {
            boost_enabled: false,
            ..GovernorConfig::default()
        };
        gov.update_config(cfg);

        assert_eq!(gov.select_and_apply(CoreId(0), 1_450_000).unwrap(), 1_200_000);
        assert!(!gov.config().boost_enabled);
    }
}
