//! Shared types, configuration, and the governor error taxonomy.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a processor core under governor control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoreId(pub usize);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operator-selected operating mode.
///
/// `Manual` leaves the mid-band power preference at balance and expects the
/// operator to drive policy through `set_policy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    Powersave,
    Balance,
    Performance,
    Manual,
}

impl OperatingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatingMode::Powersave => "powersave",
            OperatingMode::Balance => "balance",
            OperatingMode::Performance => "performance",
            OperatingMode::Manual => "manual",
        }
    }
}

impl Default for OperatingMode {
    fn default() -> Self {
        OperatingMode::Balance
    }
}

/// Energy Performance Preference codes understood by the hardware's
/// performance-control interface. Lower values bias toward performance.
pub mod epp {
    pub const POWERSAVE: u8 = 0xFF;
    pub const BALANCE_POWERSAVE: u8 = 0xBF;
    pub const BALANCE: u8 = 0x80;
    pub const BALANCE_PERFORMANCE: u8 = 0x40;
    pub const PERFORMANCE: u8 = 0x00;
}

/// Feature flags published by the governor once the platform has been probed.
pub mod features {
    pub const BOOST: u32 = 1 << 0;
    pub const EPP: u32 = 1 << 1;
    pub const THERMAL_GUARD: u32 = 1 << 2;
    pub const IO_BOOST: u32 = 1 << 3;
    pub const VOLTAGE_GUARD: u32 = 1 << 4;
}

/// Governor configuration.
///
/// Every field is hot-reloadable through [`crate::FreqGovernor::update_config`];
/// none of it is persisted. Defaults mirror the hardware vendor's published
/// operating envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorConfig {
    /// Operating mode used by the mid-band power-preference mapping.
    pub mode: OperatingMode,
    /// Allow selection of boost operating points.
    pub boost_enabled: bool,
    /// Lower performance bound published in every target (0-255).
    pub min_perf: u8,
    /// Upper performance bound published in every target (0-255).
    pub max_perf: u8,
    /// Enable the dynamic power-preference tuner.
    pub epp_enabled: bool,

    /// Enable the background thermal guard loop.
    pub thermal_guard_enabled: bool,
    /// Temperature at which soft throttling begins (°C).
    pub soft_temp_c: u32,
    /// Temperature at which emergency throttling begins (°C).
    pub hard_temp_c: u32,
    /// Hysteresis applied when leaving a throttle state (°C).
    pub temp_hysteresis_c: u32,
    /// Temperature below which recovery completes (°C).
    pub safe_temp_c: u32,
    /// Ceiling ramp per poll while recovering (performance units).
    pub recovery_step: u8,
    /// Thermal guard polling interval.
    pub thermal_poll_interval_ms: u64,
    /// PI proportional gain, scaled by `pi_scale`.
    pub thermal_kp: i32,
    /// PI integral gain, scaled by `pi_scale`.
    pub thermal_ki: i32,
    /// Fixed-point scale for the PI gains.
    pub pi_scale: i32,
    /// Anti-windup clamp for the integral accumulator.
    pub integral_max: i32,

    /// Maximum safe voltage for sustained operating points (mV).
    pub voltage_max_mv: u32,
    /// Extended ceiling tolerated for boost operating points (mV).
    pub voltage_boost_max_mv: u32,

    /// I/O-wait delta that triggers a boost (µs).
    pub io_boost_delta_us: u64,
    /// How long an activated boost is held (ms).
    pub io_boost_duration_ms: u64,
    /// Minimum I/O utilization for the pure boost predicate (%).
    pub io_boost_min_util_pct: u64,

    /// Utilization below which the powersave timer runs (%).
    pub util_low_threshold_pct: u32,
    /// Utilization above which the preference goes performance-biased (%).
    pub util_high_threshold_pct: u32,
    /// How long utilization must stay low before switching to powersave (ms).
    pub epp_low_util_delay_ms: u64,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::Balance,
            boost_enabled: true,
            min_perf: 0,
            max_perf: 255,
            epp_enabled: true,

            thermal_guard_enabled: true,
            soft_temp_c: 80,
            hard_temp_c: 90,
            temp_hysteresis_c: 3,
            safe_temp_c: 75,
            recovery_step: 10,
            thermal_poll_interval_ms: 250,
            thermal_kp: 50,
            thermal_ki: 10,
            pi_scale: 1000,
            integral_max: 1000,

            voltage_max_mv: 1450,
            voltage_boost_max_mv: 1500,

            io_boost_delta_us: 100,
            io_boost_duration_ms: 50,
            io_boost_min_util_pct: 5,

            util_low_threshold_pct: 10,
            util_high_threshold_pct: 80,
            epp_low_util_delay_ms: 500,
        }
    }
}

/// Governor error taxonomy.
///
/// Nothing here is surfaced to an interactive user; callers decide
/// visibility. Transient conditions (invalid sensor reads, failed remote
/// applies) are recovered internally and only reach this type when a caller
/// asks for something that cannot be answered at all.
#[derive(Debug, thiserror::Error)]
pub enum GovernorError {
    #[error("platform does not expose managed performance states")]
    HardwareUnsupported,

    #[error("core {0} reported no usable operating points")]
    NoOperatingPoints(CoreId),

    #[error("core {0} temperature sensor returned an invalid reading")]
    SensorReadInvalid(CoreId),

    #[error("core {0} is not under governor control")]
    UnknownCore(CoreId),

    #[error("frequency transition could not run on core {0}")]
    RemoteApplyFailed(CoreId),

    #[error("governor internal failure: {0}")]
    Internal(String),
}

/// Cumulative per-core statistics. Counters only ever increase.
#[derive(Debug, Default)]
pub struct CoreStats {
    pub transitions: AtomicU64,
    pub io_boosts: AtomicU64,
    pub thermal_events: AtomicU64,
    pub voltage_clamps: AtomicU64,
    pub apply_failures: AtomicU64,
}

impl CoreStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            transitions: self.transitions.load(Ordering::Relaxed),
            io_boosts: self.io_boosts.load(Ordering::Relaxed),
            thermal_events: self.thermal_events.load(Ordering::Relaxed),
            voltage_clamps: self.voltage_clamps.load(Ordering::Relaxed),
            apply_failures: self.apply_failures.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CoreStats`].
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StatsSnapshot {
    pub transitions: u64,
    pub io_boosts: u64,
    pub thermal_events: u64,
    pub voltage_clamps: u64,
    pub apply_failures: u64,
}
