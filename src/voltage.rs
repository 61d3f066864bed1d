//! Voltage safety verification for operating points.
//!
//! Voltage ids are converted to millivolts through a fixed linear
//! approximation and compared against the configured ceiling. The verifier
//! only annotates points; exclusion happens at selection time.

use crate::pstate::{OperatingPoint, PstateTable};
use crate::types::{CoreId, GovernorConfig};

/// Zero-code voltage of the linear VID approximation, in mV.
pub const VID_BASE_MV: u32 = 1550;
/// Millivolts per VID step.
pub const VID_STEP_MV: u32 = 25;
/// Advisory threshold logged when crossed, below the hard ceiling.
pub const VOLTAGE_WARN_MV: u32 = 1350;

/// Convert a voltage id to millivolts.
pub fn vid_to_mv(vid: u8) -> u32 {
    VID_BASE_MV.saturating_sub(vid as u32 * VID_STEP_MV)
}

/// Ceilings the verifier checks against, taken from live configuration.
#[derive(Debug, Clone, Copy)]
pub struct VoltageLimits {
    pub max_safe_mv: u32,
    pub boost_max_mv: u32,
}

impl From<&GovernorConfig> for VoltageLimits {
    fn from(cfg: &GovernorConfig) -> Self {
        Self {
            max_safe_mv: cfg.voltage_max_mv,
            boost_max_mv: cfg.voltage_boost_max_mv,
        }
    }
}

/// Verify one operating point, writing its voltage annotation.
///
/// A boost point above the ceiling but within the extended boost ceiling is
/// accepted with a warning. Returns whether the point is safe.
pub fn verify_point(point: &mut OperatingPoint, limits: VoltageLimits) -> bool {
    let mv = vid_to_mv(point.vid);
    point.voltage_mv = mv;

    if mv > limits.max_safe_mv {
        if point.is_boost && mv <= limits.boost_max_mv {
            log::warn!(
                "operating point {} boost voltage {} mV is high but acceptable",
                point.hw_pstate,
                mv
            );
            point.is_voltage_safe = true;
            return true;
        }

        log::warn!(
            "operating point {} voltage {} mV exceeds safe limit {} mV, clamping",
            point.hw_pstate,
            mv,
            limits.max_safe_mv
        );
        point.is_voltage_safe = false;
        return false;
    }

    if mv > VOLTAGE_WARN_MV {
        log::debug!(
            "operating point {} voltage {} mV above warning threshold {} mV",
            point.hw_pstate,
            mv,
            VOLTAGE_WARN_MV
        );
    }

    point.is_voltage_safe = true;
    true
}

/// Verify every point in a table. Returns the number of clamped points;
/// a non-zero result is advisory, the core keeps operating over the safe
/// subset.
pub fn verify_table(core: CoreId, table: &mut PstateTable, limits: VoltageLimits) -> usize {
    let mut clamped = 0;

    for point in table.points_mut() {
        if !verify_point(point, limits) {
            clamped += 1;
        }
    }

    if clamped > 0 {
        log::warn!("core {}: {} operating points voltage-clamped for safety", core, clamped);
    }

    clamped
}
