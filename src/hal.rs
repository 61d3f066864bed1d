//! Platform abstraction.
//!
//! Everything the governor needs from the machine goes through [`Platform`]:
//! capability probing, raw descriptor slots, the temperature sensor, and the
//! core-local register write. Hotplug hooks, sysfs exposure and parameter
//! parsing live with the host integration, not here.
//!
//! [`SimulatedPlatform`] is a software stand-in used by the demo binary and
//! the test suite. It models register state, not power.

use crate::pstate::{RawDescriptor, MAX_PSTATE_SLOTS};
use crate::types::CoreId;
use anyhow::bail;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Hardware surface the governor drives.
pub trait Platform: Send + Sync + 'static {
    /// Whether the machine exposes managed performance states at all.
    fn supports_managed_pstates(&self) -> bool;

    fn core_count(&self) -> usize;

    fn boost_capable(&self) -> bool;

    /// Raw descriptor in `slot` for `core`, if the slot is populated.
    fn read_descriptor(&self, core: CoreId, slot: usize) -> Option<RawDescriptor>;

    /// Core temperature in °C. `None` means the sensor reported an invalid
    /// sample; callers skip the round rather than acting on it.
    fn read_temp_c(&self, core: CoreId) -> Option<u32>;

    /// Write the performance-state control register. Must be invoked on the
    /// owning core; the governor guarantees this by routing every call
    /// through that core's executor thread.
    fn apply_pstate(&self, core: CoreId, hw_pstate: u8) -> anyhow::Result<()>;
}

struct SimCore {
    descriptors: Vec<RawDescriptor>,
    temp_c: AtomicU32,
    applied_pstate: AtomicU32,
    temp_valid: AtomicBool,
}

/// In-memory platform with a realistic default operating-point ladder.
pub struct SimulatedPlatform {
    cores: Vec<SimCore>,
    supported: bool,
    boost_capable: bool,
    fail_apply: AtomicBool,
}

impl SimulatedPlatform {
    /// `num_cores` cores, each with four sustained points (400 MHz to
    /// 1.2 GHz), one boost point at 1.45 GHz, and a 45 °C starting
    /// temperature.
    pub fn with_defaults(num_cores: usize) -> Self {
        let descriptors = vec![
            RawDescriptor::pack(58, 0, 4, 0, true, true),  // 1450 MHz boost, 1450 mV
            RawDescriptor::pack(48, 0, 12, 0, false, true), // 1200 MHz, 1250 mV
            RawDescriptor::pack(36, 0, 16, 0, false, true), // 900 MHz, 1150 mV
            RawDescriptor::pack(24, 0, 20, 0, false, true), // 600 MHz, 1050 mV
            RawDescriptor::pack(16, 0, 24, 0, false, true), // 400 MHz, 950 mV
        ];
        Self::new(num_cores, descriptors, true)
    }

    pub fn new(num_cores: usize, descriptors: Vec<RawDescriptor>, boost_capable: bool) -> Self {
        let cores = (0..num_cores)
            .map(|_| SimCore {
                descriptors: descriptors.clone(),
                temp_c: AtomicU32::new(45),
                applied_pstate: AtomicU32::new(0),
                temp_valid: AtomicBool::new(true),
            })
            .collect();

        Self {
            cores,
            supported: true,
            boost_capable,
            fail_apply: AtomicBool::new(false),
        }
    }

    /// A machine without managed performance states.
    pub fn unsupported() -> Self {
        let mut platform = Self::new(1, Vec::new(), false);
        platform.supported = false;
        platform
    }

    pub fn set_temp(&self, core: CoreId, temp_c: u32) {
        if let Some(c) = self.cores.get(core.0) {
            c.temp_c.store(temp_c, Ordering::Relaxed);
        }
    }

    pub fn temp(&self, core: CoreId) -> u32 {
        self.cores
            .get(core.0)
            .map(|c| c.temp_c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Make the sensor report invalid samples for one core.
    pub fn set_temp_valid(&self, core: CoreId, valid: bool) {
        if let Some(c) = self.cores.get(core.0) {
            c.temp_valid.store(valid, Ordering::Relaxed);
        }
    }

    /// Last hardware slot written for a core.
    pub fn applied_pstate(&self, core: CoreId) -> u8 {
        self.cores
            .get(core.0)
            .map(|c| c.applied_pstate.load(Ordering::Relaxed) as u8)
            .unwrap_or(0)
    }

    /// Make every register write fail, for exercising the recovery path.
    pub fn set_fail_apply(&self, fail: bool) {
        self.fail_apply.store(fail, Ordering::Relaxed);
    }
}

impl Platform for SimulatedPlatform {
    fn supports_managed_pstates(&self) -> bool {
        self.supported
    }

    fn core_count(&self) -> usize {
        self.cores.len()
    }

    fn boost_capable(&self) -> bool {
        self.boost_capable
    }

    fn read_descriptor(&self, core: CoreId, slot: usize) -> Option<RawDescriptor> {
        if slot >= MAX_PSTATE_SLOTS {
            return None;
        }
        self.cores.get(core.0)?.descriptors.get(slot).copied()
    }

    fn read_temp_c(&self, core: CoreId) -> Option<u32> {
        let c = self.cores.get(core.0)?;
        if !c.temp_valid.load(Ordering::Relaxed) {
            return None;
        }
        Some(c.temp_c.load(Ordering::Relaxed))
    }

    fn apply_pstate(&self, core: CoreId, hw_pstate: u8) -> anyhow::Result<()> {
        if self.fail_apply.load(Ordering::Relaxed) {
            bail!("simulated register write fault on core {}", core);
        }
        match self.cores.get(core.0) {
            Some(c) => {
                c.applied_pstate.store(hw_pstate as u32, Ordering::Relaxed);
                Ok(())
            }
            None => bail!("no such core {}", core),
        }
    }
}
