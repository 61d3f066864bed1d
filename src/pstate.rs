//! Per-core operating-point table built from raw hardware descriptors.
//!
//! A descriptor is an opaque 64-bit code the platform reports per slot:
//! frequency id, divisor id, voltage id, a post-divider, a boost marker and
//! an enabled bit. The table decodes every enabled slot once at core
//! bring-up and is immutable afterwards; a rebuild replaces it wholesale.

use crate::types::{CoreId, GovernorError};
use crate::voltage;

/// Number of descriptor slots probed per core.
pub const MAX_PSTATE_SLOTS: usize = 8;

/// Frequency step per frequency-id increment, in MHz.
const FREQ_BASE_MHZ: u64 = 25;
const KHZ_PER_MHZ: u32 = 1000;

const FID_MASK: u64 = 0x3F;
const DID_SHIFT: u64 = 6;
const DID_MASK: u64 = 0x1F;
const VID_SHIFT: u64 = 11;
const VID_MASK: u64 = 0xFF;
const DIV_SHIFT: u64 = 19;
const DIV_MASK: u64 = 0x3;
const BOOST_BIT: u64 = 1 << 62;
const ENABLE_BIT: u64 = 1 << 63;

/// Raw per-slot hardware descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawDescriptor(pub u64);

impl RawDescriptor {
    pub fn fid(self) -> u8 {
        (self.0 & FID_MASK) as u8
    }

    pub fn did(self) -> u8 {
        ((self.0 >> DID_SHIFT) & DID_MASK) as u8
    }

    pub fn vid(self) -> u8 {
        ((self.0 >> VID_SHIFT) & VID_MASK) as u8
    }

    pub fn div(self) -> u8 {
        ((self.0 >> DIV_SHIFT) & DIV_MASK) as u8
    }

    pub fn is_boost(self) -> bool {
        self.0 & BOOST_BIT != 0
    }

    pub fn is_enabled(self) -> bool {
        self.0 & ENABLE_BIT != 0
    }

    /// Assemble a descriptor from its fields. Used by simulated platforms
    /// and tests; real hardware reports the packed value directly.
    pub fn pack(fid: u8, did: u8, vid: u8, div: u8, boost: bool, enabled: bool) -> Self {
        let mut val = (fid as u64 & FID_MASK)
            | ((did as u64 & DID_MASK) << DID_SHIFT)
            | ((vid as u64 & VID_MASK) << VID_SHIFT)
            | ((div as u64 & DIV_MASK) << DIV_SHIFT);
        if boost {
            val |= BOOST_BIT;
        }
        if enabled {
            val |= ENABLE_BIT;
        }
        Self(val)
    }
}

/// Decode a descriptor's frequency in kHz.
///
/// `freq = base * fid` when the divisor id is zero, otherwise
/// `base * fid * 4 / (did + 4)`; a non-zero post-divider then shifts the
/// result right by `div - 1`.
pub fn decode_freq_khz(desc: RawDescriptor) -> u32 {
    let fid = desc.fid() as u64;
    let did = desc.did() as u64;

    let mut mhz = if did == 0 {
        fid * FREQ_BASE_MHZ
    } else {
        fid * FREQ_BASE_MHZ * 4 / (did + 4)
    };

    let div = desc.div();
    if div > 0 {
        mhz >>= div - 1;
    }

    mhz as u32 * KHZ_PER_MHZ
}

/// A discrete hardware-supported (frequency, voltage) pair.
///
/// Immutable once the table is built, except for the voltage annotation the
/// safety verifier writes at bring-up.
#[derive(Debug, Clone)]
pub struct OperatingPoint {
    /// Position in the sorted table.
    pub index: u8,
    /// Hardware descriptor slot this point was decoded from.
    pub hw_pstate: u8,
    pub freq_khz: u32,
    pub vid: u8,
    pub voltage_mv: u32,
    pub is_boost: bool,
    pub is_voltage_safe: bool,
}

/// Ordered set of operating points for one core, ascending by frequency.
#[derive(Debug, Clone)]
pub struct PstateTable {
    points: Vec<OperatingPoint>,
    pub min_freq_khz: u32,
    pub max_freq_khz: u32,
    /// Highest sustained (non-boost) frequency.
    pub nominal_freq_khz: u32,
    pub boost_supported: bool,
    pub lowest_perf: u8,
    pub highest_perf: u8,
    pub nominal_perf: u8,
}

impl PstateTable {
    /// Build the table from the enabled descriptors of a core.
    ///
    /// `raw` pairs each descriptor with its hardware slot. Boost-marked
    /// slots are skipped entirely when the platform is not boost capable.
    pub fn build(
        core: CoreId,
        raw: &[(u8, RawDescriptor)],
        boost_capable: bool,
    ) -> Result<Self, GovernorError> {
        let mut points = Vec::with_capacity(raw.len());

        for &(slot, desc) in raw {
            if !desc.is_enabled() {
                continue;
            }
            if desc.is_boost() && !boost_capable {
                log::debug!("core {}: skipping boost slot {} (no boost capability)", core, slot);
                continue;
            }

            let freq_khz = decode_freq_khz(desc);
            if freq_khz == 0 {
                continue;
            }

            points.push(OperatingPoint {
                index: 0,
                hw_pstate: slot,
                freq_khz,
                vid: desc.vid(),
                voltage_mv: voltage::vid_to_mv(desc.vid()),
                is_boost: desc.is_boost(),
                is_voltage_safe: true,
            });
        }

        if points.is_empty() {
            return Err(GovernorError::NoOperatingPoints(core));
        }

        points.sort_by_key(|p| p.freq_khz);
        for (i, p) in points.iter_mut().enumerate() {
            p.index = i as u8;
        }

        let min_freq_khz = points.first().map(|p| p.freq_khz).unwrap_or(0);
        let max_freq_khz = points.last().map(|p| p.freq_khz).unwrap_or(0);
        let nominal_freq_khz = points
            .iter()
            .filter(|p| !p.is_boost)
            .map(|p| p.freq_khz)
            .max()
            .unwrap_or(max_freq_khz);
        let boost_supported = boost_capable && points.iter().any(|p| p.is_boost);

        log::info!(
            "core {}: {} operating points, min={} kHz, max={} kHz, nominal={} kHz, boost={}",
            core,
            points.len(),
            min_freq_khz,
            max_freq_khz,
            nominal_freq_khz,
            if boost_supported { "yes" } else { "no" },
        );

        Ok(Self {
            points,
            min_freq_khz,
            max_freq_khz,
            nominal_freq_khz,
            boost_supported,
            lowest_perf: 0,
            highest_perf: 255,
            nominal_perf: 128,
        })
    }

    pub fn points(&self) -> &[OperatingPoint] {
        &self.points
    }

    pub(crate) fn points_mut(&mut self) -> &mut [OperatingPoint] {
        &mut self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Lowest-frequency point. The table is never empty once built.
    pub fn lowest(&self) -> &OperatingPoint {
        &self.points[0]
    }

    pub fn highest(&self) -> &OperatingPoint {
        &self.points[self.points.len() - 1]
    }

    /// Closest voltage-safe point not exceeding `target_khz`; an exact match
    /// short-circuits. Boost points are excluded unless `allow_boost`.
    ///
    /// Falls back to the lowest safe point when nothing fits below the
    /// request, and to the absolute lowest point when the core has zero safe
    /// points: leaving a core without any selectable frequency is worse than
    /// running its least aggressive point.
    pub fn select_not_above(&self, target_khz: u32, allow_boost: bool) -> &OperatingPoint {
        let mut best: Option<&OperatingPoint> = None;
        let mut lowest_safe: Option<&OperatingPoint> = None;

        for p in &self.points {
            if !p.is_voltage_safe || (p.is_boost && !allow_boost) {
                continue;
            }
            if lowest_safe.is_none() {
                lowest_safe = Some(p);
            }
            if p.freq_khz == target_khz {
                return p;
            }
            if p.freq_khz < target_khz {
                best = Some(p);
            }
        }

        best.or(lowest_safe).unwrap_or(&self.points[0])
    }

    /// Point carrying exactly this frequency, if any.
    pub fn point_for_freq(&self, freq_khz: u32) -> Option<&OperatingPoint> {
        self.points.iter().find(|p| p.freq_khz == freq_khz)
    }

    /// Map an abstract performance value onto the core's frequency range by
    /// linear interpolation.
    pub fn perf_to_freq_khz(&self, perf: u8) -> u32 {
        let span_perf = (self.highest_perf - self.lowest_perf) as u64;
        if span_perf == 0 {
            return self.max_freq_khz;
        }
        let perf = perf.clamp(self.lowest_perf, self.highest_perf);
        let span_freq = (self.max_freq_khz - self.min_freq_khz) as u64;
        let offset = (perf - self.lowest_perf) as u64;
        self.min_freq_khz + (span_freq * offset / span_perf) as u32
    }

    /// Inverse of [`perf_to_freq_khz`]; the input is clamped to the core's
    /// frequency range first.
    pub fn freq_to_perf(&self, freq_khz: u32) -> u8 {
        let span_freq = (self.max_freq_khz - self.min_freq_khz) as u64;
        if span_freq == 0 {
            return self.highest_perf;
        }
        let freq = freq_khz.clamp(self.min_freq_khz, self.max_freq_khz);
        let span_perf = (self.highest_perf - self.lowest_perf) as u64;
        let offset = (freq - self.min_freq_khz) as u64;
        self.lowest_perf + (span_perf * offset / span_freq) as u8
    }
}
