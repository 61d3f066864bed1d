//! Concurrently-readable performance-target store.
//!
//! The store holds exactly one current [`PerfTarget`]. Publishing installs a
//! freshly allocated target with an atomic pointer swap and hands the old
//! one to the epoch collector, which frees it only after every reader that
//! could have observed it has unpinned. Readers pin an epoch guard, load the
//! pointer, and keep using the snapshot for the guard's lifetime.
//!
//! The contract: publish never blocks readers, and readers never block
//! publish.

use crossbeam::epoch::{self, Atomic, Guard, Owned};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Immutable performance intent for one core.
#[derive(Debug)]
pub struct PerfTarget {
    pub desired_perf: u8,
    pub min_perf: u8,
    pub max_perf: u8,
    pub epp: u8,
    pub timestamp: Instant,
    pub sequence: u64,
}

/// Lock-free single-writer, multi-reader holder of the current target.
pub struct TargetStore {
    current: Atomic<PerfTarget>,
    sequence: AtomicU64,
}

impl TargetStore {
    /// Create a store with an initial published target.
    pub fn new(desired: u8, min: u8, max: u8, epp: u8) -> Self {
        let (min, desired, max) = order_bounds(desired, min, max);
        let initial = PerfTarget {
            desired_perf: desired,
            min_perf: min,
            max_perf: max,
            epp,
            timestamp: Instant::now(),
            sequence: 0,
        };
        Self {
            current: Atomic::new(initial),
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish a new target, retiring the previous one for deferred
    /// reclamation. Inputs are reordered so `min <= desired <= max` always
    /// holds in the published record.
    pub fn publish(&self, desired: u8, min: u8, max: u8, epp: u8) {
        let (min, desired, max) = order_bounds(desired, min, max);
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;

        let new = Owned::new(PerfTarget {
            desired_perf: desired,
            min_perf: min,
            max_perf: max,
            epp,
            timestamp: Instant::now(),
            sequence,
        });

        let guard = epoch::pin();
        let old = self.current.swap(new, Ordering::AcqRel, &guard);
        // The old target stays readable for every pinned reader; the
        // collector frees it after all of them have moved past this epoch.
        unsafe {
            guard.defer_destroy(old);
        }
    }

    /// Read the current target. The reference stays valid for the guard's
    /// lifetime even if newer targets are published concurrently.
    pub fn current<'g>(&self, guard: &'g Guard) -> &'g PerfTarget {
        let shared = self.current.load(Ordering::Acquire, guard);
        // Never null: the constructor installs an initial target and swaps
        // only ever replace it.
        unsafe { shared.deref() }
    }

    /// Sequence number of the most recently published target.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

impl Drop for TargetStore {
    fn drop(&mut self) {
        // &mut self guarantees no concurrent readers; teardown ordering
        // guarantees no guard into this store outlives it.
        unsafe {
            let cur = self.current.load(Ordering::Relaxed, epoch::unprotected());
            if !cur.is_null() {
                drop(cur.into_owned());
            }
        }
    }
}

fn order_bounds(desired: u8, min: u8, max: u8) -> (u8, u8, u8) {
    let min = min.min(max);
    let desired = desired.clamp(min, max);
    (min, desired, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;

    #[test]
    fn test_initial_target_is_readable() {
        let store = TargetStore::new(128, 0, 255, 0x80);
        let guard = epoch::pin();
        let t = store.current(&guard);
        assert_eq!(t.desired_perf, 128);
        assert_eq!(t.sequence, 0);
    }

    #[test]
    fn test_publish_replaces_and_bumps_sequence() {
        let store = TargetStore::new(128, 0, 255, 0x80);
        store.publish(200, 10, 220, 0x40);

        let guard = epoch::pin();
        let t = store.current(&guard);
        assert_eq!(t.desired_perf, 200);
        assert_eq!(t.min_perf, 10);
        assert_eq!(t.max_perf, 220);
        assert_eq!(t.epp, 0x40);
        assert_eq!(t.sequence, 1);
    }

    #[test]
    fn test_published_bounds_are_ordered() {
        let store = TargetStore::new(0, 0, 255, 0);
        // desired above max, min above max: everything must come out ordered
        store.publish(250, 180, 120, 0);

        let guard = epoch::pin();
        let t = store.current(&guard);
        assert!(t.min_perf <= t.desired_perf);
        assert!(t.desired_perf <= t.max_perf);
    }

    #[test]
    fn test_old_snapshot_survives_publish() {
        let store = TargetStore::new(100, 0, 255, 0x80);

        let guard = epoch::pin();
        let old = store.current(&guard);
        assert_eq!(old.desired_perf, 100);

        store.publish(200, 0, 255, 0x80);
        store.publish(210, 0, 255, 0x80);

        // the pinned snapshot is still fully readable
        assert_eq!(old.desired_perf, 100);
        assert_eq!(old.sequence, 0);
    }

    #[test]
    fn test_concurrent_readers_and_writer() {
        let store = TargetStore::new(128, 0, 255, 0x80);
        let stop = AtomicBool::new(false);

        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    let mut last_seq = 0u64;
                    while !stop.load(Ordering::Relaxed) {
                        let guard = epoch::pin();
                        let t = store.current(&guard);
                        // every observed target satisfies the ordering
                        // invariant and sequences never move backwards
                        assert!(t.min_perf <= t.desired_perf);
                        assert!(t.desired_perf <= t.max_perf);
                        assert!(t.sequence >= last_seq);
                        last_seq = t.sequence;
                    }
                });
            }

            for i in 0..2_000u64 {
                let desired = (i % 256) as u8;
                store.publish(desired, 0, 255, 0x80);
            }
            stop.store(true, Ordering::Relaxed);
        });

        assert_eq!(store.sequence(), 2_000);
    }
}
