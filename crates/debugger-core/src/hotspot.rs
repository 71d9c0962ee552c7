//! Bounded most-recently-used table of (address, PC, space) read hotspots.

use std::collections::VecDeque;

use crate::memory::SpaceRef;

/// One tracked access site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HotspotEntry {
    /// Accessed byte address.
    pub access: u64,
    /// Program counter that performed the access.
    pub pc: u64,
    /// Accessed space.
    pub space: SpaceRef,
    /// Number of hits since the entry was inserted.
    pub count: u32,
}

/// Fixed-capacity hotspot table; new sites enter at the front and the back entry falls off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotspotTracker {
    entries: VecDeque<HotspotEntry>,
    capacity: usize,
    threshold: u32,
}

impl HotspotTracker {
    /// Tracker holding up to `capacity` sites, reporting evictions above `threshold` hits.
    #[must_use]
    pub fn new(capacity: usize, threshold: u32) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            threshold,
        }
    }

    /// Maximum number of sites.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Eviction report threshold.
    #[must_use]
    pub const fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Entries, most recently hit first.
    pub fn entries(&self) -> impl Iterator<Item = &HotspotEntry> + '_ {
        self.entries.iter()
    }

    /// Records one access. Returns the evicted entry when it exceeded the threshold.
    pub fn record(&mut self, space: SpaceRef, access: u64, pc: u64) -> Option<HotspotEntry> {
        let found = self
            .entries
            .iter()
            .position(|entry| entry.access == access && entry.pc == pc && entry.space == space);
        if let Some(position) = found {
            if let Some(mut entry) = self.entries.remove(position) {
                entry.count = entry.count.saturating_add(1);
                self.entries.push_front(entry);
            }
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_back()
        } else {
            None
        };
        self.entries.push_front(HotspotEntry {
            access,
            pc,
            space,
            count: 1,
        });
        evicted.filter(|entry| entry.count > self.threshold)
    }
}
