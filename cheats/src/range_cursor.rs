// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! A forward cursor over a sorted, disjoint set of address ranges, walked
//! one alignment step at a time. Grounded on the original search engine's
//! `MemoryRangesIterator`, but reshaped around an explicit `advance`/
//! `distance` pair instead of operator overloading.

use std::sync::Arc;

/// An inclusive `(low, high)` address range. `high` is assumed already
/// trimmed so that `high` itself is a legal address to read from (callers
/// subtract the value width before constructing these).
pub type MemoryRange = (u32, u32);

fn align_down(x: u32, alignment: u32) -> u32 {
    x & !(alignment - 1)
}

fn align_up(x: u32, alignment: u32) -> u32 {
    x.wrapping_add(alignment - 1) & !(alignment - 1)
}

/// Walks every `alignment`-aligned address across `ranges`, skipping any
/// range too narrow to contain one.
#[derive(Clone)]
pub struct RangeCursor {
    ranges: Arc<[MemoryRange]>,
    alignment: u32,
    range_idx: usize,
    address: u32,
    upper_bound: u32,
}

impl RangeCursor {
    /// A cursor positioned at the first reachable address.
    pub fn start(ranges: Arc<[MemoryRange]>, alignment: u32) -> Self {
        let mut cursor = Self {
            ranges,
            alignment,
            range_idx: 0,
            address: 0,
            upper_bound: 0,
        };
        cursor.seek_non_empty_range();
        cursor
    }

    /// A one-past-the-end cursor over the same ranges, for use as a stop
    /// condition.
    pub fn end(ranges: Arc<[MemoryRange]>, alignment: u32) -> Self {
        Self {
            range_idx: ranges.len(),
            ranges,
            alignment,
            address: 0,
            upper_bound: 0,
        }
    }

    pub fn is_end(&self) -> bool {
        self.range_idx == self.ranges.len()
    }

    /// The address this cursor currently points at. Meaningless once
    /// [`Self::is_end`] is true.
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Moves to the next aligned address, crossing into the next range if
    /// the current one is exhausted.
    pub fn advance(&mut self) {
        debug_assert!(!self.is_end(), "advance() called past the last range");
        let next = self.address.wrapping_add(self.alignment);
        if next > self.address && next <= self.upper_bound {
            self.address = next;
        } else {
            self.range_idx += 1;
            self.seek_non_empty_range();
        }
    }

    fn seek_non_empty_range(&mut self) {
        while self.range_idx < self.ranges.len() {
            let (lo, hi) = self.ranges[self.range_idx];
            let aligned_lo = align_up(lo, self.alignment);
            let aligned_hi = align_down(hi, self.alignment);
            if aligned_lo >= lo && aligned_lo <= aligned_hi {
                self.address = aligned_lo;
                self.upper_bound = aligned_hi;
                return;
            }
            self.range_idx += 1;
        }
        self.address = 0;
        self.upper_bound = 0;
    }

    /// Number of `advance()` calls needed to reach `self` from `other`.
    /// Negative if `self` is behind `other`. Both cursors must share the
    /// same range list and alignment.
    fn steps_from(&self, other: &Self) -> i64 {
        debug_assert!(Arc::ptr_eq(&self.ranges, &other.ranges));
        debug_assert_eq!(self.alignment, other.alignment);

        if self.range_idx == other.range_idx {
            if self.is_end() {
                return 0;
            }
            return (self.address as i64 - other.address as i64) / self.alignment as i64;
        }

        let alignment = self.alignment as i64;
        let mut diff: i64 = 0;

        if !other.is_end() {
            diff += (other.upper_bound as i64 - other.address as i64) / alignment + 1;
            for idx in (other.range_idx + 1)..other.ranges.len() {
                let (lo, hi) = other.ranges[idx];
                let aligned_lo = align_up(lo, self.alignment);
                if idx == self.range_idx {
                    return diff + (self.address as i64 - aligned_lo as i64) / alignment;
                }
                let aligned_hi = align_down(hi, self.alignment);
                if aligned_lo >= lo && aligned_lo <= aligned_hi {
                    diff += (aligned_hi as i64 - aligned_lo as i64) / alignment + 1;
                }
            }
        }

        if !self.is_end() {
            diff -= (self.upper_bound as i64 - self.address as i64) / alignment + 1;
            for idx in (self.range_idx + 1)..self.ranges.len() {
                let (lo, hi) = self.ranges[idx];
                let aligned_lo = align_up(lo, self.alignment);
                let aligned_hi = align_down(hi, self.alignment);
                if aligned_lo >= lo && aligned_lo <= aligned_hi {
                    diff -= (aligned_hi as i64 - aligned_lo as i64) / alignment + 1;
                }
            }
        }

        diff
    }
}

impl PartialEq for RangeCursor {
    fn eq(&self, other: &Self) -> bool {
        debug_assert!(Arc::ptr_eq(&self.ranges, &other.ranges));
        self.range_idx == other.range_idx && (self.is_end() || self.address == other.address)
    }
}

/// The number of `advance()` calls needed to walk from `from` to `to`.
pub fn distance(from: &RangeCursor, to: &RangeCursor) -> i64 {
    to.steps_from(from)
}
