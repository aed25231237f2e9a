// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Adapts a [`Finder`] to a bounded table: a fixed row ceiling plus a
//! sentinel "too many results" row so a view never has to render millions
//! of rows from a single wide scan.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::finder::Finder;
use crate::value::{self, MemoryItem};

/// No view ever needs to show more matches than this; past it, the model
/// reports the ceiling plus one overflow row instead of growing further.
pub const MAX_ROWS: usize = 9999;

/// The table's column layout, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchColumn {
    Address,
    Type,
    Current,
    Previous,
}

/// A table-shaped view onto a [`Finder`]'s result set.
pub struct SearchModel {
    finder: Arc<Finder>,
    row_count: AtomicUsize,
}

impl SearchModel {
    pub fn new(finder: Arc<Finder>) -> Self {
        let model = Self { finder, row_count: AtomicUsize::new(0) };
        model.reseat();
        model
    }

    /// Pulls any newly completed search from the underlying [`Finder`] and
    /// reseats the row count. Returns whether a new result set was pulled,
    /// mirroring [`Finder::new_results`].
    pub fn new_results(&self) -> bool {
        let pulled = self.finder.new_results();
        self.reseat();
        pulled
    }

    fn reseat(&self) {
        let actual = self.finder.result_count();
        let rows = if actual > MAX_ROWS { MAX_ROWS + 1 } else { actual };
        self.row_count.store(rows, Ordering::SeqCst);
    }

    /// The number of rows the view should render, including the overflow
    /// sentinel row (if any).
    pub fn row_count(&self) -> usize {
        self.row_count.load(Ordering::SeqCst)
    }

    /// Whether `row` is the synthetic "too many results" row rather than a
    /// real match. Always the last row when present.
    pub fn is_overflow_row(&self, row: usize) -> bool {
        self.row_count() == MAX_ROWS + 1 && row == MAX_ROWS
    }

    /// Renders `column` of `row` as text, or `None` for an overflow row or
    /// an out-of-range one.
    pub fn get(&self, row: usize, column: SearchColumn) -> Option<String> {
        if row >= self.row_count() || self.is_overflow_row(row) {
            return None;
        }
        match column {
            SearchColumn::Address => self.finder.address(row).map(|addr| format!("{addr:#010x}")),
            SearchColumn::Type => Some(value::type_name(self.finder.item_type(row)).to_string()),
            SearchColumn::Current => value::format(&self.finder.current_item(row)),
            SearchColumn::Previous => value::format(&self.finder.previous_item(row)),
        }
    }

    /// Parses `text` against the search's locked-in type and pokes it into
    /// guest memory at `row`'s address. Only [`SearchColumn::Current`] is
    /// writable; every other column (and the overflow row) rejects the
    /// write.
    pub fn set(&self, row: usize, column: SearchColumn, text: &str) -> bool {
        if column != SearchColumn::Current || row >= self.row_count() || self.is_overflow_row(row) {
            return false;
        }
        let Some(addr) = self.finder.address(row) else {
            return false;
        };
        let ty = self.finder.item_type(row);
        let parsed = value::parse(text, ty);
        if !parsed.is_valid() {
            return false;
        }
        value::write(self.finder.memory(), addr, &parsed, crate::memory::AddressTranslation::Data)
    }

    /// The address backing `row`, for callers that want to act on a raw
    /// address rather than a formatted column (e.g. "add cheat entry").
    pub fn address_of(&self, row: usize) -> Option<u32> {
        if self.is_overflow_row(row) {
            return None;
        }
        self.finder.address(row)
    }

    pub fn type_of(&self, row: usize) -> crate::value::MemoryItemType {
        self.finder.item_type(row)
    }

    /// The raw current value at `row`, for callers that want the typed
    /// value rather than its formatted text.
    pub fn current_value(&self, row: usize) -> MemoryItem {
        self.finder.current_item(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AddressTranslation, CandidateRanges, GuestMemory};
    use crate::value::MemoryItemType;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    struct FakeMemory {
        data: StdMutex<Vec<u8>>,
    }

    impl FakeMemory {
        fn new(size: usize) -> Self {
            Self { data: StdMutex::new(vec![0u8; size]) }
        }
    }

    impl GuestMemory for FakeMemory {
        fn is_initialized(&self) -> bool {
            true
        }
        fn is_range_valid(&self, addr: u32, size: u32, _t: AddressTranslation) -> bool {
            (addr as usize + size as usize) <= self.data.lock().unwrap().len()
        }
        fn read(&self, dst: &mut [u8], addr: u32, size: u32, _t: AddressTranslation) -> bool {
            let data = self.data.lock().unwrap();
            let (s, e) = (addr as usize, addr as usize + size as usize);
            if e > data.len() {
                return false;
            }
            dst[..size as usize].copy_from_slice(&data[s..e]);
            true
        }
        fn write(&self, addr: u32, src: &[u8], size: u32, _t: AddressTranslation) -> bool {
            let mut data = self.data.lock().unwrap();
            let (s, e) = (addr as usize, addr as usize + size as usize);
            if e > data.len() {
                return false;
            }
            data[s..e].copy_from_slice(&src[..size as usize]);
            true
        }
    }

    fn wait_for_results(finder: &Finder) {
        for _ in 0..200 {
            if finder.new_results() {
                return;
            }
        }
        panic!("search never completed");
    }

    #[test]
    fn reports_rows_after_pulling_new_results() {
        let memory = Arc::new(FakeMemory::new(64));
        let finder = Arc::new(Finder::new(memory, CandidateRanges::gamecube(64, 0), None));
        let model = SearchModel::new(Arc::clone(&finder));
        assert_eq!(model.row_count(), 0);

        finder.search(MemoryItem::U8(0), None).unwrap();
        wait_for_results(&finder);
        assert!(model.new_results());
        assert_eq!(model.row_count(), 64);
        assert!(!model.is_overflow_row(0));
    }

    #[test]
    fn write_through_pokes_guest_memory() {
        let memory = Arc::new(FakeMemory::new(64));
        let finder = Arc::new(Finder::new(Arc::clone(&memory), CandidateRanges::gamecube(64, 0), None));
        let model = SearchModel::new(Arc::clone(&finder));

        finder.search(MemoryItem::U8(0), None).unwrap();
        wait_for_results(&finder);
        model.new_results();

        assert!(model.set(0, SearchColumn::Current, "7"));
        let mut buf = [0u8; 1];
        memory.read(&mut buf, 0, 1, AddressTranslation::Data);
        assert_eq!(buf[0], 7);
        assert_eq!(model.type_of(0), MemoryItemType::U8);
    }
}
