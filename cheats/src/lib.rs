// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The cheat-search engine: a background memory scanner ([`Finder`]) plus
//! a pinned-entry tree ([`CheatEntryTree`]), wired together by
//! [`ManagerCore`]. None of this crate knows about windowing, a concrete
//! console's memory map, or persistence — see [`memory::GuestMemory`] and
//! [`memory::CandidateRanges`] for the seams a frontend fills in.

pub mod cheat_tree;
pub mod error;
pub mod finder;
pub mod manager;
pub mod memory;
pub mod range_cursor;
pub mod search_model;
pub mod value;

pub use cheat_tree::{CheatEntry, CheatEntryTree, Column, ColumnValue, EntryData, EntryId};
pub use error::SearchError;
pub use finder::{Finder, ListenerFn, ProgressFn, ResultSet, SearchResult};
pub use manager::ManagerCore;
pub use memory::{AddressTranslation, CandidateRanges, GuestMemory, RamRegion};
pub use search_model::{SearchColumn, SearchModel};
pub use value::{MemoryItem, MemoryItemType};
