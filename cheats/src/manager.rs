// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Wires a single [`Finder`] and [`CheatEntryTree`] together behind the one
//! coupling point the two actually need: turning an activated search-result
//! row into a pinned cheat entry.

use std::sync::Arc;

use crate::cheat_tree::{CheatEntryTree, EntryId};
use crate::finder::{Finder, ListenerFn};
use crate::memory::{CandidateRanges, GuestMemory};
use crate::search_model::SearchModel;

/// Owns exactly one [`Finder`] and one [`CheatEntryTree`] against the same
/// guest memory. Nothing else couples the two — a frontend is free to
/// drive either independently.
pub struct ManagerCore {
    finder: Arc<Finder>,
    search_model: SearchModel,
    tree: CheatEntryTree,
}

impl ManagerCore {
    pub fn new(memory: Arc<dyn GuestMemory + Send + Sync>, ranges: CandidateRanges, primary_listener: Option<ListenerFn>) -> Self {
        let finder = Arc::new(Finder::new(Arc::clone(&memory), ranges, primary_listener));
        let search_model = SearchModel::new(Arc::clone(&finder));
        let tree = CheatEntryTree::new(memory);
        Self { finder, search_model, tree }
    }

    pub fn finder(&self) -> &Arc<Finder> {
        &self.finder
    }

    pub fn search_model(&self) -> &SearchModel {
        &self.search_model
    }

    pub fn tree(&self) -> &CheatEntryTree {
        &self.tree
    }

    /// The "activate row -> add cheat entry" signal: pins `row` of the
    /// current search results as a new cheat entry. `None` if `row` is out
    /// of range or the synthetic overflow row.
    pub fn activate_row(&self, row: usize) -> Option<EntryId> {
        let address = self.search_model.address_of(row)?;
        let item_type = self.search_model.type_of(row);
        Some(self.tree.add_entry(address, item_type))
    }
}
