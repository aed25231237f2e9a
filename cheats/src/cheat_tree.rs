// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The pinned cheat-entry table: a tree of entries, some of which (the
//! leaves) carry a live, optionally locked memory value.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::memory::{AddressTranslation, GuestMemory};
use crate::value::{self, MemoryItem, MemoryItemType};

/// Opaque, monotonically increasing handle to a tree entry. Never reused,
/// even after the entry it named has been deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

/// The editable columns of a cheat entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    Name,
    Description,
    Address,
    Type,
    Value,
    Locked,
}

/// A column's rendered value, typed just enough for callers to format it
/// without round-tripping through text first.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Text(String),
    Bool(bool),
}

/// The live-memory half of a leaf entry. Container ("header") entries
/// have none.
#[derive(Debug, Clone, Copy)]
pub struct EntryData {
    pub address: u32,
    pub item_type: MemoryItemType,
    pub content: MemoryItem,
    pub locked: bool,
}

#[derive(Debug, Clone)]
pub struct CheatEntry {
    pub parent: Option<EntryId>,
    pub name: String,
    pub description: String,
    pub data: Option<EntryData>,
}

impl CheatEntry {
    pub fn is_container(&self) -> bool {
        self.data.is_none()
    }
}

struct TreeState {
    entries: HashMap<EntryId, CheatEntry>,
    children: HashMap<Option<EntryId>, Vec<EntryId>>,
}

/// An arena-backed tree of cheat entries, keyed by [`EntryId`]. Every
/// leaf's value can be read, edited, or locked (continuously written
/// back by [`CheatEntryTree::tick_locked_entries`]).
pub struct CheatEntryTree {
    memory: Arc<dyn GuestMemory + Send + Sync>,
    next_id: AtomicU64,
    state: Mutex<TreeState>,
}

impl CheatEntryTree {
    pub fn new(memory: Arc<dyn GuestMemory + Send + Sync>) -> Self {
        Self {
            memory,
            next_id: AtomicU64::new(1),
            state: Mutex::new(TreeState {
                entries: HashMap::new(),
                children: HashMap::new(),
            }),
        }
    }

    /// Appends a leaf under the root with a default name, an empty
    /// description, and an unlocked value of `item_type` at `address`.
    pub fn add_entry(&self, address: u32, item_type: MemoryItemType) -> EntryId {
        let id = EntryId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let entry = CheatEntry {
            parent: None,
            name: String::from("New cheat"),
            description: String::new(),
            data: Some(EntryData {
                address,
                item_type,
                content: MemoryItem::unspecified(),
                locked: false,
            }),
        };

        let mut state = self.state.lock().unwrap();
        state.entries.insert(id, entry);
        state.children.entry(None).or_default().push(id);
        log::debug!("CheatEntryTree::add_entry(): added {id:?} at {address:#010x}");
        id
    }

    /// Removes `id`. Any children `id` had are promoted to `id`'s own
    /// parent rather than orphaned, fixing the original engine's
    /// `DeleteEntry` (which left them unreachable).
    pub fn delete_entry(&self, id: EntryId) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.entries.remove(&id) else {
            return false;
        };
        let parent = entry.parent;

        if let Some(siblings) = state.children.get_mut(&parent) {
            siblings.retain(|sibling| *sibling != id);
        }

        if let Some(mut orphans) = state.children.remove(&Some(id)) {
            for child in &orphans {
                if let Some(child_entry) = state.entries.get_mut(child) {
                    child_entry.parent = parent;
                }
            }
            state.children.entry(parent).or_default().append(&mut orphans);
        }

        log::debug!("CheatEntryTree::delete_entry(): removed {id:?}");
        true
    }

    pub fn parent(&self, id: EntryId) -> Option<EntryId> {
        self.state.lock().unwrap().entries.get(&id)?.parent
    }

    pub fn get_children(&self, id: Option<EntryId>) -> Vec<EntryId> {
        self.state.lock().unwrap().children.get(&id).cloned().unwrap_or_default()
    }

    pub fn is_container(&self, id: Option<EntryId>) -> bool {
        let state = self.state.lock().unwrap();
        match id {
            None => true,
            Some(id) => state.entries.get(&id).is_some_and(CheatEntry::is_container),
        }
    }

    /// Reads column `column` of entry `id`. `None` if `id` doesn't exist,
    /// or if the column has nothing to show (e.g. address/type/value on a
    /// container entry).
    pub fn get(&self, id: EntryId, column: Column) -> Option<ColumnValue> {
        let mut state = self.state.lock().unwrap();
        let entry = state.entries.get_mut(&id)?;
        match column {
            Column::Name => Some(ColumnValue::Text(entry.name.clone())),
            Column::Description => Some(ColumnValue::Text(entry.description.clone())),
            Column::Address => entry.data.map(|d| ColumnValue::Text(format!("{:#010x}", d.address))),
            Column::Type => entry
                .data
                .filter(|d| d.item_type.is_valid())
                .map(|d| ColumnValue::Text(value::type_name(d.item_type).to_string())),
            Column::Locked => entry.data.map(|d| ColumnValue::Bool(d.locked)),
            Column::Value => {
                let data = entry.data.as_mut()?;
                if !data.item_type.is_valid() {
                    return None;
                }
                if !data.locked {
                    data.content = value::read(self.memory.as_ref(), data.address, data.item_type, AddressTranslation::Data);
                }
                if data.content.is_valid() {
                    value::format(&data.content).map(ColumnValue::Text)
                } else {
                    Some(ColumnValue::Text("<invalid>".to_string()))
                }
            }
        }
    }

    /// Writes column `column` of entry `id`. Returns whether the write
    /// took effect; see [`CheatEntryTree::enabled`] for which columns are
    /// writable in the first place.
    pub fn set(&self, id: EntryId, column: Column, value: ColumnValue) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get_mut(&id) else {
            return false;
        };
        match (column, value) {
            (Column::Name, ColumnValue::Text(text)) => {
                entry.name = text;
                true
            }
            (Column::Description, ColumnValue::Text(text)) => {
                entry.description = text;
                true
            }
            (Column::Type, ColumnValue::Text(text)) => {
                let Some(data) = entry.data.as_mut() else {
                    return false;
                };
                let new_type = crate::value::type_for_name(&text);
                if !new_type.is_valid() {
                    return false;
                }
                if new_type != data.item_type {
                    data.item_type = new_type;
                    data.content = value::make_zero(new_type);
                }
                true
            }
            (Column::Value, ColumnValue::Text(text)) => {
                let Some(data) = entry.data.as_mut() else {
                    return false;
                };
                if !data.item_type.is_valid() {
                    return false;
                }
                let content = value::parse(&text, data.item_type);
                if !content.is_valid() {
                    return false;
                }
                if !data.locked && !value::write(self.memory.as_ref(), data.address, &content, AddressTranslation::Data) {
                    return false;
                }
                data.content = content;
                true
            }
            (Column::Locked, ColumnValue::Bool(lock)) => {
                let Some(data) = entry.data.as_mut() else {
                    return false;
                };
                Self::set_locked(self.memory.as_ref(), data, lock)
            }
            _ => false,
        }
    }

    fn set_locked(memory: &dyn GuestMemory, data: &mut EntryData, lock: bool) -> bool {
        if !data.item_type.is_valid() {
            return false;
        }
        if !lock {
            data.locked = false;
            return true;
        }
        if data.locked {
            return true;
        }
        let content = value::read(memory, data.address, data.item_type, AddressTranslation::Data);
        if !content.is_valid() {
            return false;
        }
        data.content = content;
        data.locked = true;
        true
    }

    /// Whether `column` can be edited on `id` right now: name and
    /// description always can; address only on a leaf; type, value, and
    /// locked only on a leaf with a valid type.
    pub fn enabled(&self, id: EntryId, column: Column) -> bool {
        let state = self.state.lock().unwrap();
        let Some(entry) = state.entries.get(&id) else {
            return false;
        };
        match column {
            Column::Name | Column::Description => true,
            Column::Address => entry.data.is_some(),
            Column::Type | Column::Value | Column::Locked => entry.data.is_some_and(|d| d.item_type.is_valid()),
        }
    }

    /// Writes every locked entry's stored value back to guest memory.
    /// Called periodically by the owner of this tree; failures are
    /// swallowed and retried on the next tick.
    pub fn tick_locked_entries(&self) {
        let state = self.state.lock().unwrap();
        for entry in state.entries.values() {
            let Some(data) = &entry.data else { continue };
            if data.locked && data.item_type.is_valid() {
                let _ = value::write(self.memory.as_ref(), data.address, &data.content, AddressTranslation::Data);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    struct FakeMemory {
        data: StdMutex<Vec<u8>>,
        initialized: AtomicBool,
    }

    impl FakeMemory {
        fn new(size: usize) -> Self {
            Self {
                data: StdMutex::new(vec![0u8; size]),
                initialized: AtomicBool::new(true),
            }
        }
    }

    impl GuestMemory for FakeMemory {
        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
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

    #[test]
    fn add_and_delete_round_trip() {
        let tree = CheatEntryTree::new(Arc::new(FakeMemory::new(64)));
        let id = tree.add_entry(0x10, MemoryItemType::U32);
        assert_eq!(tree.get_children(None), vec![id]);
        assert!(tree.delete_entry(id));
        assert_eq!(tree.get_children(None), Vec::<EntryId>::new());
        assert!(!tree.delete_entry(id));
    }

    #[test]
    fn delete_promotes_children_to_grandparent() {
        let tree = CheatEntryTree::new(Arc::new(FakeMemory::new(64)));
        let parent = tree.add_entry(0x10, MemoryItemType::U32);
        let child = tree.add_entry(0x14, MemoryItemType::U8);
        {
            let mut state = tree.state.lock().unwrap();
            state.children.get_mut(&None).unwrap().retain(|e| *e != child);
            state.children.entry(Some(parent)).or_default().push(child);
            state.entries.get_mut(&child).unwrap().parent = Some(parent);
        }

        assert!(tree.delete_entry(parent));
        assert_eq!(tree.parent(child), None);
        assert_eq!(tree.get_children(None), vec![child]);
    }

    #[test]
    fn locked_value_writes_back_on_tick() {
        let memory = Arc::new(FakeMemory::new(64));
        let tree = CheatEntryTree::new(Arc::clone(&memory) as Arc<dyn GuestMemory + Send + Sync>);
        let id = tree.add_entry(0x10, MemoryItemType::U8);

        assert!(tree.set(id, Column::Value, ColumnValue::Text("5".into())));
        assert!(tree.set(id, Column::Locked, ColumnValue::Bool(true)));

        memory.write(0x10, &[0u8], 1, AddressTranslation::Data);
        tree.tick_locked_entries();

        let mut buf = [0u8; 1];
        memory.read(&mut buf, 0x10, 1, AddressTranslation::Data);
        assert_eq!(buf[0], 5);
    }

    #[test]
    fn disabled_columns_reject_unspecified_leaves() {
        let tree = CheatEntryTree::new(Arc::new(FakeMemory::new(64)));
        let id = tree.add_entry(0x10, MemoryItemType::Unspecified);
        assert!(!tree.enabled(id, Column::Value));
        assert!(!tree.set(id, Column::Value, ColumnValue::Text("1".into())));
        assert!(tree.enabled(id, Column::Name));
    }
}
