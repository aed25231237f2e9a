// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Typed memory values and the codec that moves them to and from guest RAM.
//!
//! Guest RAM is always big-endian; everything in here is responsible for
//! swapping to and from host-native order on the way through.

use common::numutil::NumExt;

use crate::memory::{AddressTranslation, GuestMemory};

/// A value read from (or about to be written to) guest memory, tagged
/// with its width. `Unspecified` stands in for "no value" — it carries a
/// `size` purely so call sites that only need the width of a failed read
/// don't have to special-case it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryItem {
    Unspecified { size: u32 },
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
}

impl MemoryItem {
    pub fn unspecified() -> Self {
        MemoryItem::Unspecified { size: 0 }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, MemoryItem::Unspecified { .. })
    }

    /// The discriminant matching this value's variant. Must stay in sync
    /// with [`MemoryItemType`]'s ordinals — a mismatch here breaks the
    /// round-trip property tests.
    pub fn item_type(&self) -> MemoryItemType {
        match self {
            MemoryItem::Unspecified { .. } => MemoryItemType::Unspecified,
            MemoryItem::U8(_) => MemoryItemType::U8,
            MemoryItem::U16(_) => MemoryItemType::U16,
            MemoryItem::U32(_) => MemoryItemType::U32,
            MemoryItem::U64(_) => MemoryItemType::U64,
        }
    }
}

impl Default for MemoryItem {
    fn default() -> Self {
        Self::unspecified()
    }
}

/// The set of value widths the search engine understands. Ordinals match
/// [`MemoryItem`]'s variant order exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryItemType {
    Unspecified = 0,
    U8 = 1,
    U16 = 2,
    U32 = 3,
    U64 = 4,
}

impl MemoryItemType {
    pub fn is_valid(self) -> bool {
        self != MemoryItemType::Unspecified
    }

    /// Long-form label ("Byte (8-bit)", ...), matching the original's
    /// `FRIENDLY_TYPE_NAMES` table.
    pub fn friendly_name(self) -> &'static str {
        friendly_type_name(self)
    }
}

impl std::fmt::Display for MemoryItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(type_name(*self))
    }
}

const ALL_TYPES: [MemoryItemType; 5] = [
    MemoryItemType::Unspecified,
    MemoryItemType::U8,
    MemoryItemType::U16,
    MemoryItemType::U32,
    MemoryItemType::U64,
];

pub fn type_name(t: MemoryItemType) -> &'static str {
    match t {
        MemoryItemType::Unspecified => "Unspecified",
        MemoryItemType::U8 => "Byte",
        MemoryItemType::U16 => "Short",
        MemoryItemType::U32 => "Long",
        MemoryItemType::U64 => "Quad",
    }
}

/// Longer form used anywhere a user-facing label is wanted.
pub fn friendly_type_name(t: MemoryItemType) -> &'static str {
    match t {
        MemoryItemType::Unspecified => "Unspecified",
        MemoryItemType::U8 => "Byte (8-bit)",
        MemoryItemType::U16 => "Short (16-bit)",
        MemoryItemType::U32 => "Long (32-bit)",
        MemoryItemType::U64 => "Quad (64-bit)",
    }
}

/// Case-insensitive inverse of [`type_name`]. Falls back to `Unspecified`
/// for anything unrecognized.
pub fn type_for_name(name: &str) -> MemoryItemType {
    ALL_TYPES
        .into_iter()
        .find(|t| type_name(*t).eq_ignore_ascii_case(name))
        .unwrap_or(MemoryItemType::Unspecified)
}

pub fn type_size(t: MemoryItemType) -> u32 {
    match t {
        MemoryItemType::Unspecified => 0,
        MemoryItemType::U8 => u8::WIDTH,
        MemoryItemType::U16 => u16::WIDTH,
        MemoryItemType::U32 => u32::WIDTH,
        MemoryItemType::U64 => u64::WIDTH,
    }
}

/// Reserved hook for a future native-alignment requirement; every type is
/// byte-aligned today.
pub fn type_alignment(_t: MemoryItemType) -> u32 {
    1
}

pub fn make_zero(t: MemoryItemType) -> MemoryItem {
    match t {
        MemoryItemType::Unspecified => MemoryItem::unspecified(),
        MemoryItemType::U8 => MemoryItem::U8(0),
        MemoryItemType::U16 => MemoryItem::U16(0),
        MemoryItemType::U32 => MemoryItem::U32(0),
        MemoryItemType::U64 => MemoryItem::U64(0),
    }
}

/// Parses a decimal unsigned integer of type `t`. Leading whitespace is
/// tolerated (matching how a stream extraction would skip it); anything
/// left over after the digits — including trailing whitespace — makes the
/// parse fail, as does a value out of range for `t`.
pub fn parse(text: &str, t: MemoryItemType) -> MemoryItem {
    if !t.is_valid() {
        return MemoryItem::unspecified();
    }

    let trimmed = text.trim_start();
    let digit_end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, rest) = trimmed.split_at(digit_end);
    if digits.is_empty() || !rest.is_empty() {
        return MemoryItem::unspecified();
    }

    let Ok(value) = digits.parse::<u64>() else {
        return MemoryItem::unspecified();
    };

    match t {
        MemoryItemType::U8 => u8::try_from(value)
            .map(MemoryItem::U8)
            .unwrap_or_else(|_| MemoryItem::unspecified()),
        MemoryItemType::U16 => u16::try_from(value)
            .map(MemoryItem::U16)
            .unwrap_or_else(|_| MemoryItem::unspecified()),
        MemoryItemType::U32 => u32::try_from(value)
            .map(MemoryItem::U32)
            .unwrap_or_else(|_| MemoryItem::unspecified()),
        MemoryItemType::U64 => MemoryItem::U64(value),
        MemoryItemType::Unspecified => unreachable!(),
    }
}

/// Renders a value back to decimal text. `None` for `Unspecified` — there
/// is nothing meaningful to show.
pub fn format(item: &MemoryItem) -> Option<String> {
    match item {
        MemoryItem::Unspecified { .. } => None,
        MemoryItem::U8(v) => Some(v.to_string()),
        MemoryItem::U16(v) => Some(v.to_string()),
        MemoryItem::U32(v) => Some(v.to_string()),
        MemoryItem::U64(v) => Some(v.to_string()),
    }
}

/// Reads a value of type `t` out of guest memory at `addr`, swapping from
/// big-endian. Returns `Unspecified` on any failure — uninitialized
/// memory, an unmapped range, or an unspecified type.
pub fn read(mem: &dyn GuestMemory, addr: u32, t: MemoryItemType, translation: AddressTranslation) -> MemoryItem {
    if !t.is_valid() || !mem.is_initialized() {
        return MemoryItem::unspecified();
    }
    match t {
        MemoryItemType::U8 => {
            let mut buf = [0u8; 1];
            if mem.read(&mut buf, addr, 1, translation) {
                MemoryItem::U8(buf[0])
            } else {
                MemoryItem::unspecified()
            }
        }
        MemoryItemType::U16 => {
            let mut buf = [0u8; 2];
            if mem.read(&mut buf, addr, 2, translation) {
                MemoryItem::U16(u16::from_be_bytes(buf))
            } else {
                MemoryItem::unspecified()
            }
        }
        MemoryItemType::U32 => {
            let mut buf = [0u8; 4];
            if mem.read(&mut buf, addr, 4, translation) {
                MemoryItem::U32(u32::from_be_bytes(buf))
            } else {
                MemoryItem::unspecified()
            }
        }
        MemoryItemType::U64 => {
            let mut buf = [0u8; 8];
            if mem.read(&mut buf, addr, 8, translation) {
                MemoryItem::U64(u64::from_be_bytes(buf))
            } else {
                MemoryItem::unspecified()
            }
        }
        MemoryItemType::Unspecified => MemoryItem::unspecified(),
    }
}

/// Writes `item` to guest memory at `addr`, swapping to big-endian. Fails
/// for an `Unspecified` item or if the guest rejects the write.
pub fn write(mem: &dyn GuestMemory, addr: u32, item: &MemoryItem, translation: AddressTranslation) -> bool {
    if !mem.is_initialized() {
        return false;
    }
    match item {
        MemoryItem::Unspecified { .. } => false,
        MemoryItem::U8(v) => mem.write(addr, &v.to_be_bytes(), 1, translation),
        MemoryItem::U16(v) => mem.write(addr, &v.to_be_bytes(), 2, translation),
        MemoryItem::U32(v) => mem.write(addr, &v.to_be_bytes(), 4, translation),
        MemoryItem::U64(v) => mem.write(addr, &v.to_be_bytes(), 8, translation),
    }
}
