// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! Errors [`crate::Finder::search`] can return before it ever spawns a
//! worker.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SearchError {
    #[error("search value is not a valid memory item")]
    InvalidValue,
    #[error("search value's type does not match the type already locked in by the current results")]
    MismatchedValueType,
    #[error("guest memory has not been initialized yet")]
    MemoryNotInitialized,
    #[error("the requested memory item type has no well-defined size")]
    UnknownValueSize,
    #[error("none of the candidate memory ranges are currently mapped")]
    NoValidMemoryRanges,
    #[error("a search is already in progress")]
    SearchInProgress,
}
