// Copyright (c) 2024 Leela Aurelia, git@elia.garden
//
// Unless otherwise noted, this file is released and thus subject to the
// terms of the Mozilla Public License Version 2.0 (MPL-2.0) or the
// GNU General Public License Version 3 (GPL-3).
// If a copy of these licenses was not distributed with this file, you can
// obtain them at https://mozilla.org/MPL/2.0/ and http://www.gnu.org/licenses/.

//! The background memory scanner. A [`Finder`] owns one result set and
//! runs at most one worker thread at a time against it, the way the
//! render thread in a software PPU owns its framebuffer: the foreground
//! hands work off, polls for completion, and can ask for early exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SearchError;
use crate::memory::{AddressTranslation, CandidateRanges, GuestMemory};
use crate::range_cursor::{self, MemoryRange, RangeCursor};
use crate::value::{self, MemoryItem, MemoryItemType};

/// One matched address from a search, with its current and previous
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub address: u32,
    pub current: MemoryItem,
    pub previous: MemoryItem,
}

pub type ResultSet = Vec<SearchResult>;

/// Called periodically from the worker thread with a 0-100 percentage.
pub type ProgressFn = Box<dyn Fn(i32) + Send>;
/// Called whenever a new result set is published, from whichever thread
/// published it.
pub type ListenerFn = Box<dyn Fn() + Send + Sync>;

type Predicate = Box<dyn Fn(&MemoryItem) -> bool + Send + Sync>;

fn make_predicate(target: MemoryItem) -> Predicate {
    match target {
        MemoryItem::Unspecified { .. } => Box::new(|_: &MemoryItem| false),
        MemoryItem::U8(v) => Box::new(move |item: &MemoryItem| matches!(item, MemoryItem::U8(x) if *x == v)),
        MemoryItem::U16(v) => Box::new(move |item: &MemoryItem| matches!(item, MemoryItem::U16(x) if *x == v)),
        MemoryItem::U32(v) => Box::new(move |item: &MemoryItem| matches!(item, MemoryItem::U32(x) if *x == v)),
        MemoryItem::U64(v) => Box::new(move |item: &MemoryItem| matches!(item, MemoryItem::U64(x) if *x == v)),
    }
}

/// The domain a worker scans: either every aligned candidate address (a
/// fresh search) or the previous result set (a refinement).
enum ScanSource {
    Fresh { cursor: RangeCursor, stop: RangeCursor, total: i64 },
    Refine { results: ResultSet, idx: usize },
}

impl ScanSource {
    fn fresh(ranges: Arc<[MemoryRange]>, alignment: u32) -> Self {
        let cursor = RangeCursor::start(ranges.clone(), alignment);
        let stop = RangeCursor::end(ranges, alignment);
        let total = range_cursor::distance(&cursor, &stop);
        ScanSource::Fresh { cursor, stop, total }
    }

    fn refine(results: ResultSet) -> Self {
        ScanSource::Refine { results, idx: 0 }
    }

    fn is_fresh(&self) -> bool {
        matches!(self, ScanSource::Fresh { .. })
    }

    fn total(&self) -> i64 {
        match self {
            ScanSource::Fresh { total, .. } => *total,
            ScanSource::Refine { results, .. } => results.len() as i64,
        }
    }

    fn has_next(&self) -> bool {
        match self {
            ScanSource::Fresh { cursor, stop, .. } => cursor != stop,
            ScanSource::Refine { results, idx } => *idx < results.len(),
        }
    }

    /// Address and prior current value of the next candidate. Panics if
    /// called without checking [`Self::has_next`] first.
    fn next(&mut self) -> (u32, MemoryItem) {
        match self {
            ScanSource::Fresh { cursor, .. } => {
                let address = cursor.address();
                cursor.advance();
                (address, MemoryItem::unspecified())
            }
            ScanSource::Refine { results, idx } => {
                let result = results[*idx];
                *idx += 1;
                (result.address, result.current)
            }
        }
    }
}

struct ListenerRegistry {
    primary: Option<ListenerFn>,
    extra: Vec<(i64, ListenerFn)>,
    next_id: i64,
}

fn invoke_listeners(shared: &Shared) {
    let registry = shared.listeners.lock().unwrap();
    if let Some(primary) = &registry.primary {
        primary();
    }
    for (_, listener) in &registry.extra {
        listener();
    }
}

struct Shared {
    results: RwLock<ResultSet>,
    listeners: Mutex<ListenerRegistry>,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    result_rx: mpsc::Receiver<Option<ResultSet>>,
}

struct ThreadState {
    worker: Option<WorkerHandle>,
    cancel_flag: Arc<AtomicBool>,
    search_value_type: MemoryItemType,
}

/// A cancellable, progress-reporting background memory scanner.
///
/// At most one worker thread runs at a time; `search()` rejects
/// re-entrant calls with [`SearchError::SearchInProgress`] until the
/// previous one has been drained via [`Finder::new_results`]. Lock
/// ordering is fixed: whenever both are needed, `thread_guard` (the
/// worker's lifecycle lock) is always taken before `results` (the
/// result set's reader/writer lock) — never the reverse.
pub struct Finder {
    memory: Arc<dyn GuestMemory + Send + Sync>,
    ranges: CandidateRanges,
    shared: Arc<Shared>,
    thread: Mutex<ThreadState>,
}

impl Finder {
    pub fn new(
        memory: Arc<dyn GuestMemory + Send + Sync>,
        ranges: CandidateRanges,
        primary_listener: Option<ListenerFn>,
    ) -> Self {
        log::debug!("Finder::new(): creating with {} candidate ranges", ranges.regions.len());
        Self {
            memory,
            ranges,
            shared: Arc::new(Shared {
                results: RwLock::new(ResultSet::new()),
                listeners: Mutex::new(ListenerRegistry {
                    primary: primary_listener,
                    extra: Vec::new(),
                    next_id: 0,
                }),
            }),
            thread: Mutex::new(ThreadState {
                worker: None,
                cancel_flag: Arc::new(AtomicBool::new(false)),
                search_value_type: MemoryItemType::Unspecified,
            }),
        }
    }

    pub(crate) fn memory(&self) -> &dyn GuestMemory {
        self.memory.as_ref()
    }

    /// Starts a fresh search (if there are no current results) or a
    /// refinement of the current results (if there are). Returns as soon
    /// as the worker has taken its read lock on the result set, well
    /// before the scan itself completes; poll [`Finder::new_results`] for
    /// completion.
    pub fn search(&self, item: MemoryItem, progress: Option<ProgressFn>) -> Result<(), SearchError> {
        self.new_results();

        let mut thread_state = self.thread.lock().unwrap();
        let results_guard = self.shared.results.read().unwrap();

        if !item.is_valid() {
            return Err(SearchError::InvalidValue);
        }
        if !results_guard.is_empty() && item.item_type() != thread_state.search_value_type {
            return Err(SearchError::MismatchedValueType);
        }
        if !self.memory.is_initialized() {
            return Err(SearchError::MemoryNotInitialized);
        }

        let search_type = item.item_type();
        let source = if results_guard.is_empty() {
            let size = value::type_size(search_type);
            if size == 0 {
                return Err(SearchError::UnknownValueSize);
            }
            let alignment = value::type_alignment(search_type);

            let mut valid = Vec::new();
            for region in &self.ranges.regions {
                if region.size < size {
                    continue;
                }
                if !self
                    .memory
                    .is_range_valid(region.base, region.size, AddressTranslation::Data)
                {
                    continue;
                }
                let hi = region.base + (region.size - size);
                log::debug!("Finder::search(): candidate range {:#010x}-{:#010x}", region.base, hi);
                valid.push((region.base, hi));
            }
            if valid.is_empty() {
                return Err(SearchError::NoValidMemoryRanges);
            }
            ScanSource::fresh(Arc::from(valid), alignment)
        } else {
            ScanSource::refine(results_guard.clone())
        };

        if thread_state.worker.is_some() {
            return Err(SearchError::SearchInProgress);
        }

        thread_state.search_value_type = search_type;
        thread_state.cancel_flag.store(false, Ordering::SeqCst);

        let memory = Arc::clone(&self.memory);
        let shared = Arc::clone(&self.shared);
        let cancel_flag = Arc::clone(&thread_state.cancel_flag);
        let predicate = make_predicate(item);

        let (ack_tx, ack_rx) = mpsc::channel::<()>();
        let (result_tx, result_rx) = mpsc::channel::<Option<ResultSet>>();

        let join = thread::Builder::new()
            .name("cheat-finder".into())
            .spawn(move || run_search(memory, shared, cancel_flag, search_type, predicate, source, progress, ack_tx, result_tx))
            .expect("failed to spawn cheat-finder worker thread");

        drop(results_guard);
        ack_rx.recv().ok();
        thread_state.worker = Some(WorkerHandle { join, result_rx });

        Ok(())
    }

    /// Non-blocking, idempotent: asks the running worker to stop at its
    /// next progress checkpoint. Does nothing if no worker is running.
    pub fn cancel_search(&self) {
        let state = self.thread.lock().unwrap();
        if state.worker.is_some() {
            state.cancel_flag.store(true, Ordering::SeqCst);
        }
    }

    /// Polls for a finished worker, waiting up to 100ms. Returns `true`
    /// and publishes the new result set if the worker completed
    /// (successfully or by cancellation, in which case the previous
    /// results are left untouched); `false` if still running or if there
    /// is no worker at all.
    pub fn new_results(&self) -> bool {
        let mut state = self.thread.lock().unwrap();
        let Some(worker) = &state.worker else {
            return false;
        };

        match worker.result_rx.recv_timeout(Duration::from_millis(100)) {
            Ok(maybe_results) => {
                let published = maybe_results.is_some();
                if let Some(results) = maybe_results {
                    *self.shared.results.write().unwrap() = results;
                }
                self.join_worker(&mut state);
                published
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                log::error!("Finder::new_results(): worker channel disconnected without a result");
                self.join_worker(&mut state);
                false
            }
        }
    }

    /// Cancels any running worker and immediately publishes an empty
    /// result set through the normal listener-firing path. A worker that
    /// had already finished and queued its result before this call gets
    /// that result dropped here, so it can never be resurrected by a later
    /// [`Finder::new_results`]; a still-running worker (if any) is reaped
    /// the next time [`Finder::new_results`] or [`Finder::search`] runs.
    pub fn clear_results(&self) {
        let mut state = self.thread.lock().unwrap();
        if state.worker.is_some() {
            state.cancel_flag.store(true, Ordering::SeqCst);
        }
        if let Some(worker) = &state.worker {
            match worker.result_rx.try_recv() {
                // The worker had already queued a result; discard it and
                // reap the now-finished thread so state.worker reflects
                // reality instead of waiting for a disconnect later.
                Ok(_) => self.join_worker(&mut state),
                Err(mpsc::TryRecvError::Empty | mpsc::TryRecvError::Disconnected) => {}
            }
        }
        drop(state);

        self.shared.results.write().unwrap().clear();
        invoke_listeners(&self.shared);
    }

    pub fn result_count(&self) -> usize {
        self.shared.results.read().unwrap().len()
    }

    pub fn address(&self, row: usize) -> Option<u32> {
        self.shared.results.read().unwrap().get(row).map(|r| r.address)
    }

    /// The type locked in by the current result set. Ignores `row` — a
    /// single `Finder` only ever holds results of one type at a time.
    pub fn item_type(&self, _row: usize) -> MemoryItemType {
        self.thread.lock().unwrap().search_value_type
    }

    /// Re-reads `row`'s current value from guest memory, updates the
    /// stored result, and returns it.
    pub fn current_item(&self, row: usize) -> MemoryItem {
        let ty = self.thread.lock().unwrap().search_value_type;
        let mut results = self.shared.results.write().unwrap();
        let Some(result) = results.get_mut(row) else {
            return MemoryItem::unspecified();
        };
        result.current = value::read(self.memory.as_ref(), result.address, ty, AddressTranslation::Data);
        result.current
    }

    /// Same refresh as [`Self::current_item`], returning the value the
    /// address held before that refresh.
    pub fn previous_item(&self, row: usize) -> MemoryItem {
        let ty = self.thread.lock().unwrap().search_value_type;
        let mut results = self.shared.results.write().unwrap();
        let Some(result) = results.get_mut(row) else {
            return MemoryItem::unspecified();
        };
        result.current = value::read(self.memory.as_ref(), result.address, ty, AddressTranslation::Data);
        result.previous
    }

    /// Registers a listener invoked whenever a result set is published.
    /// Returns an id usable with [`Finder::unregister_listener`].
    pub fn register_listener(&self, listener: ListenerFn) -> i64 {
        let mut registry = self.shared.listeners.lock().unwrap();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.extra.push((id, listener));
        id
    }

    pub fn unregister_listener(&self, id: i64) {
        let mut registry = self.shared.listeners.lock().unwrap();
        let before = registry.extra.len();
        registry.extra.retain(|(listener_id, _)| *listener_id != id);
        if registry.extra.len() == before {
            log::error!("Finder::unregister_listener(): id {id} was not registered");
        }
    }

    fn join_worker(&self, state: &mut ThreadState) {
        let Some(worker) = state.worker.take() else {
            return;
        };
        if thread::current().id() == worker.join.thread().id() {
            log::error!("Finder::join_worker(): refusing to join the worker thread from itself");
            state.worker = Some(worker);
            return;
        }
        if worker.join.join().is_err() {
            log::error!("Finder::join_worker(): worker thread panicked");
        }
        state.cancel_flag.store(false, Ordering::SeqCst);
    }
}

impl Drop for Finder {
    fn drop(&mut self) {
        log::debug!("Finder::drop(): waiting for any running worker to exit");
        self.cancel_search();
        let mut state = self.thread.lock().unwrap();
        self.join_worker(&mut state);
    }
}

#[allow(clippy::too_many_arguments)]
fn run_search(
    memory: Arc<dyn GuestMemory + Send + Sync>,
    shared: Arc<Shared>,
    cancel_flag: Arc<AtomicBool>,
    search_type: MemoryItemType,
    predicate: Predicate,
    mut source: ScanSource,
    progress: Option<ProgressFn>,
    ack_tx: mpsc::Sender<()>,
    result_tx: mpsc::Sender<Option<ResultSet>>,
) {
    // Holding this for the whole scan is what makes a concurrent
    // `clear_results`/`new_results` on the other end of `shared.results`
    // safe: they only ever take the writer lock, which blocks until we
    // drop this.
    let results_guard = shared.results.read().unwrap();
    let _ = ack_tx.send(());

    let is_fresh = source.is_fresh();
    let total = source.total();
    let mut progress_count: i64 = 0;
    let mut next_update: i64 = if progress.is_some() { 0 } else { -1 };
    let mut percent: i32 = 0;
    let mut new_results = ResultSet::new();

    while source.has_next() {
        if progress_count == next_update {
            if cancel_flag.load(Ordering::SeqCst) {
                break;
            }
            if let Some(cb) = progress.as_ref() {
                cb(percent);
            }
            thread::yield_now();
            if cancel_flag.load(Ordering::SeqCst) {
                break;
            }
            // Matches Finder.cpp's `progress++` semantics: percent/next_update
            // are derived from the post-increment count, not the count of
            // items already processed, or next_update never advances past 0.
            let completed = progress_count + 1;
            percent = ((completed * 100 + (total - 1)) / total) as i32;
            next_update = (percent as i64 * total) / 100;
        }
        progress_count += 1;

        let (address, old_current) = source.next();
        let item = value::read(memory.as_ref(), address, search_type, AddressTranslation::Data);
        if !item.is_valid() || !predicate(&item) {
            continue;
        }
        let previous = if is_fresh { item } else { old_current };
        new_results.push(SearchResult { address, current: item, previous });
    }

    drop(results_guard);

    let cancelled = cancel_flag.load(Ordering::SeqCst);
    if let Some(cb) = progress.as_ref() {
        cb(if cancelled { 0 } else { 100 });
    }

    let payload = if cancelled { None } else { Some(new_results) };
    let _ = result_tx.send(payload);

    invoke_listeners(&shared);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
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

        fn set(self: &Arc<Self>, addr: u32, bytes: &[u8]) {
            let mut data = self.data.lock().unwrap();
            data[addr as usize..addr as usize + bytes.len()].copy_from_slice(bytes);
        }
    }

    impl GuestMemory for FakeMemory {
        fn is_initialized(&self) -> bool {
            self.initialized.load(Ordering::SeqCst)
        }

        fn is_range_valid(&self, addr: u32, size: u32, _translation: AddressTranslation) -> bool {
            (addr as usize + size as usize) <= self.data.lock().unwrap().len()
        }

        fn read(&self, dst: &mut [u8], addr: u32, size: u32, _translation: AddressTranslation) -> bool {
            let data = self.data.lock().unwrap();
            let start = addr as usize;
            let end = start + size as usize;
            if end > data.len() {
                return false;
            }
            dst[..size as usize].copy_from_slice(&data[start..end]);
            true
        }

        fn write(&self, addr: u32, src: &[u8], size: u32, _translation: AddressTranslation) -> bool {
            let mut data = self.data.lock().unwrap();
            let start = addr as usize;
            let end = start + size as usize;
            if end > data.len() {
                return false;
            }
            data[start..end].copy_from_slice(&src[..size as usize]);
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

    fn candidate_ranges(size: u32) -> CandidateRanges {
        CandidateRanges::gamecube(size, 0)
    }

    #[test]
    fn fresh_search_finds_every_match() {
        let memory = Arc::new(FakeMemory::new(64));
        memory.set(0x10, &0xDEADBEEFu32.to_be_bytes());
        memory.set(0x20, &0xDEADBEEFu32.to_be_bytes());
        let finder = Finder::new(memory, candidate_ranges(64), None);

        finder.search(MemoryItem::U32(0xDEADBEEF), None).unwrap();
        wait_for_results(&finder);

        let mut addresses: Vec<u32> = (0..finder.result_count()).filter_map(|i| finder.address(i)).collect();
        addresses.sort_unstable();
        assert_eq!(addresses, vec![0x10, 0x20]);
    }

    #[test]
    fn refinement_narrows_the_previous_result_set() {
        let memory = Arc::new(FakeMemory::new(64));
        memory.set(0x10, &0xDEADBEEFu32.to_be_bytes());
        memory.set(0x20, &0xCAFEF00Du32.to_be_bytes());
        let finder = Finder::new(Arc::clone(&memory), candidate_ranges(64), None);

        finder.search(MemoryItem::U32(0xDEADBEEF), None).unwrap();
        wait_for_results(&finder);
        assert_eq!(finder.result_count(), 1);

        memory.set(0x10, &0xDEADBEEFu32.to_be_bytes());
        finder.search(MemoryItem::U32(0xDEADBEEF), None).unwrap();
        wait_for_results(&finder);
        assert_eq!(finder.result_count(), 1);
        assert_eq!(finder.address(0), Some(0x10));
    }

    #[test]
    fn search_in_progress_is_rejected_until_drained() {
        let memory = Arc::new(FakeMemory::new(64));
        let finder = Finder::new(memory, candidate_ranges(64), None);

        let gate = Arc::new(AtomicU32::new(0));
        let gate_clone = Arc::clone(&gate);
        finder
            .search(
                MemoryItem::U8(0),
                Some(Box::new(move |_| {
                    gate_clone.store(1, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let err = finder.search(MemoryItem::U8(0), None).unwrap_err();
        assert_eq!(err, SearchError::SearchInProgress);

        wait_for_results(&finder);
    }

    #[test]
    fn cancel_search_leaves_prior_results_unchanged() {
        let memory = Arc::new(FakeMemory::new(64));
        memory.set(0x10, &0xAAu8.to_be_bytes());
        let finder = Finder::new(memory, candidate_ranges(64), None);

        finder.search(MemoryItem::U8(0xAA), None).unwrap();
        wait_for_results(&finder);
        assert_eq!(finder.result_count(), 1);

        finder.search(MemoryItem::U8(0xAA), None).unwrap();
        finder.cancel_search();
        wait_for_results(&finder);
        assert_eq!(finder.result_count(), 1);
    }

    #[test]
    fn clear_results_is_idempotent_and_fires_listeners() {
        let memory = Arc::new(FakeMemory::new(64));
        memory.set(0x10, &0xAAu8.to_be_bytes());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = Arc::clone(&calls);
        let finder = Finder::new(
            memory,
            candidate_ranges(64),
            Some(Box::new(move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            })),
        );

        finder.search(MemoryItem::U8(0xAA), None).unwrap();
        wait_for_results(&finder);
        assert_eq!(finder.result_count(), 1);

        finder.clear_results();
        finder.clear_results();
        assert_eq!(finder.result_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn mismatched_type_is_rejected() {
        let memory = Arc::new(FakeMemory::new(64));
        memory.set(0x10, &0xAAu8.to_be_bytes());
        let finder = Finder::new(memory, candidate_ranges(64), None);

        finder.search(MemoryItem::U8(0xAA), None).unwrap();
        wait_for_results(&finder);

        let err = finder.search(MemoryItem::U32(1), None).unwrap_err();
        assert_eq!(err, SearchError::MismatchedValueType);
    }
}
