//! Rollback segment manager (component C): owns a rollback segment's
//! header page, the undo log segments hanging off it, and the per-type
//! cached-undo-segment free lists used to avoid allocating a fresh segment
//! for every transaction.
//!
//! Grounded on `trx0rseg.c`/`trx0rseg.h`: `trx_rseg_header_create`,
//! `trx_rseg_find_free`, `trx_undo_assign_undo`'s cached-segment path, and
//! `trx_purge_add_update_undo_to_history`'s history-list bookkeeping.

use std::collections::VecDeque;

use crate::innodb::constants::{reuse_limit, N_SLOTS};
use crate::innodb::store::{PageStore, NO_PAGE};
use crate::innodb::undo_page::{self, UndoPageHeader, UndoPageType, UndoSegmentHeader, UndoState};
use crate::EngineError;

/// Stable handle to a rollback segment within the engine (§9: arena index,
/// not a pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RsegId(pub u8);

/// Stable handle to an undo log segment: which rollback segment it belongs
/// to, and its header page number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UndoId {
    pub rseg: RsegId,
    pub header_page: u32,
}

/// In-memory representation of a rollback segment: its own header page
/// plus the bookkeeping InnoDB keeps purely in memory after reading the
/// on-disk segment (cached free lists, history list, diagnostic fields).
pub struct RollbackSegment {
    pub id: RsegId,
    pub header_page: u32,
    /// Segments in `TRX_UNDO_CACHED` state, ready for instant reuse,
    /// separated by undo type since an insert-undo and an update-undo
    /// segment are not interchangeable.
    insert_cached: VecDeque<u32>,
    update_cached: VecDeque<u32>,
    /// History list: update-undo segment header pages containing
    /// committed-but-not-yet-purged transactions, ordered oldest first.
    history_list: VecDeque<u32>,
    /// Opaque per-rseg passthrough block (binlog position / WSREP XID),
    /// never interpreted by this engine. Grounded on `trx0rseg.h`'s
    /// `TRX_RSEG_*_BINLOG_*`/`TRX_RSEG_WSREP_XID_*` fields.
    pub opaque: Vec<u8>,
    /// Highest trx_no ever pushed onto this segment's history list,
    /// purely diagnostic (`trx0rseg.h`'s `max_trx_id`).
    pub max_trx_id: u64,
    /// Current size of the segment's owned pages, in pages.
    pub curr_size: u32,
    /// The rseg's own fixed `N_SLOTS` undo-segment array (`trx_rseg_t`'s
    /// `undo_slots`): every undo segment this rseg owns, in any state
    /// (ACTIVE, CACHED, TO_PURGE, PREPARED), keyed by slot number so crash
    /// recovery can enumerate them without already knowing which ones are
    /// cached or on the history list.
    slots: Vec<Option<u32>>,
}

const RSEG_OPAQUE_SIZE: usize = 128;

impl RollbackSegment {
    /// `create_rseg_header`: allocate a fresh header page for rollback
    /// segment `id` and initialize it empty.
    pub fn create(
        id: RsegId,
        store: &mut dyn PageStore,
    ) -> Result<Self, EngineError> {
        let header_page = store.allocate_page()?;
        let mut rseg = RollbackSegment {
            id,
            header_page,
            insert_cached: VecDeque::new(),
            update_cached: VecDeque::new(),
            history_list: VecDeque::new(),
            opaque: vec![0u8; RSEG_OPAQUE_SIZE],
            max_trx_id: 0,
            curr_size: 1,
            slots: vec![None; N_SLOTS],
        };
        rseg.flush(store)?;
        Ok(rseg)
    }

    fn flush(&self, _store: &mut dyn PageStore) -> Result<(), EngineError> {
        // The header page itself carries no engine-interpreted fields beyond
        // what TrxSysPage already tracks (slot -> header_page); the cached
        // lists and history list are reconstructed from segment headers on
        // recovery (see `recover_from_store`), so there is nothing further
        // to persist here today.
        Ok(())
    }

    /// `create_undo_segment`: allocate and initialize a brand-new undo log
    /// segment of the given type, returning its header page number.
    pub fn create_undo_segment(
        &mut self,
        undo_type: UndoPageType,
        store: &mut dyn PageStore,
    ) -> Result<u32, EngineError> {
        let slot = self
            .find_free_undo_slot()
            .ok_or(EngineError::TooManyConcurrentTrxs)?;
        let page_no = store.allocate_page()?;
        let mut page = store.read_page(page_no)?;
        undo_page::page_init(&mut page, undo_type, undo_page::TRX_UNDO_SEG_HDR_SIZE);
        UndoSegmentHeader {
            state: UndoState::Active,
            last_log: 0,
        }
        .write(&mut page);
        store.write_page(page_no, &page)?;
        self.slots[slot] = Some(page_no);
        Ok(page_no)
    }

    /// First unoccupied undo-segment slot in this rseg's fixed array.
    pub fn find_free_undo_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.is_none())
    }

    /// Release the slot belonging to `header_page` once its segment is
    /// freed entirely (TO_FREE finalized, or TO_PURGE fully purged and
    /// truncated).
    pub fn release_undo_slot(&mut self, header_page: u32) {
        if let Some(slot) = self.slots.iter().position(|s| *s == Some(header_page)) {
            self.slots[slot] = None;
        }
    }

    /// Every occupied undo-segment slot, as `(slot_no, header_page)` — the
    /// enumeration crash recovery walks to rebuild in-memory undo objects
    /// regardless of whether they were also indexed on a cache or history
    /// list.
    pub fn occupied_undo_slots(&self) -> impl Iterator<Item = (usize, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|p| (i, p)))
    }

    /// `add_page`: grow a segment by one page when its last page runs out
    /// of room. Always succeeds or returns `OutOfFileSpace`.
    pub fn add_page(&mut self, store: &mut dyn PageStore) -> Result<u32, EngineError> {
        let page_no = store.allocate_page()?;
        self.curr_size += 1;
        Ok(page_no)
    }

    /// `free_page`: return a page that is no longer referenced by any undo
    /// record to the store.
    pub fn free_page(&mut self, page_no: u32, store: &mut dyn PageStore) -> Result<(), EngineError> {
        store.free_page(page_no)?;
        self.curr_size = self.curr_size.saturating_sub(1);
        Ok(())
    }

    /// `find_free_slot`/cached-segment lookup: pop a reusable cached
    /// segment of the requested type, if one's `page_free` is still below
    /// the reuse limit for this page size. The caller re-checks
    /// `page_free` itself (the cache only records the page number); stale
    /// segments that no longer qualify are simply dropped rather than
    /// reused, matching `trx_undo_assign_undo`'s re-validation.
    pub fn pop_cached(
        &mut self,
        undo_type: UndoPageType,
        page_size: u32,
        store: &mut dyn PageStore,
    ) -> Result<Option<u32>, EngineError> {
        let list = match undo_type {
            UndoPageType::Insert => &mut self.insert_cached,
            _ => &mut self.update_cached,
        };
        let limit = reuse_limit(page_size);
        while let Some(page_no) = list.pop_front() {
            let page = store.read_page(page_no)?;
            if let Some(hdr) = UndoPageHeader::parse(&page) {
                if hdr.free < limit {
                    return Ok(Some(page_no));
                }
            }
            // No longer eligible; let it be picked up by ordinary recovery
            // scanning instead of re-caching it here.
        }
        Ok(None)
    }

    /// Push a freshly emptied (commit-rolled-back insert, or freed update)
    /// segment onto the appropriate per-type cache.
    pub fn push_cached(&mut self, undo_type: UndoPageType, header_page: u32) {
        match undo_type {
            UndoPageType::Insert => self.insert_cached.push_back(header_page),
            _ => self.update_cached.push_back(header_page),
        }
    }

    /// `history_list_add`/`trx_purge_add_update_undo_to_history`: append a
    /// committed update-undo segment to the tail of the history list and
    /// bump the diagnostic `max_trx_id`.
    pub fn history_list_add(&mut self, header_page: u32, trx_no: u64) {
        self.history_list.push_back(header_page);
        if trx_no > self.max_trx_id {
            self.max_trx_id = trx_no;
        }
    }

    /// `truncate_history`: remove fully-purged segments from the head of
    /// the history list, freeing the segment's header page and releasing
    /// its undo-slot back to the rseg.
    ///
    /// This engine's codec does not persist a segment's full page list to
    /// disk (see [`crate::undo::log::UndoLog::pages`], which is in-memory
    /// only), so a history-list segment is assumed to already be down to
    /// its single header page by the time it is fully purged — true for
    /// every segment this engine ever caches or history-links, since those
    /// are reusability-gated to `size == 1`. A segment that grew past one
    /// page and was never shrunk back down (`ToPurge` via a non-reusable
    /// multi-page log) would leak its extra pages here; `is_fully_purged`
    /// callers are expected to have already reclaimed those via
    /// [`crate::trx::rollback::truncate_end`]-style tail freeing during
    /// ordinary rollback/purge traversal before the segment's record count
    /// reaches zero.
    pub fn truncate_history<F>(&mut self, mut is_fully_purged: F, store: &mut dyn PageStore)
    where
        F: FnMut(u32) -> bool,
    {
        while let Some(&head) = self.history_list.front() {
            if is_fully_purged(head) {
                self.history_list.pop_front();
                let _ = store.free_page(head);
                self.curr_size = self.curr_size.saturating_sub(1);
                self.release_undo_slot(head);
            } else {
                break;
            }
        }
    }

    pub fn history_list_len(&self) -> usize {
        self.history_list.len()
    }

    pub fn history_list_iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.history_list.iter().copied()
    }

    pub fn opaque_block(&self) -> &[u8] {
        &self.opaque
    }

    pub fn set_opaque_block(&mut self, data: &[u8]) {
        let n = data.len().min(self.opaque.len());
        self.opaque[..n].copy_from_slice(&data[..n]);
    }
}

/// A collection of rollback segments, indexed by `RsegId`, matching the
/// fixed `N_RSEGS`-slot array the transaction system page carries.
pub struct RollbackSegmentSet {
    segments: Vec<Option<RollbackSegment>>,
}

impl RollbackSegmentSet {
    pub fn new(n_rsegs: usize) -> Self {
        let mut segments = Vec::with_capacity(n_rsegs);
        segments.resize_with(n_rsegs, || None);
        RollbackSegmentSet { segments }
    }

    /// `find_free_slot`: the first unoccupied rollback-segment slot.
    pub fn find_free_slot(&self) -> Option<RsegId> {
        self.segments
            .iter()
            .position(|s| s.is_none())
            .map(|i| RsegId(i as u8))
    }

    pub fn create(&mut self, id: RsegId, store: &mut dyn PageStore) -> Result<(), EngineError> {
        let rseg = RollbackSegment::create(id, store)?;
        self.segments[id.0 as usize] = Some(rseg);
        Ok(())
    }

    pub fn get(&self, id: RsegId) -> Option<&RollbackSegment> {
        self.segments[id.0 as usize].as_ref()
    }

    pub fn get_mut(&mut self, id: RsegId) -> Option<&mut RollbackSegment> {
        self.segments[id.0 as usize].as_mut()
    }

    /// Round-robin choice among occupied slots, matching
    /// `trx_assign_rseg`'s load-spreading policy (no weighting by current
    /// load; a future refinement could track active-undo counts).
    pub fn assign_round_robin(&self, last: Option<RsegId>) -> Option<RsegId> {
        let n = self.segments.len();
        if n == 0 {
            return None;
        }
        let start = last.map(|r| r.0 as usize + 1).unwrap_or(0) % n;
        (0..n)
            .map(|i| (start + i) % n)
            .find(|&i| self.segments[i].is_some())
            .map(|i| RsegId(i as u8))
    }

    pub fn occupied(&self) -> impl Iterator<Item = RsegId> + '_ {
        self.segments
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| RsegId(i as u8))
    }

    /// Every occupied segment, mutably, paired with its id — the shape the
    /// purge engine's min-heap wants so it can look up any rseg by id
    /// mid-pass.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (RsegId, &mut RollbackSegment)> + '_ {
        self.segments
            .iter_mut()
            .enumerate()
            .filter_map(|(i, s)| s.as_mut().map(|r| (RsegId(i as u8), r)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::store::InMemoryPageStore;

    #[test]
    fn find_free_slot_returns_first_unoccupied() {
        let mut set = RollbackSegmentSet::new(4);
        let mut store = InMemoryPageStore::new(16384);
        set.create(RsegId(0), &mut store).unwrap();
        set.create(RsegId(1), &mut store).unwrap();
        assert_eq!(set.find_free_slot(), Some(RsegId(2)));
    }

    #[test]
    fn create_undo_segment_initializes_active_state() {
        let mut store = InMemoryPageStore::new(16384);
        let mut rseg = RollbackSegment::create(RsegId(0), &mut store).unwrap();
        let page_no = rseg
            .create_undo_segment(UndoPageType::Insert, &mut store)
            .unwrap();
        let page = store.read_page(page_no).unwrap();
        let seg_hdr = UndoSegmentHeader::parse(&page).unwrap();
        assert_eq!(seg_hdr.state, UndoState::Active);
        let page_hdr = UndoPageHeader::parse(&page).unwrap();
        assert_eq!(page_hdr.page_type, UndoPageType::Insert);
    }

    #[test]
    fn cached_segment_below_limit_is_reused_above_is_not() {
        let mut store = InMemoryPageStore::new(16384);
        let mut rseg = RollbackSegment::create(RsegId(0), &mut store).unwrap();
        let page_no = rseg
            .create_undo_segment(UndoPageType::Update, &mut store)
            .unwrap();
        rseg.push_cached(UndoPageType::Update, page_no);

        let reused = rseg
            .pop_cached(UndoPageType::Update, 16384, &mut store)
            .unwrap();
        assert_eq!(reused, Some(page_no));

        // Fill the segment past the reuse limit, then confirm it is no
        // longer offered back.
        let mut page = store.read_page(page_no).unwrap();
        let limit = reuse_limit(16384);
        let filler = vec![0u8; 32];
        while UndoPageHeader::parse(&page).unwrap().free < limit {
            if undo_page::append_record(&mut page, &filler) == 0 {
                break;
            }
        }
        store.write_page(page_no, &page).unwrap();
        rseg.push_cached(UndoPageType::Update, page_no);
        let reused = rseg
            .pop_cached(UndoPageType::Update, 16384, &mut store)
            .unwrap();
        assert_eq!(reused, None);
    }

    #[test]
    fn history_list_truncates_only_fully_purged_prefix() {
        let mut store = InMemoryPageStore::new(16384);
        let mut rseg = RollbackSegment::create(RsegId(0), &mut store).unwrap();
        rseg.history_list_add(10, 1);
        rseg.history_list_add(20, 2);
        rseg.history_list_add(30, 3);
        assert_eq!(rseg.max_trx_id, 3);

        rseg.truncate_history(|page| page != 20, &mut store);
        let remaining: Vec<u32> = rseg.history_list_iter().collect();
        assert_eq!(remaining, vec![20, 30]);
    }

    #[test]
    fn assign_round_robin_skips_empty_slots_and_wraps() {
        let mut set = RollbackSegmentSet::new(3);
        let mut store = InMemoryPageStore::new(16384);
        set.create(RsegId(0), &mut store).unwrap();
        set.create(RsegId(2), &mut store).unwrap();

        let first = set.assign_round_robin(None).unwrap();
        assert_eq!(first, RsegId(0));
        let second = set.assign_round_robin(Some(first)).unwrap();
        assert_eq!(second, RsegId(2));
        let third = set.assign_round_robin(Some(second)).unwrap();
        assert_eq!(third, RsegId(0));
    }
}
