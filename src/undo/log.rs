//! Undo log lifecycle (component D): the in-memory representation of a
//! per-transaction, per-type undo log, its state machine, and the
//! create/reuse/cache/free policy around it.
//!
//! Grounded on `trx0undo.c`: `trx_undo_assign_undo`'s cache-first
//! allocation, `trx_undo_set_state_at_finish`'s reusability check, and the
//! crash-recovery scan in `trx_undo_lists_init`/`trx_resurrect_trx`.

use crate::innodb::constants::{reuse_limit, TRX_UNDO_LOG_OLD_HDR_SIZE, TRX_UNDO_XA_HDR_SIZE};
use crate::innodb::store::PageStore;
use crate::innodb::undo_page::{self, UndoPageType, UndoSegmentHeader, UndoState};
use crate::rseg::{RollbackSegment, RsegId};
use crate::EngineError;

/// An XA transaction identifier, carried verbatim once a transaction
/// declares XA support; opaque to this engine beyond its byte length.
pub type XaId = Vec<u8>;

/// In-memory undo log object (`trx_undo_t`).
#[derive(Debug, Clone)]
pub struct UndoLog {
    pub rseg: RsegId,
    pub undo_type: UndoPageType,
    pub state: UndoState,
    pub hdr_page_no: u32,
    pub hdr_offset: u16,
    /// Size of the segment in pages.
    pub size: u32,
    pub last_page_no: u32,
    pub top_page_no: u32,
    pub top_offset: u16,
    pub top_undo_no: u64,
    pub empty: bool,
    pub dict_operation: bool,
    pub table_id: Option<u64>,
    pub xid: Option<XaId>,
    /// Cached last-page number, used to skip the page-list walk on the
    /// common case where the next operation lands on the same page.
    pub guess_page: Option<u32>,
    /// Pages belonging to this segment, in page-list order (header page
    /// first). Used by the rollback driver to step to the previous page
    /// when a page's first record has been undone.
    pub pages: Vec<u32>,
}

impl UndoLog {
    /// `create_undo_segment` + header init: allocate a brand-new log of
    /// the given type in `rseg`.
    pub fn create(
        rseg_id: RsegId,
        rseg: &mut RollbackSegment,
        undo_type: UndoPageType,
        store: &mut dyn PageStore,
    ) -> Result<Self, EngineError> {
        let hdr_page_no = rseg.create_undo_segment(undo_type, store)?;
        Ok(UndoLog {
            rseg: rseg_id,
            undo_type,
            state: UndoState::Active,
            hdr_page_no,
            hdr_offset: (undo_page::TRX_UNDO_SEG_HDR_SIZE) as u16,
            size: 1,
            last_page_no: hdr_page_no,
            top_page_no: hdr_page_no,
            top_offset: 0,
            top_undo_no: 0,
            empty: true,
            dict_operation: false,
            table_id: None,
            xid: None,
            guess_page: Some(hdr_page_no),
            pages: vec![hdr_page_no],
        })
    }

    /// Re-initialize a cached segment's header for reuse by a new
    /// transaction, recreating the XA extension if (and only if) the new
    /// transaction declares XA support — XA-header presence is a property
    /// of the segment at any moment, not a property carried over from
    /// whichever transaction last used it.
    pub fn reuse(
        rseg_id: RsegId,
        undo_type: UndoPageType,
        hdr_page_no: u32,
        wants_xa: bool,
        store: &mut dyn PageStore,
    ) -> Result<Self, EngineError> {
        let mut page = store.read_page(hdr_page_no)?;
        let reserved = TRX_UNDO_LOG_OLD_HDR_SIZE + if wants_xa { TRX_UNDO_XA_HDR_SIZE } else { 0 };
        undo_page::page_init(&mut page, undo_type, undo_page::TRX_UNDO_SEG_HDR_SIZE + reserved);
        UndoSegmentHeader {
            state: UndoState::Active,
            last_log: undo_page::TRX_UNDO_SEG_HDR_SIZE as u16,
        }
        .write(&mut page);
        store.write_page(hdr_page_no, &page)?;

        Ok(UndoLog {
            rseg: rseg_id,
            undo_type,
            state: UndoState::Active,
            hdr_page_no,
            hdr_offset: undo_page::TRX_UNDO_SEG_HDR_SIZE as u16,
            size: 1,
            last_page_no: hdr_page_no,
            top_page_no: hdr_page_no,
            top_offset: 0,
            top_undo_no: 0,
            empty: true,
            dict_operation: false,
            table_id: None,
            xid: if wants_xa { Some(Vec::new()) } else { None },
            guess_page: Some(hdr_page_no),
            pages: vec![hdr_page_no],
        })
    }

    /// `assign(type)`: try the rseg's cache first, only creating a fresh
    /// segment on a miss. A freshly created segment that wants XA support
    /// is re-initialized via `reuse` on its own still-empty page to reserve
    /// the XA extension — `create_undo_segment` itself never reserves it,
    /// since it has no way to know a caller wants XA.
    pub fn assign(
        rseg_id: RsegId,
        rseg: &mut RollbackSegment,
        undo_type: UndoPageType,
        wants_xa: bool,
        page_size: u32,
        store: &mut dyn PageStore,
    ) -> Result<Self, EngineError> {
        if let Some(hdr_page_no) = rseg.pop_cached(undo_type, page_size, store)? {
            Self::reuse(rseg_id, undo_type, hdr_page_no, wants_xa, store)
        } else {
            let log = Self::create(rseg_id, rseg, undo_type, store)?;
            if wants_xa {
                Self::reuse(rseg_id, undo_type, log.hdr_page_no, true, store)
            } else {
                Ok(log)
            }
        }
    }

    /// Persist this transaction's XA id into the segment's reserved
    /// extension. No-op if this log never reserved one.
    pub fn persist_xid(&self, xid: &[u8], store: &mut dyn PageStore) -> Result<(), EngineError> {
        if self.xid.is_none() {
            return Ok(());
        }
        let mut page = store.read_page(self.hdr_page_no)?;
        undo_page::write_xid(&mut page, xid);
        store.write_page(self.hdr_page_no, &page)
    }

    /// Append a record to the log's last page, growing the segment via
    /// `rseg.add_page` on overflow. `undo_no` is the caller-assigned
    /// (monotonic, per-transaction) undo number this record carries;
    /// recorded as the log's new top so the rollback driver can compare it
    /// against the other stack's top without re-parsing the record.
    /// Returns the record's roll pointer components (page_no, offset).
    pub fn append_record(
        &mut self,
        rseg: &mut RollbackSegment,
        record_bytes: &[u8],
        undo_no: u64,
        store: &mut dyn PageStore,
    ) -> Result<(u32, u16), EngineError> {
        let mut page = store.read_page(self.last_page_no)?;
        let mut offset = undo_page::append_record(&mut page, record_bytes);
        if offset == 0 {
            undo_page::erase_page_end(&mut page);
            store.write_page(self.last_page_no, &page)?;
            let new_page_no = rseg.add_page(store)?;
            let mut new_page = store.read_page(new_page_no)?;
            undo_page::page_init(&mut new_page, self.undo_type, 0);
            offset = undo_page::append_record(&mut new_page, record_bytes);
            if offset == 0 {
                return Err(EngineError::Corruption(
                    "undo record does not fit on a fresh page".to_string(),
                ));
            }
            store.write_page(new_page_no, &new_page)?;
            self.last_page_no = new_page_no;
            self.pages.push(new_page_no);
            self.size += 1;
        } else {
            store.write_page(self.last_page_no, &page)?;
        }

        self.top_page_no = self.last_page_no;
        self.top_offset = offset;
        self.top_undo_no = undo_no;
        self.guess_page = Some(self.last_page_no);
        self.empty = false;
        Ok((self.last_page_no, offset))
    }

    /// Step the log's `top_*` fields back to the previous record, walking
    /// across a page boundary via `pages` when the current top page's
    /// first record has just been undone. `undo_no_of` parses the new
    /// top's undo-no from its record bytes (undo-nos are not necessarily
    /// contiguous within a single log, since insert- and update-undo share
    /// one per-transaction counter). Sets `empty = true` once no record
    /// remains.
    pub fn step_back<F>(&mut self, store: &mut dyn PageStore, undo_no_of: F) -> Result<(), EngineError>
    where
        F: Fn(&[u8]) -> Result<u64, EngineError>,
    {
        let page = store.read_page(self.top_page_no)?;
        if let Some(prev) = undo_page::get_prev(&page, self.top_offset) {
            self.top_offset = prev;
            self.top_undo_no = undo_no_of(undo_page::record_body(&page, prev))?;
            return Ok(());
        }

        let pos = self.pages.iter().position(|&p| p == self.top_page_no);
        let prev_page_no = match pos {
            Some(0) | None => None,
            Some(i) => Some(self.pages[i - 1]),
        };
        match prev_page_no {
            Some(prev_page_no) => {
                let prev_page = store.read_page(prev_page_no)?;
                match undo_page::get_last_rec(&prev_page) {
                    Some(off) => {
                        self.top_undo_no = undo_no_of(undo_page::record_body(&prev_page, off))?;
                        self.top_page_no = prev_page_no;
                        self.top_offset = off;
                    }
                    None => self.empty = true,
                }
            }
            None => self.empty = true,
        }
        Ok(())
    }

    /// `set_state_at_finish`: decide the log's post-commit (or
    /// post-rollback) state, called whenever a log object was assigned at
    /// all. Reusability is purely structural — `size == 1` and the page's
    /// free offset below the reuse limit — regardless of whether a full
    /// rollback has since undone every record back to `empty`; a segment
    /// that shrank back to nothing is exactly as reusable as one that never
    /// grew past its first page.
    pub fn state_at_finish(&self, page_size: u32) -> FinishState {
        let reusable = self.size == 1 && self.top_offset < reuse_limit(page_size);
        match (self.undo_type, reusable) {
            (UndoPageType::Insert, true) => FinishState::Cached,
            (UndoPageType::Insert, false) => FinishState::ToFree,
            (_, true) => FinishState::Cached,
            (_, false) => FinishState::ToPurge,
        }
    }
}

/// Outcome of `state_at_finish`, directing what the commit path does with
/// the log next. A transaction that never assigned a log of a given type
/// at all has no `FinishState` to compute (see `Trx::finish_states`'
/// `Option`) — there is no separate "discard" state here because a log
/// object only comes into being once a record is about to be written to
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishState {
    Cached,
    ToFree,
    ToPurge,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::store::InMemoryPageStore;
    use crate::rseg::RollbackSegmentSet;

    fn fresh_rseg(store: &mut InMemoryPageStore) -> (RollbackSegmentSet, RsegId) {
        let mut set = RollbackSegmentSet::new(4);
        set.create(RsegId(0), store).unwrap();
        (set, RsegId(0))
    }

    #[test]
    fn create_then_append_advances_top() {
        let mut store = InMemoryPageStore::new(16384);
        let (mut set, id) = fresh_rseg(&mut store);
        let rseg = set.get_mut(id).unwrap();
        let mut log = UndoLog::create(id, rseg, UndoPageType::Insert, &mut store).unwrap();
        assert!(log.empty);
        let (page_no, offset) = log.append_record(rseg, &[1, 2, 3], 0, &mut store).unwrap();
        assert_eq!(page_no, log.hdr_page_no);
        assert!(offset > 0);
        assert!(!log.empty);
    }

    #[test]
    fn freshly_created_unwritten_log_is_still_cached() {
        let mut store = InMemoryPageStore::new(16384);
        let (mut set, id) = fresh_rseg(&mut store);
        let rseg = set.get_mut(id).unwrap();
        let log = UndoLog::create(id, rseg, UndoPageType::Insert, &mut store).unwrap();
        assert_eq!(log.state_at_finish(16384), FinishState::Cached);
    }

    #[test]
    fn small_single_page_log_is_reusable() {
        let mut store = InMemoryPageStore::new(16384);
        let (mut set, id) = fresh_rseg(&mut store);
        let rseg = set.get_mut(id).unwrap();
        let mut log = UndoLog::create(id, rseg, UndoPageType::Update, &mut store).unwrap();
        log.append_record(rseg, &[1, 2, 3], 0, &mut store).unwrap();
        assert_eq!(log.state_at_finish(16384), FinishState::Cached);
    }

    #[test]
    fn multi_page_log_is_not_reusable() {
        let mut store = InMemoryPageStore::new(16384);
        let (mut set, id) = fresh_rseg(&mut store);
        let rseg = set.get_mut(id).unwrap();
        let mut log = UndoLog::create(id, rseg, UndoPageType::Update, &mut store).unwrap();
        let big_record = vec![0u8; 4096];
        for i in 0..10 {
            log.append_record(rseg, &big_record, i, &mut store).unwrap();
        }
        assert!(log.size > 1);
        assert_eq!(log.state_at_finish(16384), FinishState::ToPurge);
    }

    #[test]
    fn reused_segment_recreates_xa_header_per_new_transaction() {
        let mut store = InMemoryPageStore::new(16384);
        let (mut set, id) = fresh_rseg(&mut store);
        let rseg = set.get_mut(id).unwrap();
        let log = UndoLog::create(id, rseg, UndoPageType::Update, &mut store).unwrap();
        let hdr_page_no = log.hdr_page_no;

        let reused_no_xa =
            UndoLog::reuse(id, UndoPageType::Update, hdr_page_no, false, &mut store).unwrap();
        assert!(reused_no_xa.xid.is_none());

        let reused_xa =
            UndoLog::reuse(id, UndoPageType::Update, hdr_page_no, true, &mut store).unwrap();
        assert!(reused_xa.xid.is_some());
    }
}
