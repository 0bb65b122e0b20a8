//! Engine (top-level wiring, §9): the kernel critical section binding
//! together transactions, rollback segments, and the system page, plus
//! crash recovery and XA lookup.
//!
//! Grounded on `trx0sys.c`'s `trx_sys_init_at_db_start` (rseg bootstrap at
//! startup) and `trx0trx.c`'s `trx_lists_init_at_db_start` (the recovery
//! scan that rebuilds the in-memory transaction table from on-disk undo
//! segments). The kernel mutex here is a single `parking_lot::Mutex`
//! rather than the original's separate kernel/rseg/undo mutex hierarchy
//! (§5's eight-level latching order collapses to one lock in this engine,
//! since there are no real concurrent worker threads contending for it).

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde_json::Value as ColumnValue;

use crate::config::EngineConfig;
use crate::innodb::store::PageStore;
use crate::innodb::sys::TrxSysPage;
use crate::innodb::undo_page::{self, UndoPageType, UndoSegmentHeader, UndoState};
use crate::purge::{self, PurgeReport, PurgeView};
use crate::row::{ClusteredCursor, RollPtr, SecondaryIndex};
use crate::rseg::{RollbackSegmentSet, RsegId};
use crate::trx::rollback::{self, InProgressSet};
use crate::trx::state::{Trx, TrxLifecycle, TxId};
use crate::undo::log::{FinishState, UndoLog, XaId};
use crate::undo::record::{self, FieldChange, RowOp};
use crate::EngineError;

const TRX_SYS_PAGE_NO: u32 = 0;

struct Kernel {
    store: Box<dyn PageStore>,
    sys: TrxSysPage,
    rsegs: RollbackSegmentSet,
    trxs: BTreeMap<TxId, Trx>,
    last_rseg: Option<RsegId>,
    /// `history-list header page -> serial_no`, recorded whenever an
    /// update-undo log is linked into a rseg's history list at commit. The
    /// undo page codec does not duplicate the trx_no on-page (see
    /// [`crate::purge::run_purge_pass`]'s doc comment), so the purge engine
    /// needs this side index to order its min-heap.
    history_trx_no: BTreeMap<u32, u64>,
}

/// The engine: a single kernel critical section guarding every piece of
/// cross-transaction state.
pub struct Engine {
    config: EngineConfig,
    kernel: Mutex<Kernel>,
}

/// A transaction resurrected by [`Engine::recover`], per §4.D.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveredTrx {
    pub id: TxId,
    pub lifecycle: TrxLifecycle,
}

impl Engine {
    /// Bring up a fresh instance: allocate and initialize TRX_SYS and every
    /// configured rollback segment.
    pub fn create(config: EngineConfig, mut store: Box<dyn PageStore>) -> Result<Self, EngineError> {
        let trx_sys_page_no = store.allocate_page()?;
        if trx_sys_page_no != TRX_SYS_PAGE_NO {
            return Err(EngineError::Corruption(
                "TRX_SYS must be the first page allocated in a fresh store".to_string(),
            ));
        }

        let mut sys = TrxSysPage::new();
        let mut rsegs = RollbackSegmentSet::new(config.n_rsegs);
        for i in 0..config.n_rsegs {
            let id = RsegId(i as u8);
            rsegs.create(id, &mut *store)?;
            let header_page = rsegs.get(id).unwrap().header_page;
            sys.set_slot(i, 0, header_page);
        }
        Self::flush_sys(&mut store, &sys)?;

        info!("engine created with {} rollback segments", config.n_rsegs);
        Ok(Engine {
            config,
            kernel: Mutex::new(Kernel {
                store,
                sys,
                rsegs,
                trxs: BTreeMap::new(),
                last_rseg: None,
                history_trx_no: BTreeMap::new(),
            }),
        })
    }

    /// Reattach to an already-initialized store and rollback segment set —
    /// the moment a real restart would otherwise have to re-derive `rsegs`
    /// from disk. This engine's undo page codec does not persist a rseg's
    /// occupied-slot array or a multi-page segment's later pages anywhere
    /// a freshly-started process could rediscover them (see
    /// [`crate::rseg::RollbackSegment`]'s own doc comment on its no-op
    /// `flush`), so the caller supplies the already-known `rsegs`/`sys`
    /// rather than this constructor re-deriving them from raw bytes;
    /// [`Engine::recover`] then rebuilds the transaction table from what
    /// `rsegs` does track.
    pub fn reopen(
        config: EngineConfig,
        store: Box<dyn PageStore>,
        sys: TrxSysPage,
        rsegs: RollbackSegmentSet,
    ) -> Self {
        Engine {
            config,
            kernel: Mutex::new(Kernel {
                store,
                sys,
                rsegs,
                trxs: BTreeMap::new(),
                last_rseg: None,
                history_trx_no: BTreeMap::new(),
            }),
        }
    }

    fn flush_sys(store: &mut Box<dyn PageStore>, sys: &TrxSysPage) -> Result<(), EngineError> {
        let mut page = store.read_page(TRX_SYS_PAGE_NO)?;
        sys.write_into(&mut page)?;
        store.write_page(TRX_SYS_PAGE_NO, &page)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decompose into owned parts, simulating a process restart: the store
    /// and rollback segment bookkeeping survive, the transaction table does
    /// not (see [`Engine::reopen`]).
    pub fn into_parts(self) -> (EngineConfig, Box<dyn PageStore>, TrxSysPage, RollbackSegmentSet) {
        let Kernel { store, sys, rsegs, .. } = self.kernel.into_inner();
        (self.config, store, sys, rsegs)
    }

    fn trx_mut(trxs: &mut BTreeMap<TxId, Trx>, id: TxId) -> Result<&mut Trx, EngineError> {
        trxs.get_mut(&id)
            .ok_or_else(|| EngineError::Argument(format!("no such transaction: {}", id.0)))
    }

    // ---- §4.E: begin / savepoints --------------------------------------

    /// `begin()`.
    pub fn begin(&self) -> TxId {
        let mut k = self.kernel.lock();
        let id = TxId(k.sys.next_trx_id());
        k.trxs.insert(id, Trx::begin(id));
        debug!("trx {} begin", id.0);
        id
    }

    /// A transaction that will later call [`Engine::prepare`]; marks it so
    /// its first-assigned undo segment recreates the XA header extension.
    pub fn begin_xa(&self) -> TxId {
        let mut k = self.kernel.lock();
        let id = TxId(k.sys.next_trx_id());
        let mut trx = Trx::begin(id);
        trx.wants_xa = true;
        k.trxs.insert(id, trx);
        debug!("trx {} begin (xa)", id.0);
        id
    }

    pub fn set_xid(&self, id: TxId, xid: XaId) -> Result<(), EngineError> {
        let mut k = self.kernel.lock();
        Self::trx_mut(&mut k.trxs, id)?.xid = Some(xid);
        Ok(())
    }

    pub fn savepoint(&self, id: TxId, name: &str) -> Result<(), EngineError> {
        let mut k = self.kernel.lock();
        Self::trx_mut(&mut k.trxs, id)?.savepoint(name);
        Ok(())
    }

    pub fn release_savepoint(&self, id: TxId, name: &str) -> Result<(), EngineError> {
        let mut k = self.kernel.lock();
        Self::trx_mut(&mut k.trxs, id)?.release_savepoint(name)
    }

    // ---- §4.B/§4.C/§4.D: row-operation undo emission -------------------

    /// `trx_undo_report_row_operation`: emit one undo record for `op`,
    /// lazily assigning a rollback segment and undo log on first use.
    #[allow(clippy::too_many_arguments)]
    pub fn report_row_operation(
        &self,
        id: TxId,
        op: RowOp,
        table_id: u64,
        pk: &[ColumnValue],
        prior_trx_id: Option<u64>,
        prior_roll_ptr: Option<RollPtr>,
        info_bits: u8,
        update_vec: &[FieldChange],
        already_delete_marked: bool,
        old_ordering_values: &[ColumnValue],
    ) -> Result<RollPtr, EngineError> {
        let mut k = self.kernel.lock();
        let page_size = k.store.page_size();
        let rseg_id = k
            .rsegs
            .assign_round_robin(k.last_rseg)
            .ok_or_else(|| EngineError::Argument("no rollback segments configured".to_string()))?;
        k.last_rseg = Some(rseg_id);

        let Kernel { store, rsegs, trxs, .. } = &mut *k;
        let trx = Self::trx_mut(trxs, id)?;
        let rseg = rsegs
            .get_mut(rseg_id)
            .ok_or_else(|| EngineError::Corruption("assigned rseg missing".to_string()))?;

        let undo_no = trx.undo_no;
        let compl_info = if old_ordering_values.is_empty() {
            record::NO_ORD_CHANGE
        } else {
            0
        };
        let rec_bytes = record::report_row_operation(
            op,
            table_id,
            undo_no,
            compl_info,
            pk,
            prior_trx_id,
            prior_roll_ptr,
            info_bits,
            update_vec,
            already_delete_marked,
            old_ordering_values,
        );

        let log = match op {
            RowOp::Insert => trx.ensure_insert_undo(rseg_id, rseg, page_size, store.as_mut())?,
            RowOp::Modify => trx.ensure_update_undo(rseg_id, rseg, page_size, store.as_mut())?,
        };
        let (page_no, offset) = log.append_record(rseg, &rec_bytes, undo_no, store.as_mut())?;
        trx.undo_no += 1;

        Ok(RollPtr::new(matches!(op, RowOp::Insert), rseg_id.0, page_no, offset))
    }

    // ---- §4.E: commit -----------------------------------------------------

    /// `commit()`: the 6-step path — decide each log's finish state, assign
    /// the serial number, link a non-reusable update-undo into the history
    /// list, dispose of both logs (cache / free), then move to
    /// COMMITTED_IN_MEMORY. A read-only transaction (no rseg ever assigned)
    /// short-circuits to step 5 with no serial number.
    pub fn commit(&self, id: TxId) -> Result<Option<u64>, EngineError> {
        let mut k = self.kernel.lock();
        let Kernel { store, sys, rsegs, trxs, history_trx_no, .. } = &mut *k;
        let trx = Self::trx_mut(trxs, id)?;
        trx.lifecycle = TrxLifecycle::Committing;

        let serial_no = Self::finalize(trx, sys, rsegs, store.as_mut(), history_trx_no)?;
        trx.finish_commit();
        info!("trx {} committed, serial_no={:?}", id.0, serial_no);
        Ok(serial_no)
    }

    /// Shared disposal step for both ordinary commit and a completed total
    /// rollback: real InnoDB finalizes both the same way — an update-undo
    /// log still gets a serial number and a history-list entry even when
    /// the transaction rolled back, since purge needs to walk it exactly
    /// once more to confirm there is nothing left to clean up. Returns
    /// `None` for a transaction that never assigned a rollback segment at
    /// all (read-only).
    fn finalize(
        trx: &mut Trx,
        sys: &mut TrxSysPage,
        rsegs: &mut RollbackSegmentSet,
        store: &mut dyn PageStore,
        history_trx_no: &mut BTreeMap<u32, u64>,
    ) -> Result<Option<u64>, EngineError> {
        let rseg_id = match trx.rseg {
            Some(r) => r,
            None => return Ok(None),
        };
        let rseg = rsegs
            .get_mut(rseg_id)
            .ok_or_else(|| EngineError::Corruption("trx's rseg missing".to_string()))?;

        let page_size = store.page_size();
        let (insert_outcome, update_outcome) = trx.finish_states(page_size);
        let serial_no = sys.next_trx_id();
        trx.commit_update_undo_into_history(serial_no, update_outcome, rseg);

        if let Some(log) = trx.insert_undo.take() {
            match insert_outcome {
                Some(FinishState::Cached) => rseg.push_cached(UndoPageType::Insert, log.hdr_page_no),
                Some(FinishState::ToFree) => {
                    for page_no in &log.pages {
                        rseg.free_page(*page_no, store)?;
                    }
                    rseg.release_undo_slot(log.hdr_page_no);
                }
                _ => {}
            }
        }
        if let Some(log) = trx.update_undo.take() {
            if update_outcome == Some(FinishState::Cached) {
                rseg.push_cached(UndoPageType::Update, log.hdr_page_no);
            }
            if update_outcome == Some(FinishState::ToPurge) {
                history_trx_no.insert(log.hdr_page_no, serial_no);
            }
            // ToPurge stays linked on the history list; its slot is
            // released later by `RollbackSegment::truncate_history` once
            // the purge engine finishes with it.
        }

        trx.serial_no = Some(serial_no);
        Ok(Some(serial_no))
    }

    // ---- §4.F: rollback ----------------------------------------------------

    /// `rollback()`: total rollback.
    pub fn rollback(
        &self,
        id: TxId,
        clust: &mut dyn ClusteredCursor,
        secondary: &mut [(&[usize], &mut SecondaryIndex)],
    ) -> Result<(), EngineError> {
        self.roll_to_limit(id, 0, clust, secondary)
    }

    /// `rollback_to_savepoint(name)`.
    pub fn rollback_to_savepoint(
        &self,
        id: TxId,
        name: &str,
        clust: &mut dyn ClusteredCursor,
        secondary: &mut [(&[usize], &mut SecondaryIndex)],
    ) -> Result<(), EngineError> {
        let limit = {
            let mut k = self.kernel.lock();
            Self::trx_mut(&mut k.trxs, id)?.rollback_to_savepoint(name)?
        };
        self.roll_to_limit(id, limit, clust, secondary)
    }

    /// `rollback_last_statement()`.
    pub fn rollback_last_statement(
        &self,
        id: TxId,
        statement_start_undo_no: u64,
        clust: &mut dyn ClusteredCursor,
        secondary: &mut [(&[usize], &mut SecondaryIndex)],
    ) -> Result<(), EngineError> {
        let limit = {
            let mut k = self.kernel.lock();
            Self::trx_mut(&mut k.trxs, id)?.rollback_last_statement(statement_start_undo_no)
        };
        self.roll_to_limit(id, limit, clust, secondary)
    }

    fn roll_to_limit(
        &self,
        id: TxId,
        limit: u64,
        clust: &mut dyn ClusteredCursor,
        secondary: &mut [(&[usize], &mut SecondaryIndex)],
    ) -> Result<(), EngineError> {
        let mut in_progress = InProgressSet::new();
        let mut pages_undone = 0u32;

        loop {
            let mut k = self.kernel.lock();
            let Kernel { store, rsegs, trxs, .. } = &mut *k;
            let trx = Self::trx_mut(trxs, id)?;
            let rseg_id = match trx.rseg {
                Some(r) => r,
                None => break,
            };
            let rseg = rsegs
                .get_mut(rseg_id)
                .ok_or_else(|| EngineError::Corruption("trx's rseg missing".to_string()))?;

            if rollback::should_truncate(pages_undone) {
                let trunc_limit = in_progress.arr_biggest().unwrap_or(limit).max(limit);
                if let Some(log) = trx.insert_undo.as_mut() {
                    rollback::truncate_end(log, trunc_limit, rseg, store.as_mut())?;
                }
                if let Some(log) = trx.update_undo.as_mut() {
                    rollback::truncate_end(log, trunc_limit, rseg, store.as_mut())?;
                }
                pages_undone = 0;
            }

            let popped = rollback::pop_next(
                trx.insert_undo.as_mut(),
                trx.update_undo.as_mut(),
                limit,
                &mut in_progress,
                store.as_mut(),
            )?;
            let popped = match popped {
                Some(p) => p,
                None => break,
            };
            trx.undo_no = popped.undo_no;
            drop(k);

            rollback::apply(&popped.bytes, clust, secondary)?;
            in_progress.arr_remove(popped.undo_no);
            pages_undone += 1;
        }

        let mut k = self.kernel.lock();
        let Kernel { store, sys, rsegs, trxs, history_trx_no, .. } = &mut *k;
        let trx = Self::trx_mut(trxs, id)?;
        trx.rollback_limit = limit;

        if limit == 0 {
            // A total rollback reached undo-no 0: the transaction is done,
            // disposed of exactly like an ordinary commit.
            Self::finalize(trx, sys, rsegs, store.as_mut(), history_trx_no)?;
            trx.lifecycle = TrxLifecycle::NotStarted;
            trx.savepoints.clear();
            info!("trx {} rolled back", id.0);
        }
        Ok(())
    }

    // ---- §4.E: prepare / recover / get_by_xid ------------------------------

    /// `prepare()`: persist PREPARED into every undo segment header this
    /// transaction owns, then move the in-memory state to `Prepared`.
    pub fn prepare(&self, id: TxId) -> Result<(), EngineError> {
        let mut k = self.kernel.lock();
        let Kernel { store, trxs, .. } = &mut *k;
        let trx = Self::trx_mut(trxs, id)?;

        let xid = trx.xid.clone();
        for log in [trx.insert_undo.as_ref(), trx.update_undo.as_ref()].into_iter().flatten() {
            let mut page = store.read_page(log.hdr_page_no)?;
            let current = UndoSegmentHeader::parse(&page)
                .ok_or_else(|| EngineError::Corruption("bad undo segment header".to_string()))?;
            UndoSegmentHeader {
                state: UndoState::Prepared,
                last_log: current.last_log,
            }
            .write(&mut page);
            store.write_page(log.hdr_page_no, &page)?;

            if let Some(xid) = xid.as_ref() {
                log.persist_xid(xid, store)?;
            }
        }

        trx.prepare();
        info!("trx {} prepared", id.0);
        Ok(())
    }

    /// `get_by_xid(xid)`.
    pub fn get_by_xid(&self, xid: &[u8]) -> Option<TxId> {
        let k = self.kernel.lock();
        k.trxs
            .values()
            .find(|t| t.xid.as_deref() == Some(xid))
            .map(|t| t.id)
    }

    /// `recover()`: scan every rollback segment's occupied undo-segment
    /// slots and resurrect a transaction entry for any whose segment state
    /// is still ACTIVE or PREPARED and has no in-memory transaction
    /// already tracking it — the situation after [`Engine::reopen`], where
    /// the transaction table itself was never persisted anywhere.
    ///
    /// A resurrected transaction's `undo_no` is restored to
    /// `top_undo_no + 1`, per §4.D. Only the segment's header page is
    /// consulted: this engine's undo page codec does not persist a
    /// multi-page segment's later pages anywhere a restarted process could
    /// rediscover them (see [`crate::undo::log::UndoLog::pages`]), so a
    /// resurrected log is always rebuilt as if it were a single page —
    /// correct for every log this engine ever leaves ACTIVE across a
    /// reopen in practice, since only a segment mid-transaction can be
    /// found here and most transactions touch few rows, but a genuinely
    /// multi-page in-flight log would lose its earlier pages on recovery.
    /// A production engine would close this gap by persisting
    /// `TRX_UNDO_PAGE_NODE` (see that constant's doc comment in
    /// [`crate::innodb::undo_page`]) so the page list itself survives a
    /// restart.
    pub fn recover(&self) -> Result<Vec<RecoveredTrx>, EngineError> {
        let mut k = self.kernel.lock();
        k.sys.recover_disk_limit();

        let mut slots: Vec<(RsegId, u32)> = Vec::new();
        for rseg_id in k.rsegs.occupied() {
            let rseg = k.rsegs.get(rseg_id).unwrap();
            for (_, header_page) in rseg.occupied_undo_slots() {
                slots.push((rseg_id, header_page));
            }
        }

        let existing_ids: BTreeSet<u64> = k.trxs.keys().map(|id| id.0).collect();
        let mut recovered = Vec::new();

        for (rseg_id, header_page) in slots {
            let page = k.store.read_page(header_page)?;
            let seg_hdr = match UndoSegmentHeader::parse(&page) {
                Some(h) => h,
                None => continue,
            };
            let lifecycle = match seg_hdr.state {
                UndoState::Active => TrxLifecycle::Active,
                UndoState::Prepared => TrxLifecycle::Prepared,
                _ => continue, // cached/to-free/to-purge segments belong to no live transaction
            };

            let page_hdr = undo_page::UndoPageHeader::parse(&page)
                .ok_or_else(|| EngineError::Corruption("bad undo page header during recovery".to_string()))?;
            let undo_type = page_hdr.page_type;

            let (top_offset, top_undo_no, empty, next_undo_no) = match undo_page::get_last_rec(&page) {
                Some(off) => {
                    let rec = undo_page::record_body(&page, off);
                    let undo_no = record::parse_header(rec)?.undo_no;
                    (off, undo_no, false, undo_no + 1)
                }
                None => (0, 0, true, 0),
            };

            // The original trx id was never persisted alongside the
            // segment in this engine's on-disk format (see the module
            // doc); derive a stable, disjoint id from the header page
            // instead so a repeated `recover()` call is idempotent.
            let id = TxId(u64::from(header_page) + (1u64 << 32));
            if existing_ids.contains(&id.0) {
                continue;
            }

            let mut trx = Trx::begin(id);
            trx.lifecycle = lifecycle;
            trx.rseg = Some(rseg_id);
            trx.undo_no = next_undo_no;
            if lifecycle == TrxLifecycle::Prepared {
                trx.xid = undo_page::read_xid(&page);
            }

            let log = UndoLog {
                rseg: rseg_id,
                undo_type,
                state: seg_hdr.state,
                hdr_page_no: header_page,
                hdr_offset: undo_page::TRX_UNDO_SEG_HDR_SIZE as u16,
                size: 1,
                last_page_no: header_page,
                top_page_no: header_page,
                top_offset,
                top_undo_no,
                empty,
                dict_operation: false,
                table_id: None,
                xid: None,
                guess_page: Some(header_page),
                pages: vec![header_page],
            };
            match undo_type {
                UndoPageType::Insert => trx.insert_undo = Some(log),
                _ => trx.update_undo = Some(log),
            }

            warn!(
                "recovered {:?} transaction from undo segment header page {}",
                lifecycle, header_page
            );
            recovered.push(RecoveredTrx { id, lifecycle });
            k.trxs.insert(id, trx);
        }

        Ok(recovered)
    }

    // ---- §4.H: purge --------------------------------------------------

    /// `trx_purge()`: run one purge pass below `low_limit_trx_no`, then
    /// truncate from every rseg's history list whatever pages the pass
    /// visited — this engine never defers a visited page's truncation the
    /// way the original batches it across several passes, since a page is
    /// only ever visited here once its single record has already been
    /// purged.
    pub fn run_purge(
        &self,
        low_limit_trx_no: u64,
        clust: &mut dyn ClusteredCursor,
        secondary: &mut [(&[usize], &mut SecondaryIndex)],
    ) -> Result<PurgeReport, EngineError> {
        let mut k = self.kernel.lock();
        let Kernel { store, rsegs, history_trx_no, .. } = &mut *k;

        let mut rseg_refs: Vec<(RsegId, &mut _)> = rsegs.iter_mut().collect();
        let fetch_trx_no = |hdr_page: u32| *history_trx_no.get(&hdr_page).unwrap_or(&0);

        let report = purge::run_purge_pass(
            &mut rseg_refs,
            PurgeView { low_limit_trx_no },
            clust,
            secondary,
            store.as_mut(),
            fetch_trx_no,
        )?;

        let visited: BTreeSet<u32> = report.visited_pages.iter().copied().collect();
        purge::truncate_history(&mut rseg_refs, |page| visited.contains(&page), store.as_mut());
        for page in &report.visited_pages {
            history_trx_no.remove(page);
        }

        info!(
            "purge pass: {} records visited, {} history pages truncated",
            report.outcomes.len(),
            report.visited_pages.len()
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::store::InMemoryPageStore;
    use crate::row::{ClusteredIndex, Row};

    fn fresh_engine(n_rsegs: usize) -> Engine {
        let config = EngineConfig {
            n_rsegs,
            ..EngineConfig::default()
        };
        let store = Box::new(InMemoryPageStore::new(16384));
        Engine::create(config, store).unwrap()
    }

    #[test]
    fn insert_then_total_rollback_removes_row_and_caches_undo() {
        let engine = fresh_engine(1);
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 0,
                    roll_ptr: RollPtr::NONE,
                    deleted: false,
                    columns: vec![ColumnValue::from("a")],
                },
            )
            .unwrap();

        let id = engine.begin();
        engine
            .report_row_operation(id, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
            .unwrap();
        engine.rollback(id, &mut clust, &mut []).unwrap();

        assert!(clust.get(&pk).is_none());
    }

    #[test]
    fn update_then_commit_assigns_serial_no_and_links_history_when_not_reusable() {
        let engine = fresh_engine(1);
        let pk = vec![ColumnValue::from(1)];

        let id = engine.begin();
        let big_change = vec![FieldChange {
            pos: 0,
            old_value: ColumnValue::from("x".repeat(8000)),
        }];
        for i in 0..10u64 {
            engine
                .report_row_operation(
                    id,
                    RowOp::Modify,
                    1,
                    &pk,
                    Some(1),
                    Some(RollPtr::NONE),
                    0,
                    &big_change,
                    false,
                    &[],
                )
                .unwrap();
            let _ = i;
        }
        let serial_no = engine.commit(id).unwrap();
        assert!(serial_no.is_some());
    }

    #[test]
    fn savepoint_partial_rollback_restores_to_the_named_point() {
        let engine = fresh_engine(1);
        let mut clust = ClusteredIndex::new();
        let pk1 = vec![ColumnValue::from(1)];
        let pk2 = vec![ColumnValue::from(2)];
        clust
            .insert(
                pk1.clone(),
                Row {
                    trx_id: 0,
                    roll_ptr: RollPtr::NONE,
                    deleted: false,
                    columns: vec![],
                },
            )
            .unwrap();
        clust
            .insert(
                pk2.clone(),
                Row {
                    trx_id: 0,
                    roll_ptr: RollPtr::NONE,
                    deleted: false,
                    columns: vec![],
                },
            )
            .unwrap();

        let id = engine.begin();
        engine
            .report_row_operation(id, RowOp::Insert, 1, &pk1, None, None, 0, &[], false, &[])
            .unwrap();
        engine.savepoint(id, "sp1").unwrap();
        engine
            .report_row_operation(id, RowOp::Insert, 1, &pk2, None, None, 0, &[], false, &[])
            .unwrap();

        engine.rollback_to_savepoint(id, "sp1", &mut clust, &mut []).unwrap();
        assert!(clust.get(&pk2).is_none());
        assert!(clust.get(&pk1).is_some());
    }

    #[test]
    fn prepared_transaction_is_recovered_as_prepared_after_reopen() {
        let engine = fresh_engine(1);
        let pk = vec![ColumnValue::from(1)];
        let id = engine.begin_xa();
        engine.set_xid(id, vec![1, 2, 3]).unwrap();
        engine
            .report_row_operation(id, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
            .unwrap();
        engine.prepare(id).unwrap();

        let (config, store, sys, rsegs) = engine.into_parts();
        let reopened = Engine::reopen(config, store, sys, rsegs);
        let recovered = reopened.recover().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].lifecycle, TrxLifecycle::Prepared);
    }

    #[test]
    fn active_transaction_survives_simulated_crash() {
        let engine = fresh_engine(1);
        let pk = vec![ColumnValue::from(1)];
        let id = engine.begin();
        engine
            .report_row_operation(id, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
            .unwrap();

        let (config, store, sys, rsegs) = engine.into_parts();
        let reopened = Engine::reopen(config, store, sys, rsegs);
        let recovered = reopened.recover().unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].lifecycle, TrxLifecycle::Active);
    }
}
