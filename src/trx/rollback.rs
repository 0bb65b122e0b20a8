//! Rollback driver (component F): pops undo records from a transaction's
//! two stacks in LIFO order and applies their inverse to the clustered
//! (and, where needed, secondary) indexes.
//!
//! Grounded on `row0undo.c`/`trx0roll.c`: `row_undo_step`'s record-type
//! dispatch, `trx_roll_try_truncate`'s `pages_undone` threshold, and
//! `trx_undo_arr`'s in-progress undo-no bookkeeping (simplified here to a
//! single-worker driver — no concurrent rollback workers to race against,
//! so `arr_store`/`arr_remove`/`arr_biggest` operate on a plain sorted set
//! rather than a fixed-capacity slot array).

use std::collections::BTreeSet;

use crate::innodb::constants::TRUNC_THRESHOLD;
use crate::innodb::store::PageStore;
use crate::innodb::undo_page;
use crate::row::{ClusteredCursor, Row, SecondaryIndex};
use crate::rseg::RollbackSegment;
use crate::undo::log::UndoLog;
use crate::undo::record::{self, FieldChange, UndoRecType, SYSCOL_ROLL_PTR_POS, SYSCOL_TRX_ID_POS};
use crate::EngineError;

/// In-progress undo-no set: records which undo-nos are currently being
/// applied, so the same record is never popped twice concurrently.
#[derive(Default)]
pub struct InProgressSet {
    inner: BTreeSet<u64>,
}

impl InProgressSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// `arr_store`: true if newly inserted, false if already present.
    pub fn arr_store(&mut self, undo_no: u64) -> bool {
        self.inner.insert(undo_no)
    }

    pub fn arr_remove(&mut self, undo_no: u64) {
        self.inner.remove(&undo_no);
    }

    /// `arr_biggest`: largest in-flight undo-no, if any.
    pub fn arr_biggest(&self) -> Option<u64> {
        self.inner.iter().next_back().copied()
    }
}

/// One popped undo record, ready for the apply step.
pub struct PoppedRecord {
    pub bytes: Vec<u8>,
    pub undo_no: u64,
    pub from_insert_log: bool,
}

/// Pop the next undo record whose undo-no is still at-or-above
/// `rollback_limit`, preferring whichever of the two logs has the greater
/// top undo-no (so records are visited in strict descending undo-no order
/// across both stacks). Returns `None` when both logs are exhausted or
/// below the limit.
pub fn pop_next(
    insert_undo: Option<&mut UndoLog>,
    update_undo: Option<&mut UndoLog>,
    rollback_limit: u64,
    in_progress: &mut InProgressSet,
    store: &mut dyn PageStore,
) -> Result<Option<PoppedRecord>, EngineError> {
    loop {
        let insert_top = insert_undo
            .as_ref()
            .filter(|u| !u.empty && u.top_undo_no >= rollback_limit)
            .map(|u| u.top_undo_no);
        let update_top = update_undo
            .as_ref()
            .filter(|u| !u.empty && u.top_undo_no >= rollback_limit)
            .map(|u| u.top_undo_no);

        let from_insert = match (insert_top, update_top) {
            (None, None) => return Ok(None),
            (Some(_), None) => true,
            (None, Some(_)) => false,
            (Some(i), Some(u)) => i >= u,
        };

        let log = if from_insert {
            insert_undo.as_ref().unwrap()
        } else {
            update_undo.as_ref().unwrap()
        };
        let undo_no = log.top_undo_no;

        if !in_progress.arr_store(undo_no) {
            // Another worker has it; in a single-worker driver this can't
            // actually happen, but the check stays so the algorithm matches
            // the spec's concurrent design.
            continue;
        }

        let page = store.read_page(log.top_page_no)?;
        let bytes = undo_page::record_body(&page, log.top_offset).to_vec();

        let log_mut = if from_insert {
            insert_undo.map(|u| &mut *u)
        } else {
            update_undo.map(|u| &mut *u)
        };
        log_mut
            .unwrap()
            .step_back(store, |rec| Ok(record::parse_header(rec)?.undo_no))?;

        return Ok(Some(PoppedRecord {
            bytes,
            undo_no,
            from_insert_log: from_insert,
        }));
    }
}

/// Apply the inverse of one undo record to the clustered index and, where
/// §4.F calls for it, to the secondary indexes: UPD_EXIST_REC/UPD_DEL_REC
/// drop the now-stale secondary entry built from the row's current ordering
/// fields before the prior version is restored; DEL_MARK_REC reinserts a
/// secondary entry for the restored version into any index that does not
/// already carry one (the entry can be missing if purge already ran over a
/// delete-marked row's stale secondary entries before this rollback reached
/// it).
pub fn apply(
    rec_bytes: &[u8],
    clust: &mut dyn ClusteredCursor,
    secondary: &mut [(&[usize], &mut SecondaryIndex)],
) -> Result<(), EngineError> {
    let parsed = record::parse_record(rec_bytes)?;
    match parsed.header.rec_type {
        UndoRecType::InsertRec => {
            clust.remove(&parsed.pk)?;
        }
        UndoRecType::UpdExistRec | UndoRecType::UpdDelRec => {
            let mut row = clust
                .get(&parsed.pk)
                .ok_or_else(|| EngineError::Corruption("row missing for undo update".to_string()))?;
            if parsed.header.ext_updated() {
                for (ordering_positions, index) in secondary.iter_mut() {
                    let stale_entry = ordering_values(&row, ordering_positions);
                    index.remove(&stale_entry, &parsed.pk);
                }
            }
            apply_update_vec(&mut row, &record::get_update(rec_bytes)?);
            clust.put(parsed.pk, row);
        }
        UndoRecType::DelMarkRec => {
            let mut row = clust
                .get(&parsed.pk)
                .ok_or_else(|| EngineError::Corruption("row missing for undo del-mark".to_string()))?;
            row.deleted = false;
            apply_update_vec(&mut row, &record::get_update(rec_bytes)?);
            for (ordering_positions, index) in secondary.iter_mut() {
                let restored_entry = ordering_values(&row, ordering_positions);
                if !index.contains(&restored_entry, &parsed.pk) {
                    index.insert(&restored_entry, &parsed.pk);
                }
            }
            clust.put(parsed.pk, row);
        }
    }
    Ok(())
}

fn ordering_values(row: &Row, ordering_positions: &[usize]) -> Vec<serde_json::Value> {
    ordering_positions
        .iter()
        .map(|&p| row.columns.get(p).cloned().unwrap_or(serde_json::Value::Null))
        .collect()
}

fn apply_update_vec(row: &mut Row, update_vec: &[FieldChange]) {
    for change in update_vec {
        match change.pos {
            SYSCOL_TRX_ID_POS => {
                if let Some(v) = change.old_value.as_u64() {
                    row.trx_id = v;
                }
            }
            SYSCOL_ROLL_PTR_POS => {
                if let Some(v) = change.old_value.as_u64() {
                    row.roll_ptr = crate::row::RollPtr(v);
                }
            }
            pos => {
                let idx = pos as usize;
                if idx < row.columns.len() {
                    row.columns[idx] = change.old_value.clone();
                }
            }
        }
    }
}

/// `truncate_end`: free pages at the tail of a log whose every record has
/// undo-no ≥ `limit`, stopping before the header page (which is erased to
/// its header end rather than freed). Called when `pages_undone` crosses
/// `TRUNC_THRESHOLD`.
pub fn truncate_end(
    log: &mut UndoLog,
    limit: u64,
    rseg: &mut RollbackSegment,
    store: &mut dyn PageStore,
) -> Result<(), EngineError> {
    while log.pages.len() > 1 {
        let last_page_no = *log.pages.last().unwrap();
        let page = store.read_page(last_page_no)?;
        let all_past_limit = match undo_page::get_first_rec(&page) {
            Some(first) => {
                let rec = undo_page::record_body(&page, first);
                record::parse_header(rec)?.undo_no >= limit
            }
            None => true,
        };
        if !all_past_limit {
            break;
        }
        rseg.free_page(last_page_no, store)?;
        log.pages.pop();
        log.size = log.size.saturating_sub(1);
        log.last_page_no = *log.pages.last().unwrap();
    }

    let mut header_page = store.read_page(log.hdr_page_no)?;
    undo_page::erase_page_end(&mut header_page);
    store.write_page(log.hdr_page_no, &header_page)?;
    Ok(())
}

/// Threshold check for the pop loop's step 1: has enough work accumulated
/// to warrant a truncation pass.
pub fn should_truncate(pages_undone: u32) -> bool {
    pages_undone >= TRUNC_THRESHOLD
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::store::InMemoryPageStore;
    use crate::innodb::undo_page::UndoPageType;
    use crate::row::{ClusteredIndex, RollPtr, SecondaryIndex};
    use crate::rseg::{RollbackSegmentSet, RsegId};
    use crate::undo::record::{report_row_operation, RowOp};
    use serde_json::Value as ColumnValue;

    fn insert_rec(undo_no: u64, pk: i64) -> Vec<u8> {
        report_row_operation(
            RowOp::Insert,
            1,
            undo_no,
            0,
            &[ColumnValue::from(pk)],
            None,
            None,
            0,
            &[],
            false,
            &[],
        )
    }

    #[test]
    fn in_progress_set_rejects_duplicate_store() {
        let mut set = InProgressSet::new();
        assert!(set.arr_store(5));
        assert!(!set.arr_store(5));
        assert_eq!(set.arr_biggest(), Some(5));
        set.arr_remove(5);
        assert_eq!(set.arr_biggest(), None);
    }

    #[test]
    fn pop_next_prefers_greater_top_undo_no() {
        let mut store = InMemoryPageStore::new(16384);
        let mut set = RollbackSegmentSet::new(1);
        set.create(RsegId(0), &mut store).unwrap();
        let rseg = set.get_mut(RsegId(0)).unwrap();

        let mut insert_log = UndoLog::create(RsegId(0), rseg, UndoPageType::Insert, &mut store).unwrap();
        let mut update_log = UndoLog::create(RsegId(0), rseg, UndoPageType::Update, &mut store).unwrap();

        let rec0 = insert_rec(0, 1);
        insert_log.append_record(rseg, &rec0, 0, &mut store).unwrap();
        let rec1 = insert_rec(1, 2);
        update_log.append_record(rseg, &rec1, 1, &mut store).unwrap();

        let mut in_progress = InProgressSet::new();
        let popped = pop_next(
            Some(&mut insert_log),
            Some(&mut update_log),
            0,
            &mut in_progress,
            &mut store,
        )
        .unwrap()
        .unwrap();
        assert_eq!(popped.undo_no, 1);
        assert!(!popped.from_insert_log);
    }

    #[test]
    fn apply_insert_rec_removes_row() {
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 1,
                    roll_ptr: RollPtr::NONE,
                    deleted: false,
                    columns: vec![ColumnValue::from("a")],
                },
            )
            .unwrap();
        let rec = insert_rec(0, 1);
        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
        apply(&rec, &mut clust, &mut secondary).unwrap();
        assert!(clust.get(&pk).is_none());
    }

    #[test]
    fn apply_upd_exist_rec_restores_prior_column_and_syscols() {
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 99,
                    roll_ptr: RollPtr::new(true, 0, 1, 10),
                    deleted: false,
                    columns: vec![ColumnValue::from("new")],
                },
            )
            .unwrap();
        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &pk,
            Some(7),
            Some(RollPtr::NONE),
            0,
            &[FieldChange {
                pos: 0,
                old_value: ColumnValue::from("old"),
            }],
            false,
            &[],
        );
        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
        apply(&rec, &mut clust, &mut secondary).unwrap();
        let row = clust.get(&pk).unwrap();
        assert_eq!(row.columns[0], ColumnValue::from("old"));
        assert_eq!(row.trx_id, 7);
        assert_eq!(row.roll_ptr, RollPtr::NONE);
    }

    #[test]
    fn apply_upd_exist_rec_removes_stale_secondary_entry_when_ordering_changed() {
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 99,
                    roll_ptr: RollPtr::new(true, 0, 1, 10),
                    deleted: false,
                    columns: vec![ColumnValue::from("bob")],
                },
            )
            .unwrap();
        let mut name_index = SecondaryIndex::new();
        name_index.insert(&[ColumnValue::from("bob")], &pk);

        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &pk,
            Some(7),
            Some(RollPtr::NONE),
            0,
            &[FieldChange {
                pos: 0,
                old_value: ColumnValue::from("alice"),
            }],
            false,
            &[ColumnValue::from("alice")],
        );
        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = vec![(&[0], &mut name_index)];
        apply(&rec, &mut clust, &mut secondary).unwrap();

        assert!(!name_index.contains(&[ColumnValue::from("bob")], &pk));
        assert_eq!(clust.get(&pk).unwrap().columns[0], ColumnValue::from("alice"));
    }

    #[test]
    fn apply_del_mark_rec_clears_delete_flag() {
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 2,
                    roll_ptr: RollPtr::NONE,
                    deleted: true,
                    columns: vec![ColumnValue::from("a")],
                },
            )
            .unwrap();
        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &pk,
            Some(1),
            Some(RollPtr::NONE),
            0,
            &[],
            false,
            &[],
        );
        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
        apply(&rec, &mut clust, &mut secondary).unwrap();
        assert!(!clust.get(&pk).unwrap().deleted);
    }

    #[test]
    fn apply_del_mark_rec_reinserts_missing_secondary_entry() {
        // Purge already dropped the secondary entry for this delete-marked
        // row before the rollback caught up to it; clearing the delete-mark
        // must restore it.
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 2,
                    roll_ptr: RollPtr::NONE,
                    deleted: true,
                    columns: vec![ColumnValue::from("alice")],
                },
            )
            .unwrap();
        let mut name_index = SecondaryIndex::new();

        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &pk,
            Some(1),
            Some(RollPtr::NONE),
            0,
            &[],
            false,
            &[],
        );
        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = vec![(&[0], &mut name_index)];
        apply(&rec, &mut clust, &mut secondary).unwrap();

        assert!(name_index.contains(&[ColumnValue::from("alice")], &pk));
    }
}
