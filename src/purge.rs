//! Purge engine (component H): consumes committed update-undo in strict
//! serial-no order across every rollback segment, removing secondary- and
//! clustered-index entries no surviving read view still needs, and
//! eventually truncating the history lists that fed it.
//!
//! Grounded on `row0purge.c`/`trx0purge.c`: `trx_purge_get_next_rec`'s
//! min-heap fetch across rsegs, `row_purge_remove_sec_if_poss`/
//! `row_purge_remove_clust_if_poss`, and `trx_purge_truncate_history`.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use rayon::prelude::*;

use crate::innodb::store::PageStore;
use crate::innodb::undo_page;
use crate::row::{ClusteredCursor, RollPtr, SecondaryIndex};
use crate::rseg::{RollbackSegment, RsegId};
use crate::undo::record::{self, UndoRecType};
use crate::version;
use crate::EngineError;

/// A purge view: the trx-no below which every transaction is complete and
/// no active read view still requires its versions.
#[derive(Debug, Clone, Copy)]
pub struct PurgeView {
    pub low_limit_trx_no: u64,
}

/// One pending purge task: the history-list head of a single rseg, keyed
/// by the trx_no its update-undo header carries.
struct HeapEntry {
    trx_no: u64,
    rseg: RsegId,
    hdr_page: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.trx_no == other.trx_no
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.trx_no.cmp(&other.trx_no)
    }
}

/// A single purge outcome, reported back to the caller for logging/tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PurgeOutcome {
    /// The clustered record was removed (still delete-marked, roll pointer
    /// unchanged since purge).
    ClusteredRemoved,
    /// A later modification already replaced this version; nothing to do.
    Skipped,
}

/// Outcome of a full purge pass: each record's disposition plus the set of
/// history-list header pages that were visited, so the caller can decide
/// which ones `truncate_history` should consider fully purged.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub outcomes: Vec<PurgeOutcome>,
    pub visited_pages: Vec<u32>,
}

/// Drive one purge pass: build the min-heap over every rseg with a
/// non-empty history list, then repeatedly pop the smallest trx_no, purge
/// that record, and re-insert the rseg keyed by its new history-list head
/// (if any remain below the view).
///
/// `fetch_trx_no` reads the trx_no recorded on a history-list head page
/// (callers store this alongside the page, e.g. via
/// [`RollbackSegment::history_list_add`]'s bookkeeping); it is passed in
/// rather than re-derived here since the undo segment header format this
/// engine writes does not duplicate it on-page. It runs over every rseg's
/// history-list head concurrently via `rayon`, mirroring the teacher's use
/// of parallel iterators for independent per-page work.
pub fn run_purge_pass<F>(
    rsegs: &mut [(RsegId, &mut RollbackSegment)],
    view: PurgeView,
    clust: &mut dyn ClusteredCursor,
    secondary: &mut [(&[usize], &mut SecondaryIndex)],
    store: &mut dyn PageStore,
    fetch_trx_no: F,
) -> Result<PurgeReport, EngineError>
where
    F: Fn(u32) -> u64 + Sync,
{
    let candidates: Vec<(RsegId, u32)> = rsegs
        .iter()
        .filter_map(|(id, rseg)| rseg.history_list_iter().next().map(|hdr_page| (*id, hdr_page)))
        .collect();

    let seeds: Vec<HeapEntry> = candidates
        .par_iter()
        .filter_map(|&(id, hdr_page)| {
            let trx_no = fetch_trx_no(hdr_page);
            (trx_no < view.low_limit_trx_no).then_some(HeapEntry {
                trx_no,
                rseg: id,
                hdr_page,
            })
        })
        .collect();

    let mut heap: BinaryHeap<Reverse<HeapEntry>> = seeds.into_iter().map(Reverse).collect();

    let mut report = PurgeReport::default();
    while let Some(Reverse(entry)) = heap.pop() {
        let rseg = rsegs
            .iter_mut()
            .find(|(id, _)| *id == entry.rseg)
            .map(|(_, r)| &mut **r)
            .expect("heap entry references a live rseg");

        let page = store.read_page(entry.hdr_page)?;
        if let Some(rec_offset) = undo_page::get_first_rec(&page) {
            let rec_bytes = undo_page::record_body(&page, rec_offset).to_vec();
            let this_undo_roll_ptr = RollPtr::new(false, entry.rseg.0, entry.hdr_page, rec_offset);
            let outcome = purge_one(&rec_bytes, this_undo_roll_ptr, clust, secondary, store)?;
            report.outcomes.push(outcome);
        }
        report.visited_pages.push(entry.hdr_page);

        // The header page's own record was consumed conceptually; whether
        // more records remain behind it is driven by the segment's page
        // list, which `RollbackSegment::truncate_history` reasons about
        // once every record on a page has been purged. Here we only
        // re-queue the same rseg if its history-list head is still below
        // the view (another record may remain on a later page).
        if let Some(hdr_page) = rseg.history_list_iter().next() {
            let trx_no = fetch_trx_no(hdr_page);
            if trx_no < view.low_limit_trx_no && hdr_page != entry.hdr_page {
                heap.push(Reverse(HeapEntry {
                    trx_no,
                    rseg: entry.rseg,
                    hdr_page,
                }));
            }
        }
    }

    Ok(report)
}

/// Purge a single update-undo record: drop stale secondary entries, then
/// the clustered record itself if it is still delete-marked and its roll
/// pointer still names the undo being purged.
fn purge_one(
    rec_bytes: &[u8],
    this_undo_roll_ptr: RollPtr,
    clust: &mut dyn ClusteredCursor,
    secondary: &mut [(&[usize], &mut SecondaryIndex)],
    store: &mut dyn PageStore,
) -> Result<PurgeOutcome, EngineError> {
    let parsed = record::parse_record(rec_bytes)?;
    if parsed.header.rec_type == UndoRecType::InsertRec {
        return Ok(PurgeOutcome::Skipped);
    }

    let current = match clust.get(&parsed.pk) {
        Some(row) => row,
        None => return Ok(PurgeOutcome::Skipped),
    };

    if parsed.header.ext_updated() && !parsed.old_ordering_values.is_empty() {
        for (ordering_positions, index) in secondary.iter_mut() {
            let still_needed = version::old_has_index_entry(
                false,
                &current,
                &parsed.old_ordering_values,
                ordering_positions,
                |a, b| a == b,
                store,
            )?;
            if !still_needed {
                index.remove(&parsed.old_ordering_values, &parsed.pk);
            }
        }
    }

    // `row_purge_remove_clust_if_poss_low` gates the clustered delete on the
    // live row's roll pointer still naming this exact undo record — a later
    // modification can leave the row delete-marked again under a different
    // roll pointer, and that later version is not this purge pass's to
    // remove.
    let matches_this_undo = current.deleted && current.roll_ptr == this_undo_roll_ptr;
    if matches_this_undo {
        clust.remove(&parsed.pk)?;
        return Ok(PurgeOutcome::ClusteredRemoved);
    }
    Ok(PurgeOutcome::Skipped)
}

/// History-list truncation: drop segments from the tail of every rseg's
/// list once `is_fully_purged` reports every record on them has been
/// purged, freeing their pages via the rollback segment manager.
pub fn truncate_history(
    rsegs: &mut [(RsegId, &mut RollbackSegment)],
    mut is_fully_purged: impl FnMut(u32) -> bool,
    store: &mut dyn PageStore,
) {
    for (_, rseg) in rsegs.iter_mut() {
        rseg.truncate_history(&mut is_fully_purged, store);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::innodb::store::InMemoryPageStore;
    use crate::innodb::undo_page::UndoPageType;
    use crate::row::{ClusteredIndex, RollPtr as RP, Row};
    use crate::rseg::RollbackSegmentSet;
    use crate::undo::log::UndoLog;
    use crate::undo::record::{report_row_operation, RowOp};
    use serde_json::Value as ColumnValue;

    #[test]
    fn purge_removes_delete_marked_row_with_matching_roll_ptr() {
        let mut store = InMemoryPageStore::new(16384);
        let mut set = RollbackSegmentSet::new(1);
        set.create(crate::rseg::RsegId(0), &mut store).unwrap();
        let rseg = set.get_mut(crate::rseg::RsegId(0)).unwrap();
        let mut log = UndoLog::create(crate::rseg::RsegId(0), rseg, UndoPageType::Update, &mut store).unwrap();

        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &[ColumnValue::from(1)],
            Some(1),
            Some(RP::NONE),
            0,
            &[],
            false,
            &[],
        );
        let (page_no, offset) = log.append_record(rseg, &rec, 0, &mut store).unwrap();
        let this_undo_roll_ptr = RP::new(false, 0, page_no, offset);

        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 2,
                    roll_ptr: this_undo_roll_ptr,
                    deleted: true,
                    columns: vec![ColumnValue::from("a")],
                },
            )
            .unwrap();

        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
        let outcome = purge_one(&rec, this_undo_roll_ptr, &mut clust, &mut secondary, &mut store).unwrap();
        assert_eq!(outcome, PurgeOutcome::ClusteredRemoved);
        assert!(clust.get(&pk).is_none());
    }

    #[test]
    fn purge_skips_row_no_longer_delete_marked() {
        let mut store = InMemoryPageStore::new(16384);
        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &[ColumnValue::from(1)],
            Some(1),
            Some(RP::NONE),
            0,
            &[],
            false,
            &[],
        );
        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 2,
                    roll_ptr: RP::NONE,
                    deleted: false,
                    columns: vec![ColumnValue::from("a")],
                },
            )
            .unwrap();

        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
        let outcome = purge_one(&rec, RP::NONE, &mut clust, &mut secondary, &mut store).unwrap();
        assert_eq!(outcome, PurgeOutcome::Skipped);
        assert!(clust.get(&pk).is_some());
    }

    #[test]
    fn purge_skips_delete_marked_row_with_stale_roll_ptr() {
        // A later transaction re-delete-marked the row under a fresh undo
        // record after this one was written; the live roll pointer no
        // longer names the undo record this purge pass is working through,
        // so the clustered row must survive this pass.
        let mut store = InMemoryPageStore::new(16384);
        let mut set = RollbackSegmentSet::new(1);
        set.create(crate::rseg::RsegId(0), &mut store).unwrap();
        let rseg = set.get_mut(crate::rseg::RsegId(0)).unwrap();
        let mut log = UndoLog::create(crate::rseg::RsegId(0), rseg, UndoPageType::Update, &mut store).unwrap();

        let rec = report_row_operation(
            RowOp::Modify,
            1,
            0,
            0,
            &[ColumnValue::from(1)],
            Some(1),
            Some(RP::NONE),
            0,
            &[],
            false,
            &[],
        );
        let (page_no, offset) = log.append_record(rseg, &rec, 0, &mut store).unwrap();
        let this_undo_roll_ptr = RP::new(false, 0, page_no, offset);
        let newer_roll_ptr = RP::new(false, 0, page_no, offset + 1);

        let mut clust = ClusteredIndex::new();
        let pk = vec![ColumnValue::from(1)];
        clust
            .insert(
                pk.clone(),
                Row {
                    trx_id: 3,
                    roll_ptr: newer_roll_ptr,
                    deleted: true,
                    columns: vec![ColumnValue::from("b")],
                },
            )
            .unwrap();

        let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
        let outcome = purge_one(&rec, this_undo_roll_ptr, &mut clust, &mut secondary, &mut store).unwrap();
        assert_eq!(outcome, PurgeOutcome::Skipped);
        assert!(clust.get(&pk).is_some());
    }

    #[test]
    fn truncate_history_drops_fully_purged_tail() {
        let mut store = InMemoryPageStore::new(16384);
        let mut set = RollbackSegmentSet::new(1);
        set.create(crate::rseg::RsegId(0), &mut store).unwrap();
        let rseg = set.get_mut(crate::rseg::RsegId(0)).unwrap();
        rseg.history_list_add(10, 1);
        rseg.history_list_add(20, 2);

        let mut rsegs: Vec<(RsegId, &mut RollbackSegment)> = vec![(crate::rseg::RsegId(0), rseg)];
        truncate_history(&mut rsegs, |page| page == 10, &mut store);
        assert_eq!(rseg_history(&mut set), vec![20]);
    }

    fn rseg_history(set: &mut RollbackSegmentSet) -> Vec<u32> {
        set.get(crate::rseg::RsegId(0))
            .unwrap()
            .history_list_iter()
            .collect()
    }
}
