//! Version reader (component G): reconstructs the row version visible to a
//! read view by walking the roll-pointer chain backward through undo
//! records.
//!
//! Grounded on `row0vers.c`: `row_vers_build_for_consistent_read`'s walk
//! and `row_vers_old_has_index_entry`'s secondary-index predicate used by
//! purge.

use crate::innodb::store::PageStore;
use crate::innodb::undo_page;
use crate::row::{Row, RollPtr};
use crate::undo::record::{self, SYSCOL_ROLL_PTR_POS, SYSCOL_TRX_ID_POS};
use crate::EngineError;

/// Decides which transactions are visible to a reader.
pub trait ReadView {
    /// True if a version committed/owned by `trx_id` is visible under this
    /// view.
    fn sees(&self, trx_id: u64) -> bool;
}

/// A snapshot view: a fixed set of ids invisible to it (transactions that
/// were active, or not yet started, as of the snapshot), plus the
/// snapshot's low-water mark (every id below it is visible).
#[derive(Debug, Clone)]
pub struct SnapshotView {
    pub low_limit_id: u64,
    pub invisible_ids: Vec<u64>,
}

impl ReadView for SnapshotView {
    fn sees(&self, trx_id: u64) -> bool {
        trx_id < self.low_limit_id && !self.invisible_ids.contains(&trx_id)
    }
}

/// A semi-consistent view: sees every *committed* version; the caller
/// supplies the set of currently-active transaction ids since "committed"
/// is otherwise only known by the transaction table, not by this module.
#[derive(Debug, Clone)]
pub struct SemiConsistentView<'a> {
    pub active_ids: &'a [u64],
}

impl ReadView for SemiConsistentView<'_> {
    fn sees(&self, trx_id: u64) -> bool {
        !self.active_ids.contains(&trx_id)
    }
}

/// Resolve the undo record a roll pointer names into its (page, offset,
/// bytes). Returns `MissingHistory` if the page no longer carries a record
/// at that offset (the undo has been purged).
fn fetch_undo_record(
    roll_ptr: RollPtr,
    store: &mut dyn PageStore,
) -> Result<Vec<u8>, EngineError> {
    let page = store.read_page(roll_ptr.page_no())?;
    let offset = roll_ptr.offset();
    let hdr = undo_page::UndoPageHeader::parse(&page)
        .ok_or_else(|| EngineError::Corruption("bad undo page header".to_string()))?;
    if offset < hdr.start || offset >= hdr.free {
        return Err(EngineError::MissingHistory);
    }
    Ok(undo_page::record_body(&page, offset).to_vec())
}

fn apply_inverse(row: &mut Row, rec_bytes: &[u8]) -> Result<(), EngineError> {
    for change in record::get_update(rec_bytes)? {
        match change.pos {
            SYSCOL_TRX_ID_POS => {
                if let Some(v) = change.old_value.as_u64() {
                    row.trx_id = v;
                }
            }
            SYSCOL_ROLL_PTR_POS => {
                if let Some(v) = change.old_value.as_u64() {
                    row.roll_ptr = RollPtr(v);
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
    Ok(())
}

/// `build_for_consistent_read` / the semi-consistent variant: walk `rec`'s
/// version chain backward until a version visible to `view` is found.
/// Returns `Ok(None)` if the chain bottoms out at an INSERT (no prior
/// version exists, meaning the row is entirely outside the view).
pub fn build_for_read(
    rec: &Row,
    view: &dyn ReadView,
    store: &mut dyn PageStore,
) -> Result<Option<Row>, EngineError> {
    if view.sees(rec.trx_id) {
        return Ok(Some(rec.clone()));
    }

    let mut current = rec.clone();
    loop {
        if current.roll_ptr.is_none() || current.roll_ptr.is_insert() {
            return Ok(None);
        }
        let rec_bytes = fetch_undo_record(current.roll_ptr, store)?;
        let parsed = record::parse_record(&rec_bytes)?;
        let prior_trx_id = parsed
            .prior_trx_id
            .ok_or_else(|| EngineError::Corruption("modify record missing prior trx id".to_string()))?;

        apply_inverse(&mut current, &rec_bytes)?;
        if parsed.header.rec_type == record::UndoRecType::DelMarkRec {
            current.deleted = false;
        }

        if view.sees(prior_trx_id) {
            return Ok(Some(current));
        }
    }
}

/// `old_has_index_entry`: true iff some version at-or-older than `rec`
/// is not delete-marked and would produce `target_entry` (compared by
/// `entry_eq`, a collation-aware equality — byte equality is not enough
/// since e.g. case-insensitive collations can make distinct byte strings
/// collide in the index) as its secondary-index entry.
pub fn old_has_index_entry<F>(
    include_current: bool,
    rec: &Row,
    target_entry: &[serde_json::Value],
    ordering_positions: &[usize],
    mut entry_eq: F,
    store: &mut dyn PageStore,
) -> Result<bool, EngineError>
where
    F: FnMut(&[serde_json::Value], &[serde_json::Value]) -> bool,
{
    let ordering_of = |row: &Row| -> Vec<serde_json::Value> {
        ordering_positions
            .iter()
            .map(|&p| row.columns.get(p).cloned().unwrap_or(serde_json::Value::Null))
            .collect()
    };

    let mut current = rec.clone();
    if include_current && !current.deleted && entry_eq(&ordering_of(&current), target_entry) {
        return Ok(true);
    }

    loop {
        if current.roll_ptr.is_none() || current.roll_ptr.is_insert() {
            return Ok(false);
        }
        let rec_bytes = fetch_undo_record(current.roll_ptr, store)?;
        apply_inverse(&mut current, &rec_bytes)?;
        let header = record::parse_header(&rec_bytes)?;
        if header.rec_type == record::UndoRecType::DelMarkRec {
            current.deleted = false;
        }

        if !current.deleted && entry_eq(&ordering_of(&current), target_entry) {
            return Ok(true);
        }
    }
}
