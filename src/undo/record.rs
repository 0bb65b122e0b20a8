//! Undo record builder (component B): serializes INSERT / UPDATE /
//! DELETE-MARK undo records and parses them back.
//!
//! Record layout (see spec.md §3/§6), encoded with the much-compressed
//! integers from [`crate::mach`]:
//!
//! ```text
//! type_compl      1 byte   (low nibble = type, high nibble = compiler-info flags)
//! undo_no         varint
//! table_id        varint
//! [MODIFY only:]
//!   info_bits     1 byte
//!   trx_id        varint
//!   roll_ptr      varint (packed u64)
//! pk field count  varint
//! pk fields       [varint length][bytes] * count
//! [MODIFY with update_vec:]
//!   changed count varint
//!   changed       [varint pos][varint length][bytes] * count
//! [MODIFY, ordering could change:]
//!   ord count     varint
//!   ord values    [varint length][bytes] * count
//! ```
//!
//! The 2-byte next-pointer/back-pointer record *envelope* on the page is
//! the page codec's concern (component A), not this module's.

use std::io::Cursor;

use serde_json::Value as ColumnValue;

use crate::mach::{read_much_compressed, write_much_compressed};
use crate::row::RollPtr;
use crate::EngineError;

/// Flag bit (high nibble of the type-compl byte) signaling that no
/// index-ordering field changed, so secondary-index cleanup can be skipped
/// at purge time. See spec.md §9 "Compiler info" field.
pub const NO_ORD_CHANGE: u8 = 0x10;

/// The kind of DML operation an undo record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoRecType {
    InsertRec,
    UpdExistRec,
    UpdDelRec,
    DelMarkRec,
}

impl UndoRecType {
    fn as_nibble(self) -> u8 {
        match self {
            UndoRecType::InsertRec => 1,
            UndoRecType::UpdExistRec => 2,
            UndoRecType::UpdDelRec => 3,
            UndoRecType::DelMarkRec => 4,
        }
    }

    fn from_nibble(v: u8) -> Result<Self, EngineError> {
        match v {
            1 => Ok(UndoRecType::InsertRec),
            2 => Ok(UndoRecType::UpdExistRec),
            3 => Ok(UndoRecType::UpdDelRec),
            4 => Ok(UndoRecType::DelMarkRec),
            other => Err(EngineError::Corruption(format!(
                "unknown undo record type nibble {other}"
            ))),
        }
    }
}

/// The DML operation that produced an undo record, as seen by
/// `report_row_operation`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOp {
    Insert,
    Modify,
}

/// A single changed-field entry: column position and its prior value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    pub pos: u32,
    pub old_value: ColumnValue,
}

/// Header fields common to every undo record, extracted by `parse_header`.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoRecHeader {
    pub rec_type: UndoRecType,
    pub compl_info: u8,
    pub undo_no: u64,
    pub table_id: u64,
}

impl UndoRecHeader {
    pub fn ext_updated(&self) -> bool {
        self.compl_info & NO_ORD_CHANGE == 0
    }
}

/// A fully parsed undo record.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoRecord {
    pub header: UndoRecHeader,
    /// Present for MODIFY record types; absent for plain INSERT.
    pub prior_trx_id: Option<u64>,
    pub prior_roll_ptr: Option<RollPtr>,
    pub info_bits: u8,
    pub pk: Vec<ColumnValue>,
    pub update_vec: Vec<FieldChange>,
    pub old_ordering_values: Vec<ColumnValue>,
}

fn write_value<W: std::io::Write>(w: &mut W, value: &ColumnValue) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(value).expect("column value serializes");
    write_much_compressed(&mut *w, bytes.len() as u64)?;
    w.write_all(&bytes)
}

fn read_value(cur: &mut Cursor<&[u8]>) -> Result<ColumnValue, EngineError> {
    let len = read_much_compressed(&mut *cur)
        .map_err(|e| EngineError::Corruption(format!("bad value length: {e}")))? as usize;
    let pos = cur.position() as usize;
    let buf = cur.get_ref();
    if pos + len > buf.len() {
        return Err(EngineError::Corruption("truncated value".to_string()));
    }
    let value: ColumnValue = serde_json::from_slice(&buf[pos..pos + len])
        .map_err(|e| EngineError::Corruption(format!("bad column value: {e}")))?;
    cur.set_position((pos + len) as u64);
    Ok(value)
}

/// Build a row-operation undo record, implementing `report_row_operation`.
///
/// For `RowOp::Modify` with an empty `update_vec`, the record type is
/// `DEL_MARK_REC`; otherwise `UPD_EXIST_REC`, or `UPD_DEL_REC` when
/// `already_delete_marked` is true (the old record was already
/// delete-marked, so purge may later free its external fields).
#[allow(clippy::too_many_arguments)]
pub fn report_row_operation(
    op: RowOp,
    table_id: u64,
    undo_no: u64,
    compl_info: u8,
    pk: &[ColumnValue],
    prior_trx_id: Option<u64>,
    prior_roll_ptr: Option<RollPtr>,
    info_bits: u8,
    update_vec: &[FieldChange],
    already_delete_marked: bool,
    old_ordering_values: &[ColumnValue],
) -> Vec<u8> {
    let rec_type = match op {
        RowOp::Insert => UndoRecType::InsertRec,
        RowOp::Modify if update_vec.is_empty() => UndoRecType::DelMarkRec,
        RowOp::Modify if already_delete_marked => UndoRecType::UpdDelRec,
        RowOp::Modify => UndoRecType::UpdExistRec,
    };

    let mut buf = Vec::new();
    buf.push(rec_type.as_nibble() | (compl_info & 0xF0));
    write_much_compressed(&mut buf, undo_no).unwrap();
    write_much_compressed(&mut buf, table_id).unwrap();

    if rec_type != UndoRecType::InsertRec {
        buf.push(info_bits);
        write_much_compressed(&mut buf, prior_trx_id.unwrap_or(0)).unwrap();
        write_much_compressed(&mut buf, prior_roll_ptr.unwrap_or(RollPtr::NONE).0).unwrap();
    }

    write_much_compressed(&mut buf, pk.len() as u64).unwrap();
    for field in pk {
        write_value(&mut buf, field).unwrap();
    }

    if rec_type != UndoRecType::InsertRec {
        write_much_compressed(&mut buf, update_vec.len() as u64).unwrap();
        for change in update_vec {
            write_much_compressed(&mut buf, change.pos as u64).unwrap();
            write_value(&mut buf, &change.old_value).unwrap();
        }

        if compl_info & NO_ORD_CHANGE == 0 {
            write_much_compressed(&mut buf, old_ordering_values.len() as u64).unwrap();
            for value in old_ordering_values {
                write_value(&mut buf, value).unwrap();
            }
        }
    }

    buf
}

/// Parse only the common header fields (cheap, used by the rollback driver
/// to dispatch on record type before fully parsing).
pub fn parse_header(rec: &[u8]) -> Result<UndoRecHeader, EngineError> {
    if rec.is_empty() {
        return Err(EngineError::Corruption("empty undo record".to_string()));
    }
    let type_compl = rec[0];
    let rec_type = UndoRecType::from_nibble(type_compl & 0x0F)?;
    let compl_info = type_compl & 0xF0;
    let mut cur = Cursor::new(&rec[1..]);
    let undo_no = read_much_compressed(&mut cur)
        .map_err(|e| EngineError::Corruption(format!("bad undo_no: {e}")))?;
    let table_id = read_much_compressed(&mut cur)
        .map_err(|e| EngineError::Corruption(format!("bad table_id: {e}")))?;
    Ok(UndoRecHeader {
        rec_type,
        compl_info,
        undo_no,
        table_id,
    })
}

/// Fully parse an undo record.
pub fn parse_record(rec: &[u8]) -> Result<UndoRecord, EngineError> {
    let header = parse_header(rec)?;
    // Re-derive the cursor position past the header fields we already read.
    let mut cur = Cursor::new(&rec[1..]);
    let _ = read_much_compressed(&mut cur);
    let _ = read_much_compressed(&mut cur);

    let (prior_trx_id, prior_roll_ptr, info_bits) = if header.rec_type != UndoRecType::InsertRec {
        let info_bits = {
            let pos = cur.position() as usize;
            let b = *cur
                .get_ref()
                .get(pos)
                .ok_or_else(|| EngineError::Corruption("truncated info_bits".to_string()))?;
            cur.set_position((pos + 1) as u64);
            b
        };
        let trx_id = read_much_compressed(&mut cur)
            .map_err(|e| EngineError::Corruption(format!("bad prior trx_id: {e}")))?;
        let roll_ptr = read_much_compressed(&mut cur)
            .map_err(|e| EngineError::Corruption(format!("bad prior roll_ptr: {e}")))?;
        (Some(trx_id), Some(RollPtr(roll_ptr)), info_bits)
    } else {
        (None, None, 0)
    };

    let pk_count = read_much_compressed(&mut cur)
        .map_err(|e| EngineError::Corruption(format!("bad pk count: {e}")))?;
    let mut pk = Vec::with_capacity(pk_count as usize);
    for _ in 0..pk_count {
        pk.push(read_value(&mut cur)?);
    }

    let mut update_vec = Vec::new();
    let mut old_ordering_values = Vec::new();
    if header.rec_type != UndoRecType::InsertRec {
        let change_count = read_much_compressed(&mut cur)
            .map_err(|e| EngineError::Corruption(format!("bad change count: {e}")))?;
        for _ in 0..change_count {
            let pos = read_much_compressed(&mut cur)
                .map_err(|e| EngineError::Corruption(format!("bad change pos: {e}")))?
                as u32;
            let old_value = read_value(&mut cur)?;
            update_vec.push(FieldChange { pos, old_value });
        }

        if header.ext_updated() {
            let ord_count = read_much_compressed(&mut cur)
                .map_err(|e| EngineError::Corruption(format!("bad ordering count: {e}")))?;
            for _ in 0..ord_count {
                old_ordering_values.push(read_value(&mut cur)?);
            }
        }
    }

    Ok(UndoRecord {
        header,
        prior_trx_id,
        prior_roll_ptr,
        info_bits,
        pk,
        update_vec,
        old_ordering_values,
    })
}

/// `get_row_ref`: materialise just the primary key columns.
pub fn get_row_ref(rec: &[u8]) -> Result<Vec<ColumnValue>, EngineError> {
    Ok(parse_record(rec)?.pk)
}

/// `get_update`: the update vector, always carrying synthetic (trx-id,
/// roll-ptr) restores so applying it to a row restores the system columns
/// too. The synthetic entries use sentinel positions `u32::MAX` (trx_id)
/// and `u32::MAX - 1` (roll_ptr) since real column positions never reach
/// that range.
pub const SYSCOL_TRX_ID_POS: u32 = u32::MAX;
pub const SYSCOL_ROLL_PTR_POS: u32 = u32::MAX - 1;

pub fn get_update(rec: &[u8]) -> Result<Vec<FieldChange>, EngineError> {
    let parsed = parse_record(rec)?;
    let mut update_vec = parsed.update_vec;
    if let Some(trx_id) = parsed.prior_trx_id {
        update_vec.push(FieldChange {
            pos: SYSCOL_TRX_ID_POS,
            old_value: ColumnValue::from(trx_id),
        });
    }
    if let Some(roll_ptr) = parsed.prior_roll_ptr {
        update_vec.push(FieldChange {
            pos: SYSCOL_ROLL_PTR_POS,
            old_value: ColumnValue::from(roll_ptr.0),
        });
    }
    Ok(update_vec)
}

/// `get_partial_row`: only the ordering-field columns recorded for
/// secondary-index maintenance.
pub fn get_partial_row(rec: &[u8]) -> Result<Vec<ColumnValue>, EngineError> {
    Ok(parse_record(rec)?.old_ordering_values)
}
