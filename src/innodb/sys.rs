//! The transaction system page (TRX_SYS): a fixed, well-known page in the
//! system tablespace carrying the next-trx-id counter and the rollback
//! segment slot array. Grounded on `trx0sys.c`/`trx0sys.h` in the original
//! source and laid out in the same byte-big-endian style as the teacher's
//! other page structures.

use byteorder::{BigEndian, ByteOrder};

use crate::innodb::constants::{FIL_NULL, FIL_PAGE_DATA, N_RSEGS, TRX_ID_WRITE_MARGIN};
use crate::EngineError;

/// Offset of the next-trx-id counter (8 bytes), relative to FIL_PAGE_DATA.
const TRX_SYS_TRX_ID_STORE: usize = 0;
/// Offset of the rollback segment slot array, relative to FIL_PAGE_DATA.
const TRX_SYS_RSEGS: usize = 8;
/// Each slot is (space_id: u32, page_no: u32).
const TRX_SYS_RSEG_SLOT_SIZE: usize = 8;
/// Opaque doublewrite-buffer descriptor and binlog/replica-master-log blocks
/// follow the rseg array; persisted and round-tripped but never interpreted.
const TRX_SYS_OPAQUE_SIZE: usize = 256;

const TRX_SYS_RSEGS_END: usize = TRX_SYS_RSEGS + N_RSEGS * TRX_SYS_RSEG_SLOT_SIZE;
const TRX_SYS_OPAQUE_OFFSET: usize = TRX_SYS_RSEGS_END;
const TRX_SYS_PAGE_MIN_SIZE: usize =
    FIL_PAGE_DATA + TRX_SYS_OPAQUE_OFFSET + TRX_SYS_OPAQUE_SIZE;

/// In-memory view of the TRX_SYS page.
#[derive(Debug, Clone)]
pub struct TrxSysPage {
    /// Next id to hand out; kept in memory ahead of the on-disk stride.
    next_trx_id: u64,
    /// On-disk high-water mark; `next_trx_id` never exceeds this without a
    /// flush bumping it forward by `TRX_ID_WRITE_MARGIN`.
    disk_limit: u64,
    /// Rollback segment slots: `(space_id, page_no)`, or `None` if empty.
    rseg_slots: Vec<Option<(u32, u32)>>,
    /// Doublewrite descriptor + binlog/replica-log blocks, opaque to this
    /// engine; persisted and restored verbatim across commit boundaries.
    opaque: Vec<u8>,
}

impl TrxSysPage {
    /// Construct a fresh TRX_SYS page with an empty rseg array and the
    /// trx-id counter starting at 1 (id 0 is reserved as "none" in the
    /// original source).
    pub fn new() -> Self {
        TrxSysPage {
            next_trx_id: 1,
            disk_limit: TRX_ID_WRITE_MARGIN,
            rseg_slots: vec![None; N_RSEGS],
            opaque: vec![0u8; TRX_SYS_OPAQUE_SIZE],
        }
    }

    /// Parse a TRX_SYS page from a full page buffer.
    pub fn parse(page_data: &[u8]) -> Result<Self, EngineError> {
        if page_data.len() < TRX_SYS_PAGE_MIN_SIZE {
            return Err(EngineError::Corruption(
                "TRX_SYS page too short".to_string(),
            ));
        }
        let base = &page_data[FIL_PAGE_DATA..];
        let next_trx_id = BigEndian::read_u64(&base[TRX_SYS_TRX_ID_STORE..]);

        let mut rseg_slots = Vec::with_capacity(N_RSEGS);
        for i in 0..N_RSEGS {
            let off = TRX_SYS_RSEGS + i * TRX_SYS_RSEG_SLOT_SIZE;
            let space_id = BigEndian::read_u32(&base[off..]);
            let page_no = BigEndian::read_u32(&base[off + 4..]);
            if page_no == FIL_NULL {
                rseg_slots.push(None);
            } else {
                rseg_slots.push(Some((space_id, page_no)));
            }
        }

        let opaque =
            base[TRX_SYS_OPAQUE_OFFSET..TRX_SYS_OPAQUE_OFFSET + TRX_SYS_OPAQUE_SIZE].to_vec();

        Ok(TrxSysPage {
            next_trx_id,
            disk_limit: next_trx_id + TRX_ID_WRITE_MARGIN,
            rseg_slots,
            opaque,
        })
    }

    /// Serialize into a full page buffer (caller supplies the FIL header
    /// bytes before FIL_PAGE_DATA separately; this only writes the body).
    pub fn write_into(&self, page_data: &mut [u8]) -> Result<(), EngineError> {
        if page_data.len() < TRX_SYS_PAGE_MIN_SIZE {
            return Err(EngineError::Corruption(
                "TRX_SYS page buffer too short".to_string(),
            ));
        }
        let base = &mut page_data[FIL_PAGE_DATA..];
        BigEndian::write_u64(&mut base[TRX_SYS_TRX_ID_STORE..], self.disk_limit);
        for (i, slot) in self.rseg_slots.iter().enumerate() {
            let off = TRX_SYS_RSEGS + i * TRX_SYS_RSEG_SLOT_SIZE;
            match slot {
                Some((space_id, page_no)) => {
                    BigEndian::write_u32(&mut base[off..], *space_id);
                    BigEndian::write_u32(&mut base[off + 4..], *page_no);
                }
                None => {
                    BigEndian::write_u32(&mut base[off..], 0);
                    BigEndian::write_u32(&mut base[off + 4..], FIL_NULL);
                }
            }
        }
        base[TRX_SYS_OPAQUE_OFFSET..TRX_SYS_OPAQUE_OFFSET + TRX_SYS_OPAQUE_SIZE]
            .copy_from_slice(&self.opaque);
        Ok(())
    }

    /// Allocate the next transaction id, advancing the on-disk stride
    /// counter when the in-memory value catches up to it.
    ///
    /// Mirrors `trx_sys_get_new_trx_id`: the in-memory counter increments on
    /// every call; the on-disk value is only bumped (and would be
    /// redo-logged / flushed by the caller) every `TRX_ID_WRITE_MARGIN`
    /// allocations, so that a crash never hands out an id that was already
    /// used before the crash.
    pub fn next_trx_id(&mut self) -> u64 {
        let id = self.next_trx_id;
        self.next_trx_id += 1;
        if self.next_trx_id > self.disk_limit {
            self.disk_limit = self.next_trx_id + TRX_ID_WRITE_MARGIN;
        }
        id
    }

    /// Returns the on-disk high-water value the counter must never exceed
    /// without first advancing `disk_limit`; on recovery this is bumped by
    /// `2 * TRX_ID_WRITE_MARGIN` as an extra safety margin.
    pub fn recover_disk_limit(&mut self) {
        self.disk_limit = self.next_trx_id + 2 * TRX_ID_WRITE_MARGIN;
    }

    /// Peek the next id that would be handed out by `next_trx_id`, without
    /// consuming it.
    pub fn peek_next_trx_id(&self) -> u64 {
        self.next_trx_id
    }

    /// Find the first free (NULL) rollback segment slot.
    pub fn find_free_slot(&self) -> Option<usize> {
        self.rseg_slots.iter().position(|s| s.is_none())
    }

    /// Assign a slot to a new rollback segment header page.
    pub fn set_slot(&mut self, slot: usize, space_id: u32, page_no: u32) {
        self.rseg_slots[slot] = Some((space_id, page_no));
    }

    /// Clear a slot (rseg dropped).
    pub fn clear_slot(&mut self, slot: usize) {
        self.rseg_slots[slot] = None;
    }

    /// Iterate over the occupied slots as `(slot_no, space_id, page_no)`.
    pub fn occupied_slots(&self) -> impl Iterator<Item = (usize, u32, u32)> + '_ {
        self.rseg_slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.map(|(space, page)| (i, space, page)))
    }

    /// Opaque doublewrite/binlog block, round-tripped but never interpreted.
    pub fn opaque_block(&self) -> &[u8] {
        &self.opaque
    }

    /// Overwrite the opaque block (e.g. when restoring from a backup).
    pub fn set_opaque_block(&mut self, bytes: &[u8]) {
        let n = bytes.len().min(self.opaque.len());
        self.opaque[..n].copy_from_slice(&bytes[..n]);
    }
}

impl Default for TrxSysPage {
    fn default() -> Self {
        Self::new()
    }
}
