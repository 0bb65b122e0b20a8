//! InnoDB page and file structure constants.
//!
//! These values are derived from the MySQL/InnoDB source code headers:
//! - `fil0fil.h` (FIL header/trailer)
//! - `page0page.h` (page header)
//! - `fsp0fsp.h` (FSP header)

// ── Page sizes ──────────────────────────────────────────────────────

/// Default InnoDB page size (16 KiB).
pub const SIZE_PAGE_DEFAULT: u32 = 16384;

// ── FIL Header (38 bytes total) ─────────────────────────────────────

/// Offset of the checksum (or space id in older formats). 4 bytes.
pub const FIL_PAGE_SPACE_OR_CHKSUM: usize = 0;
/// Offset of the page number within the tablespace. 4 bytes.
pub const FIL_PAGE_OFFSET: usize = 4;
/// Offset of the flush LSN (only page 0 of system tablespace). 8 bytes.
pub const FIL_PAGE_FILE_FLUSH_LSN: usize = 26;

// ── FIL Trailer (8 bytes total) ─────────────────────────────────────

/// Size of the FIL trailer in bytes.
pub const SIZE_FIL_TRAILER: usize = 8;
// Trailer is at: page_size - SIZE_FIL_TRAILER
// old-style checksum: offset 0 within trailer (4 bytes)
// low 32 bits of LSN: offset 4 within trailer (4 bytes)

/// Start of page data (immediately after FIL header).
pub const FIL_PAGE_DATA: usize = 38;

// ── Special values ──────────────────────────────────────────────────

/// Null page reference (0xFFFFFFFF / 4294967295).
pub const FIL_NULL: u32 = 0xFFFFFFFF;

// ── Rollback segment / undo log system constants ────────────────────
// Derived from trx0sys.h, trx0rseg.h, trx0undo.h in the original source.

/// Number of rollback segment slots in the TRX_SYS page. The original codebase
/// (trx0sys.h, `TRX_SYS_N_RSEGS`) uses 128, sized to the order of magnitude of
/// the worker thread count.
pub const N_RSEGS: usize = 128;

/// Number of undo-log-segment slots in a single rollback segment's array
/// (trx0rseg.h, `TRX_RSEG_N_SLOTS`).
pub const N_SLOTS: usize = 1024;

/// Stride at which the next-trx-id counter is advanced to disk
/// (trx0sys.h, `TRX_SYS_TRX_ID_WRITE_MARGIN`). The in-memory counter may run
/// ahead of the on-disk value by up to this many ids between flushes; on
/// recovery the on-disk value is bumped by `2 * TRX_ID_WRITE_MARGIN` to
/// guarantee no id is reused across a crash.
pub const TRX_ID_WRITE_MARGIN: u64 = 256;

/// Default universal page size used by this engine's undo pages, matching
/// `UNIV_PAGE_SIZE` for a standard (non-compressed) installation.
pub const UNIV_PAGE_SIZE: u32 = SIZE_PAGE_DEFAULT;

/// Trailing bytes reserved at the end of every page for the FIL trailer
/// (`FIL_PAGE_DATA_END` in the original source).
pub const FIL_PAGE_DATA_END: usize = SIZE_FIL_TRAILER;

/// Safety margin subtracted from the nominal free-space budget before an
/// undo record is judged to "fit" on a page (trx0undo.c comments on
/// `trx_undo_page_report_modify`/`report_insert`).
pub const TRX_UNDO_PAGE_REUSE_SAFETY_MARGIN: usize = 10;

/// Computes the reuse-size limit below which a size-1 undo log's first page
/// is cached rather than freed at commit.
///
/// `trx0undo.c`: `TRX_UNDO_PAGE_REUSE_LIMIT = 3 << (page_size_shift - 2)`,
/// i.e. 3/4 of a page once the page-size exponent (log2 of page size) is
/// known. Not a fixed constant — it scales with page size.
pub fn reuse_limit(page_size: u32) -> u16 {
    let shift = page_size.trailing_zeros();
    (3u32 << (shift - 2)) as u16
}

/// Number of pages undone by a rollback worker between history-list
/// truncation passes (`TRX_UNDO_TRUNCATE_FREQUENCY`-equivalent threshold
/// named `TRUNC_THRESHOLD` in §4.F of the design).
pub const TRUNC_THRESHOLD: u32 = 2000;

/// Fixed length of an undo log header before any XA extension
/// (`TRX_UNDO_LOG_OLD_HDR_SIZE`).
pub const TRX_UNDO_LOG_OLD_HDR_SIZE: usize = 34 + 12; // fixed fields + history-list node

/// Length added to the undo log header when the transaction declares XA
/// support (`TRX_UNDO_LOG_XA_HDR_SIZE - TRX_UNDO_LOG_OLD_HDR_SIZE`).
pub const TRX_UNDO_XA_HDR_SIZE: usize = 4 + 4 + 4 + 128;
