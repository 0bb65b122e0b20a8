//! `undoctl status`: report a file-backed store's TRX_SYS counters and
//! rollback segment occupancy without attempting a full engine reopen.
//!
//! This deliberately reads the TRX_SYS page and each occupied segment
//! header directly rather than reconstructing a [`crate::engine::Engine`];
//! see the module doc on [`crate::engine::Engine::recover`] for why a full
//! from-bytes reopen is out of scope for this on-disk format.

use std::io::Write;
use std::path::PathBuf;

use crate::innodb::store::{FilePageStore, PageStore};
use crate::innodb::sys::TrxSysPage;
use crate::innodb::undo_page::UndoSegmentHeader;
use crate::EngineError;

pub struct StatusOptions {
    pub file: PathBuf,
    pub page_size: u32,
}

pub fn execute(opts: &StatusOptions, writer: &mut dyn Write) -> Result<(), EngineError> {
    let mut store = FilePageStore::open(&opts.file, opts.page_size)?;
    writeln!(writer, "pages: {}", store.page_count()).map_err(EngineError::from)?;

    let sys_page = store.read_page(0)?;
    let sys = TrxSysPage::parse(&sys_page)?;
    writeln!(writer, "next trx id: {}", sys.peek_next_trx_id()).map_err(EngineError::from)?;

    for (slot, _space_id, page_no) in sys.occupied_slots() {
        let header_page = store.read_page(page_no)?;
        let header = UndoSegmentHeader::parse(&header_page)?;
        writeln!(
            writer,
            "rseg slot {slot}: header page {page_no}, state {:?}, last_log {}",
            header.state, header.last_log
        )
        .map_err(EngineError::from)?;
    }
    Ok(())
}
