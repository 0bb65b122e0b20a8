//! A transactional row-storage engine's MVCC undo-logging core, modeled
//! directly on InnoDB's `trx0undo` / `trx0rseg` / `trx0roll` / `trx0rec` /
//! `row0purge` / `row0undo` machinery.
//!
//! # Layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`innodb`] | On-disk format: pages, undo page codec, TRX_SYS layout, checksums |
//! | [`engine`] | Kernel critical section: begin/commit/rollback/prepare/recover |
//! | [`mach`] | Much-compressed variable-length integer encoding |
//! | [`row`] | Clustered/secondary index stand-ins and the roll pointer type |
//! | [`undo::record`] | Undo record builder/parser (insert, update, delete-mark) |
//! | [`undo::log`] | Undo log lifecycle: segment reuse, state-at-finish, backward navigation |
//! | [`rseg`] | Rollback segment manager: header pages, cached-segment free lists, history list |
//! | [`trx::state`] | Per-transaction state machine: undo assignment, savepoints, commit/rollback |
//! | [`trx::rollback`] | Rollback driver: pops and applies undo records against the row stores |
//! | [`version`] | Read-view version reconstruction from the roll-pointer chain |
//! | [`purge`] | Purge engine: history-list consumption, secondary/clustered cleanup |
//! | [`config`] | Runtime configuration: flush policy, force-recovery level, rseg count |
//!
//! ## Quick example
//!
//! ```
//! use idb::innodb::store::{InMemoryPageStore, PageStore};
//! use idb::innodb::undo_page::{self, UndoPageType};
//!
//! let mut store = InMemoryPageStore::new(16384);
//! let page_no = store.allocate_page().unwrap();
//! let mut page = store.read_page(page_no).unwrap();
//! undo_page::page_init(&mut page, UndoPageType::Insert, 0);
//! let offset = undo_page::append_record(&mut page, &[1, 2, 3]);
//! assert_ne!(offset, 0);
//! store.write_page(page_no, &page).unwrap();
//! ```

pub mod config;
#[cfg(feature = "cli")]
pub mod cli;
pub mod engine;
pub mod innodb;
pub mod mach;
pub mod row;
pub mod purge;
pub mod rseg;
pub mod trx;
pub mod undo;
pub mod version;

use thiserror::Error;

/// Errors returned by engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An I/O error occurred (file open, read, seek, or write failure).
    #[error("I/O error: {0}")]
    Io(String),

    /// A parse error occurred (malformed binary data or unexpected values).
    #[error("Parse error: {0}")]
    Parse(String),

    /// An invalid argument was supplied (out-of-range page number, bad option, etc.).
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// A tablespace or rollback segment has no free pages left to extend into.
    #[error("out of file space")]
    OutOfFileSpace,

    /// The configured rollback segment count cannot accommodate another
    /// concurrently active transaction.
    #[error("too many concurrent transactions")]
    TooManyConcurrentTrxs,

    /// A version reader walked off the end of the undo chain without
    /// finding a version visible to the requesting read view; the needed
    /// history has already been purged.
    #[error("history required for consistent read has been purged")]
    MissingHistory,

    /// A clustered-index insert collided with an existing primary key.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The operation was interrupted (e.g. `KILL` of a running rollback).
    #[error("interrupted")]
    Interrupted,

    /// On-disk structures failed an invariant check (bad checksum, bad
    /// page type, inconsistent header fields).
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// An unrecoverable condition that should stop the server, matching
    /// the original engine's `ut_error`/exit-on-undo-error contract during
    /// crash recovery.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}
