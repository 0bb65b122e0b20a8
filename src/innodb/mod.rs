//! On-disk format layer: pages, undo log structures, and the rollback
//! segment array, modeled directly on InnoDB's `trx0undo`/`trx0rseg`
//! on-disk layout.
//!
//! This module owns bytes. The engine logic that decides *what* to write
//! (undo records, rollback segments, transaction state) lives in the
//! sibling top-level modules (`undo`, `rseg`, `trx`, `purge`, `version`).

pub mod checksum;
pub mod constants;
pub mod store;
pub mod sys;
pub mod undo_page;
