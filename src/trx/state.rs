//! Transaction state machine (component E): a single transaction's
//! lifecycle — begin, commit, rollback, savepoints, and XA prepare.
//!
//! Grounded on `trx0trx.c`: `trx_start_low`, `trx_commit_in_memory`,
//! `trx_rollback_to_savepoint`, `trx_prepare`. The kernel critical section
//! and cross-transaction bookkeeping (global trx-id counter, rseg
//! assignment, transaction list, recovery) live one level up in
//! [`crate::engine`], since those need visibility across every live
//! transaction rather than just one.

use std::collections::VecDeque;

use crate::innodb::store::PageStore;
use crate::innodb::undo_page::UndoPageType;
use crate::rseg::{RollbackSegment, RsegId};
use crate::undo::log::{FinishState, UndoLog, XaId};
use crate::EngineError;

/// Stable handle to a transaction (§9: arena index, not a pointer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrxLifecycle {
    NotStarted,
    Active,
    Committing,
    CommittedInMemory,
    Prepared,
}

/// A named rollback point: the undo-no each of the transaction's logs had
/// reached at the moment the savepoint was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Savepoint {
    pub name: String,
    pub undo_no: u64,
}

/// Signals queued on a transaction, processed when no query thread of the
/// transaction is active. See spec's compatibility rules: a `Commit` queued
/// after `TotalRollback` is rejected; `ErrorOccurred`/`BreakExecution` are
/// always allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Commit,
    TotalRollback,
    RollbackToSavepoint(String),
    ErrorOccurred,
    BreakExecution,
}

/// A single transaction's in-memory state.
pub struct Trx {
    pub id: TxId,
    pub lifecycle: TrxLifecycle,
    pub rseg: Option<RsegId>,
    pub insert_undo: Option<UndoLog>,
    pub update_undo: Option<UndoLog>,
    /// Next undo-no to assign to an emitted undo record.
    pub undo_no: u64,
    /// Rollback stops once every log's top_undo_no falls below this.
    pub rollback_limit: u64,
    pub savepoints: Vec<Savepoint>,
    pub dict_operation: bool,
    pub wants_xa: bool,
    pub xid: Option<XaId>,
    /// Serial (commit) number, assigned under the kernel section at commit.
    pub serial_no: Option<u64>,
    signals: VecDeque<Signal>,
}

impl Trx {
    /// `begin()`: a fresh, unassigned transaction. Rollback segment and
    /// undo logs are assigned lazily on first write (`ensure_insert_undo`/
    /// `ensure_update_undo`), matching `trx_undo_assign_undo`'s deferred
    /// allocation.
    pub fn begin(id: TxId) -> Self {
        Trx {
            id,
            lifecycle: TrxLifecycle::Active,
            rseg: None,
            insert_undo: None,
            update_undo: None,
            undo_no: 0,
            rollback_limit: 0,
            savepoints: Vec::new(),
            dict_operation: false,
            wants_xa: false,
            xid: None,
            serial_no: None,
            signals: VecDeque::new(),
        }
    }

    pub fn queue_signal(&mut self, signal: Signal) -> Result<(), EngineError> {
        let rejected = signal == Signal::Commit
            && self.signals.contains(&Signal::TotalRollback);
        if rejected {
            return Err(EngineError::Argument(
                "commit rejected: rollback already queued".to_string(),
            ));
        }
        self.signals.push_back(signal);
        Ok(())
    }

    pub fn pop_signal(&mut self) -> Option<Signal> {
        self.signals.pop_front()
    }

    /// Ensure an insert-undo log is assigned, creating or reusing one from
    /// `rseg`'s cache on first call.
    pub fn ensure_insert_undo(
        &mut self,
        rseg_id: RsegId,
        rseg: &mut RollbackSegment,
        page_size: u32,
        store: &mut dyn PageStore,
    ) -> Result<&mut UndoLog, EngineError> {
        self.rseg.get_or_insert(rseg_id);
        if self.insert_undo.is_none() {
            let log = UndoLog::assign(
                rseg_id,
                rseg,
                UndoPageType::Insert,
                self.wants_xa,
                page_size,
                store,
            )?;
            self.insert_undo = Some(log);
        }
        Ok(self.insert_undo.as_mut().unwrap())
    }

    /// Ensure an update-undo log is assigned.
    pub fn ensure_update_undo(
        &mut self,
        rseg_id: RsegId,
        rseg: &mut RollbackSegment,
        page_size: u32,
        store: &mut dyn PageStore,
    ) -> Result<&mut UndoLog, EngineError> {
        self.rseg.get_or_insert(rseg_id);
        if self.update_undo.is_none() {
            let log = UndoLog::assign(
                rseg_id,
                rseg,
                UndoPageType::Update,
                self.wants_xa,
                page_size,
                store,
            )?;
            self.update_undo = Some(log);
        }
        Ok(self.update_undo.as_mut().unwrap())
    }

    /// `savepoint(name)`: remember the current rollback point under `name`.
    pub fn savepoint(&mut self, name: &str) {
        self.savepoints.retain(|s| s.name != name);
        self.savepoints.push(Savepoint {
            name: name.to_string(),
            undo_no: self.undo_no,
        });
    }

    /// `release_savepoint(name)`: drop a savepoint and everything taken
    /// after it, without rolling back.
    pub fn release_savepoint(&mut self, name: &str) -> Result<(), EngineError> {
        let pos = self
            .savepoints
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| EngineError::Argument(format!("no such savepoint: {name}")))?;
        self.savepoints.truncate(pos);
        Ok(())
    }

    /// `rollback_to_savepoint(name)`: set the rollback limit to the
    /// savepoint's undo-no. The caller (rollback driver) then walks the
    /// undo stacks down to this limit.
    pub fn rollback_to_savepoint(&mut self, name: &str) -> Result<u64, EngineError> {
        let sp = self
            .savepoints
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| EngineError::Argument(format!("no such savepoint: {name}")))?;
        self.rollback_limit = sp.undo_no;
        self.savepoints.retain(|s| s.undo_no < self.rollback_limit || s.name == name);
        Ok(self.rollback_limit)
    }

    /// `rollback_last_statement()`: convenience for rolling back exactly
    /// the undo records emitted by the most recent statement, identified by
    /// an implicit savepoint the caller took before running it.
    pub fn rollback_last_statement(&mut self, statement_start_undo_no: u64) -> u64 {
        self.rollback_limit = statement_start_undo_no;
        self.rollback_limit
    }

    /// `rollback()`: total rollback, down to undo-no 0.
    pub fn rollback(&mut self) -> u64 {
        self.rollback_limit = 0;
        self.rollback_limit
    }

    /// Step 2 of the commit path: decide each owned log's post-commit
    /// state. Returns `(insert_outcome, update_outcome)`.
    pub fn finish_states(&self, page_size: u32) -> (Option<FinishState>, Option<FinishState>) {
        (
            self.insert_undo.as_ref().map(|u| u.state_at_finish(page_size)),
            self.update_undo.as_ref().map(|u| u.state_at_finish(page_size)),
        )
    }

    /// Step 3/commit point: assign the serial number and, if the
    /// update-undo log's finish state (as already decided by
    /// `finish_states`) is `ToPurge`, link its header into the rseg's
    /// history list.
    pub fn commit_update_undo_into_history(
        &mut self,
        serial_no: u64,
        update_outcome: Option<FinishState>,
        rseg: &mut RollbackSegment,
    ) {
        self.serial_no = Some(serial_no);
        if update_outcome == Some(FinishState::ToPurge) {
            if let Some(update_undo) = &self.update_undo {
                rseg.history_list_add(update_undo.hdr_page_no, serial_no);
            }
        }
    }

    /// Step 5: move to COMMITTED_IN_MEMORY and drop per-transaction state
    /// no longer needed once committed.
    pub fn finish_commit(&mut self) {
        self.lifecycle = TrxLifecycle::CommittedInMemory;
        self.savepoints.clear();
    }

    /// Prepare path (XA): write PREPARED into the undo headers' in-memory
    /// mirror. A real implementation also persists this to the on-disk
    /// segment header and forces the redo log; that I/O is the caller's
    /// responsibility (this only flips engine-visible state).
    pub fn prepare(&mut self) {
        self.lifecycle = TrxLifecycle::Prepared;
    }
}
