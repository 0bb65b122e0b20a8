//! `undoctl demo`: an in-memory, scripted walk through the core lifecycle
//! (insert/commit, insert/rollback, savepoint partial rollback), printed as
//! a transcript. Exercises exactly the same `Engine` surface the
//! integration tests do, just against stdout instead of assertions.

use std::io::Write;

use serde_json::Value as ColumnValue;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::innodb::store::InMemoryPageStore;
use crate::row::{ClusteredCursor, ClusteredIndex, Row};
use crate::undo::record::RowOp;
use crate::EngineError;

pub fn execute(writer: &mut dyn Write) -> Result<(), EngineError> {
    let config = EngineConfig {
        n_rsegs: 2,
        ..EngineConfig::default()
    };
    let engine = Engine::create(config, Box::new(InMemoryPageStore::new(16384)))?;
    let mut clust = ClusteredIndex::new();

    let txn_a = engine.begin();
    let pk_a = vec![ColumnValue::from(1)];
    let roll_ptr = engine.report_row_operation(
        txn_a,
        RowOp::Insert,
        1,
        &pk_a,
        None,
        None,
        0,
        &[],
        false,
        &[],
    )?;
    clust.put(
        pk_a.clone(),
        Row {
            trx_id: txn_a.0,
            roll_ptr,
            deleted: false,
            columns: vec![ColumnValue::from("alice")],
        },
    );
    let serial_no = engine.commit(txn_a)?;
    writeln!(
        writer,
        "txn {} inserted pk {pk_a:?}, committed (serial_no {serial_no:?})",
        txn_a.0
    )
    .map_err(EngineError::from)?;

    let txn_b = engine.begin();
    let pk_b = vec![ColumnValue::from(2)];
    let roll_ptr = engine.report_row_operation(
        txn_b,
        RowOp::Insert,
        1,
        &pk_b,
        None,
        None,
        0,
        &[],
        false,
        &[],
    )?;
    clust.put(
        pk_b.clone(),
        Row {
            trx_id: txn_b.0,
            roll_ptr,
            deleted: false,
            columns: vec![ColumnValue::from("bob")],
        },
    );
    engine.rollback(txn_b, &mut clust, &mut [])?;
    writeln!(
        writer,
        "txn {} inserted pk {pk_b:?}, rolled back (present after rollback: {})",
        txn_b.0,
        clust.get(&pk_b).is_some()
    )
    .map_err(EngineError::from)?;

    let txn_c = engine.begin();
    let pk_c1 = vec![ColumnValue::from(3)];
    let pk_c2 = vec![ColumnValue::from(4)];
    let rp1 = engine.report_row_operation(
        txn_c,
        RowOp::Insert,
        1,
        &pk_c1,
        None,
        None,
        0,
        &[],
        false,
        &[],
    )?;
    clust.put(
        pk_c1.clone(),
        Row {
            trx_id: txn_c.0,
            roll_ptr: rp1,
            deleted: false,
            columns: vec![ColumnValue::from("carol")],
        },
    );
    engine.savepoint(txn_c, "before_dave")?;
    let rp2 = engine.report_row_operation(
        txn_c,
        RowOp::Insert,
        1,
        &pk_c2,
        None,
        None,
        0,
        &[],
        false,
        &[],
    )?;
    clust.put(
        pk_c2.clone(),
        Row {
            trx_id: txn_c.0,
            roll_ptr: rp2,
            deleted: false,
            columns: vec![ColumnValue::from("dave")],
        },
    );
    engine.rollback_to_savepoint(txn_c, "before_dave", &mut clust, &mut [])?;
    writeln!(
        writer,
        "txn {} rolled back to savepoint: pk {pk_c1:?} present={}, pk {pk_c2:?} present={}",
        txn_c.0,
        clust.get(&pk_c1).is_some(),
        clust.get(&pk_c2).is_some()
    )
    .map_err(EngineError::from)?;
    engine.commit(txn_c)?;

    Ok(())
}
