//! End-to-end scenarios against the public `Engine` surface (and, where the
//! engine has no live accessor for mid-transaction store state, directly
//! against the component layer it is built from) — the literal walkthroughs
//! a reader of the rollback segment / undo log / purge design would expect
//! to see exercised together rather than unit-by-unit.

use idb::config::EngineConfig;
use idb::engine::Engine;
use idb::innodb::store::InMemoryPageStore;
use idb::innodb::undo_page::UndoPageType;
use idb::row::{ClusteredCursor, ClusteredIndex, RollPtr, Row, SecondaryIndex};
use idb::rseg::{RollbackSegmentSet, RsegId};
use idb::trx::state::TrxLifecycle;
use idb::undo::log::UndoLog;
use idb::undo::record::{self, FieldChange, RowOp};
use idb::version::{self, SnapshotView};
use serde_json::Value as ColumnValue;

fn fresh_engine(n_rsegs: usize) -> Engine {
    let config = EngineConfig {
        n_rsegs,
        ..EngineConfig::default()
    };
    Engine::create(config, Box::new(InMemoryPageStore::new(16384))).unwrap()
}

#[test]
fn insert_then_rollback() {
    let engine = fresh_engine(1);
    let mut clust = ClusteredIndex::new();
    let pk = vec![ColumnValue::from(7)];

    let t1 = engine.begin();
    let rp = engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
        .unwrap();
    clust
        .insert(
            pk.clone(),
            Row {
                trx_id: t1.0,
                roll_ptr: rp,
                deleted: false,
                columns: vec![ColumnValue::from("a")],
            },
        )
        .unwrap();

    engine.rollback(t1, &mut clust, &mut []).unwrap();

    assert!(clust.get(&pk).is_none());
}

#[test]
fn update_commit_purge() {
    let engine = fresh_engine(1);
    let mut clust = ClusteredIndex::new();
    let pk = vec![ColumnValue::from(7)];
    let t0 = 1u64;
    clust
        .insert(
            pk.clone(),
            Row {
                trx_id: t0,
                roll_ptr: RollPtr::NONE,
                deleted: false,
                columns: vec![ColumnValue::from("a")],
            },
        )
        .unwrap();

    let t1 = engine.begin();
    let rp = engine
        .report_row_operation(
            t1,
            RowOp::Modify,
            1,
            &pk,
            Some(t0),
            Some(RollPtr::NONE),
            0,
            &[FieldChange {
                pos: 0,
                old_value: ColumnValue::from("a"),
            }],
            false,
            &[],
        )
        .unwrap();
    clust.put(
        pk.clone(),
        Row {
            trx_id: t1.0,
            roll_ptr: rp,
            deleted: false,
            columns: vec![ColumnValue::from("b")],
        },
    );

    // Grow the same update-undo log past its single-page reuse limit (on an
    // unrelated key) so its finish state is ToPurge rather than Cached —
    // otherwise it would never be linked onto the history list at all.
    let filler_pk = vec![ColumnValue::from(999)];
    let filler_change = vec![FieldChange {
        pos: 0,
        old_value: ColumnValue::from("x".repeat(8000)),
    }];
    for _ in 0..3 {
        engine
            .report_row_operation(
                t1,
                RowOp::Modify,
                1,
                &filler_pk,
                Some(t0),
                Some(RollPtr::NONE),
                0,
                &filler_change,
                false,
                &[],
            )
            .unwrap();
    }

    let serial_no = engine.commit(t1).unwrap().unwrap();

    let mut secondary: Vec<(&[usize], &mut SecondaryIndex)> = Vec::new();
    let report = engine.run_purge(serial_no + 1, &mut clust, &mut secondary).unwrap();
    assert_eq!(report.visited_pages.len(), 1);

    let row = clust.get(&pk).unwrap();
    let (_, mut store, _, _) = engine.into_parts();
    // The history-list page purge just freed isn't actually zeroed until
    // reclaimed by a later allocation — force that reclaim so the page
    // reflects what a restarted engine would actually find there.
    store.allocate_page().unwrap();

    let view_at_t0 = SnapshotView {
        low_limit_id: t1.0,
        invisible_ids: vec![],
    };
    let err = version::build_for_read(&row, &view_at_t0, store.as_mut()).unwrap_err();
    assert!(matches!(err, idb::EngineError::MissingHistory));
}

#[test]
fn delete_mark_snapshot_read() {
    let mut store = InMemoryPageStore::new(16384);
    let mut set = RollbackSegmentSet::new(1);
    set.create(RsegId(0), &mut store).unwrap();
    let rseg = set.get_mut(RsegId(0)).unwrap();
    let mut log = UndoLog::create(RsegId(0), rseg, UndoPageType::Update, &mut store).unwrap();

    let t0 = 3u64;
    let t2 = 9u64;
    let pk = vec![ColumnValue::from(7)];
    let rec = record::report_row_operation(
        RowOp::Modify,
        1,
        0,
        0,
        &pk,
        Some(t0),
        Some(RollPtr::NONE),
        0,
        &[],
        false,
        &[],
    );
    let (page_no, offset) = log.append_record(rseg, &rec, 0, &mut store).unwrap();
    let roll_ptr = RollPtr::new(false, 0, page_no, offset);

    let current = Row {
        trx_id: t2,
        roll_ptr,
        deleted: true,
        columns: vec![ColumnValue::from("a")],
    };
    let v_before_t2 = SnapshotView {
        low_limit_id: t2,
        invisible_ids: vec![],
    };

    let visible = version::build_for_read(&current, &v_before_t2, &mut store).unwrap().unwrap();
    assert!(!visible.deleted);
    assert_eq!(visible.trx_id, t0);
}

#[test]
fn savepoint_partial_rollback() {
    let engine = fresh_engine(1);
    let mut clust = ClusteredIndex::new();
    let pk1 = vec![ColumnValue::from(1)];
    let pk2 = vec![ColumnValue::from(2)];
    let pk3 = vec![ColumnValue::from(3)];

    let t1 = engine.begin();
    let rp1 = engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk1, None, None, 0, &[], false, &[])
        .unwrap();
    clust
        .insert(
            pk1.clone(),
            Row {
                trx_id: t1.0,
                roll_ptr: rp1,
                deleted: false,
                columns: vec![],
            },
        )
        .unwrap();

    engine.savepoint(t1, "S").unwrap();

    let rp2 = engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk2, None, None, 0, &[], false, &[])
        .unwrap();
    clust
        .insert(
            pk2.clone(),
            Row {
                trx_id: t1.0,
                roll_ptr: rp2,
                deleted: false,
                columns: vec![],
            },
        )
        .unwrap();

    let rp3 = engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk3, None, None, 0, &[], false, &[])
        .unwrap();
    clust
        .insert(
            pk3.clone(),
            Row {
                trx_id: t1.0,
                roll_ptr: rp3,
                deleted: false,
                columns: vec![],
            },
        )
        .unwrap();

    engine.rollback_to_savepoint(t1, "S", &mut clust, &mut []).unwrap();

    assert!(clust.get(&pk1).is_some());
    assert!(clust.get(&pk2).is_none());
    assert!(clust.get(&pk3).is_none());
}

#[test]
fn crash_during_active_transaction_then_background_rollback() {
    let engine = fresh_engine(1);
    let mut clust = ClusteredIndex::new();
    let pk = vec![ColumnValue::from(5)];

    let t1 = engine.begin();
    let rp = engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
        .unwrap();
    clust
        .insert(
            pk.clone(),
            Row {
                trx_id: t1.0,
                roll_ptr: rp,
                deleted: false,
                columns: vec![ColumnValue::from("x")],
            },
        )
        .unwrap();

    let (config, store, sys, rsegs) = engine.into_parts();
    let reopened = Engine::reopen(config, store, sys, rsegs);
    let recovered = reopened.recover().unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].lifecycle, TrxLifecycle::Active);

    reopened.rollback(recovered[0].id, &mut clust, &mut []).unwrap();
    assert!(clust.get(&pk).is_none());
}

#[test]
fn prepared_xa_survives_restart() {
    let engine = fresh_engine(1);
    let pk = vec![ColumnValue::from(1)];
    let xid = vec![1, 2, 3];

    let t1 = engine.begin_xa();
    engine.set_xid(t1, xid.clone()).unwrap();
    engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
        .unwrap();
    engine.prepare(t1).unwrap();

    let (config, store, sys, rsegs) = engine.into_parts();
    let reopened = Engine::reopen(config, store, sys, rsegs);
    let recovered = reopened.recover().unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].lifecycle, TrxLifecycle::Prepared);

    let found = reopened.get_by_xid(&xid).expect("recovered trx findable by its xid");
    assert_eq!(found, recovered[0].id);
}

/// A transaction that both inserted and later modified the same row has an
/// insert-undo log and an update-undo log open at once; the rollback
/// driver must consult both and pop whichever has the larger top undo-no
/// each step, so the update (undo_no=1) unwinds before the insert
/// (undo_no=0). Popping them out of order would hand `apply` an
/// UPD_EXIST_REC for a row the INSERT undo had already removed.
#[test]
fn dual_stack_prefers_larger_undo_no() {
    let engine = fresh_engine(1);
    let mut clust = ClusteredIndex::new();
    let pk = vec![ColumnValue::from(1)];

    let t1 = engine.begin();
    let insert_rp = engine
        .report_row_operation(t1, RowOp::Insert, 1, &pk, None, None, 0, &[], false, &[])
        .unwrap();
    clust
        .insert(
            pk.clone(),
            Row {
                trx_id: t1.0,
                roll_ptr: insert_rp,
                deleted: false,
                columns: vec![ColumnValue::from("a")],
            },
        )
        .unwrap();

    let update_rp = engine
        .report_row_operation(
            t1,
            RowOp::Modify,
            1,
            &pk,
            Some(t1.0),
            Some(insert_rp),
            0,
            &[FieldChange {
                pos: 0,
                old_value: ColumnValue::from("a"),
            }],
            false,
            &[],
        )
        .unwrap();
    clust.put(
        pk.clone(),
        Row {
            trx_id: t1.0,
            roll_ptr: update_rp,
            deleted: false,
            columns: vec![ColumnValue::from("b")],
        },
    );

    engine.rollback(t1, &mut clust, &mut []).unwrap();

    assert!(clust.get(&pk).is_none());
}
