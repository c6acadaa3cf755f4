//! Query-path scenarios: index probes versus full scans, ordering, and
//! index-table consistency across mutations.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use tessera_core::{Column, ColumnType, ColumnValue};
use tessera_engine::{CompareOp, Database, DatabaseConfig, OrderBy, Predicate, Query};

fn staff_db(rows: i64) -> Database {
    let db = Database::open(DatabaseConfig::in_memory()).unwrap();
    db.create_table(
        "staff",
        vec![
            Column::new("name", ColumnType::Text),
            Column::new("salary", ColumnType::Int),
        ],
    )
    .unwrap();
    for i in 0..rows {
        db.insert(
            "staff",
            vec![
                ("name".into(), ColumnValue::Text(format!("employee-{i}"))),
                ("salary".into(), ColumnValue::Int(30_000 + 500 * i)),
            ],
        )
        .unwrap();
    }
    db
}

fn salary_above(threshold: i64) -> Predicate {
    Predicate::Compare {
        column: "salary".into(),
        op: CompareOp::Gt,
        value: ColumnValue::Int(threshold),
    }
}

fn ids(rows: &[tessera_core::Row]) -> BTreeSet<u64> {
    rows.iter().map(|r| r.id).collect()
}

#[test]
fn index_probe_matches_full_scan() {
    // 150 chains puts the table over the index threshold.
    let db = staff_db(150);
    db.create_index("idx_salary", "staff", "salary").unwrap();

    let indexed = db
        .select(&Query::scan("staff").filter(salary_above(50_000)))
        .unwrap();

    // Expected: salaries 30000 + 500 i > 50000 ⇔ i > 40.
    assert_eq!(indexed.len(), (41..150).count());
    for row in &indexed {
        match row.get("salary") {
            Some(ColumnValue::Int(s)) => assert!(*s > 50_000),
            other => panic!("unexpected salary {other:?}"),
        }
    }

    // Dropping the index forces the full-scan path; same multiset.
    let indexed_ids = ids(&indexed);
    db.drop_index("idx_salary").unwrap();
    let scanned = db
        .select(&Query::scan("staff").filter(salary_above(50_000)))
        .unwrap();
    assert_eq!(indexed_ids, ids(&scanned));
}

#[test]
fn between_and_equality_probes_match_scans() {
    let db = staff_db(150);
    db.create_index("idx_salary", "staff", "salary").unwrap();

    let between = Predicate::Between {
        column: "salary".into(),
        low: ColumnValue::Int(40_000),
        high: ColumnValue::Int(45_000),
    };
    let eq = Predicate::Compare {
        column: "salary".into(),
        op: CompareOp::Eq,
        value: ColumnValue::Int(30_000),
    };

    let via_index_between = ids(&db.select(&Query::scan("staff").filter(between.clone())).unwrap());
    let via_index_eq = ids(&db.select(&Query::scan("staff").filter(eq.clone())).unwrap());

    db.drop_index("idx_salary").unwrap();
    assert_eq!(
        via_index_between,
        ids(&db.select(&Query::scan("staff").filter(between)).unwrap())
    );
    assert_eq!(
        via_index_eq,
        ids(&db.select(&Query::scan("staff").filter(eq)).unwrap())
    );
}

#[test]
fn index_stays_consistent_across_update_and_delete() {
    let db = staff_db(150);
    db.create_index("idx_salary", "staff", "salary").unwrap();

    // Promote employee-10 and fire everyone above 100k.
    db.update(
        "staff",
        vec![("salary".into(), ColumnValue::Int(200_000))],
        &Predicate::Compare {
            column: "name".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Text("employee-10".into()),
        },
    )
    .unwrap();
    db.delete("staff", &salary_above(100_000)).unwrap();

    // employee-10 (200k) was deleted along with i >= 141 (salary > 100k).
    let survivors = db.select(&Query::scan("staff")).unwrap();
    for row in &survivors {
        match row.get("salary") {
            Some(ColumnValue::Int(s)) => assert!(*s <= 100_000),
            other => panic!("unexpected salary {other:?}"),
        }
    }

    // Probe results must agree with a scan after the churn.
    let probed = ids(&db
        .select(&Query::scan("staff").filter(salary_above(60_000)))
        .unwrap());
    db.drop_index("idx_salary").unwrap();
    let scanned = ids(&db
        .select(&Query::scan("staff").filter(salary_above(60_000)))
        .unwrap());
    assert_eq!(probed, scanned);
}

#[test]
fn index_probe_honors_old_snapshots_across_concurrent_update() {
    // Index maintenance is append-only: a concurrent committed update must
    // not make the old key unprobeable for a snapshot that still sees the
    // old version.
    let db = Arc::new(staff_db(150));
    db.create_index("idx_salary", "staff", "salary").unwrap();

    let salary_eq = |salary: i64| Predicate::Compare {
        column: "salary".into(),
        op: CompareOp::Eq,
        value: ColumnValue::Int(salary),
    };

    // T1 pins its snapshot first.
    db.begin().unwrap();

    // A writer on another thread moves employee-0 from 30000 to 999999.
    {
        let db = Arc::clone(&db);
        thread::spawn(move || {
            db.update(
                "staff",
                vec![("salary".into(), ColumnValue::Int(999_999))],
                &Predicate::Compare {
                    column: "name".into(),
                    op: CompareOp::Eq,
                    value: ColumnValue::Text("employee-0".into()),
                },
            )
            .unwrap();
        })
        .join()
        .unwrap();
    }

    // T1's probe for the old key must still surface the row.
    let rows = db
        .select(&Query::scan("staff").filter(salary_eq(30_000)))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("name"),
        Some(&ColumnValue::Text("employee-0".into()))
    );
    db.commit().unwrap();

    // A fresh snapshot sees only the new value; the stale old key is a
    // filtered false positive.
    assert!(db
        .select(&Query::scan("staff").filter(salary_eq(30_000)))
        .unwrap()
        .is_empty());
    let rows = db
        .select(&Query::scan("staff").filter(salary_eq(999_999)))
        .unwrap();
    assert_eq!(rows.len(), 1);
}

#[test]
fn rollback_leaves_index_probes_consistent() {
    let db = staff_db(150);
    db.create_index("idx_salary", "staff", "salary").unwrap();

    // employee-5 sits at 32500.
    db.begin().unwrap();
    db.update(
        "staff",
        vec![("salary".into(), ColumnValue::Int(777_777))],
        &Predicate::Compare {
            column: "name".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Text("employee-5".into()),
        },
    )
    .unwrap();
    db.rollback().unwrap();

    // The old key still probes to the row, and the rolled-back key matches
    // nothing.
    let rows = db
        .select(&Query::scan("staff").filter(Predicate::Compare {
            column: "salary".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Int(32_500),
        }))
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0].get("name"),
        Some(&ColumnValue::Text("employee-5".into()))
    );

    assert!(db
        .select(&Query::scan("staff").filter(Predicate::Compare {
            column: "salary".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Int(777_777),
        }))
        .unwrap()
        .is_empty());
}

#[test]
fn small_tables_scan_even_with_an_index() {
    // Below the threshold the planner ignores the index; results identical.
    let db = staff_db(20);
    db.create_index("idx_salary", "staff", "salary").unwrap();
    let rows = db
        .select(&Query::scan("staff").filter(salary_above(35_000)))
        .unwrap();
    assert_eq!(rows.len(), (11..20).count());
}

#[test]
fn order_by_column_with_limit_and_offset() {
    let db = staff_db(10);

    let rows = db
        .select(
            &Query::scan("staff")
                .order_by(OrderBy::Column {
                    column: "salary".into(),
                    descending: true,
                })
                .limit(3)
                .offset(1),
        )
        .unwrap();

    let salaries: Vec<i64> = rows
        .iter()
        .map(|r| match r.get("salary") {
            Some(ColumnValue::Int(s)) => *s,
            _ => unreachable!(),
        })
        .collect();
    // Top salary is 34500; offset 1 skips it.
    assert_eq!(salaries, vec![34_000, 33_500, 33_000]);
}

#[test]
fn vibes_ordering_returns_the_same_multiset() {
    let db = staff_db(25);
    let straight = ids(&db.select(&Query::scan("staff")).unwrap());
    let vibed = ids(&db
        .select(&Query::scan("staff").order_by(OrderBy::Vibes))
        .unwrap());
    assert_eq!(straight, vibed);
}

#[test]
fn count_tracks_visible_rows() {
    let db = staff_db(5);
    assert_eq!(db.count("staff").unwrap(), 5);
    db.delete("staff", &salary_above(31_000)).unwrap();
    assert_eq!(db.count("staff").unwrap(), 3);
    assert!(db.count("nope").unwrap_err().is_not_found());
}

#[test]
fn unknown_columns_are_rejected() {
    let db = staff_db(1);
    let err = db
        .select(&Query::scan("staff").filter(Predicate::Compare {
            column: "wage".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Int(1),
        }))
        .unwrap_err();
    assert!(err.is_not_found());

    let err = db
        .insert("staff", vec![("wage".into(), ColumnValue::Int(1))])
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn duplicate_index_names_are_rejected() {
    let db = staff_db(1);
    db.create_index("idx", "staff", "salary").unwrap();
    let err = db.create_index("idx", "staff", "name").unwrap_err();
    assert!(matches!(
        err,
        tessera_core::Error::IndexAlreadyExists { .. }
    ));
    db.drop_index("idx").unwrap();
    assert!(db.drop_index("idx").unwrap_err().is_not_found());
}
