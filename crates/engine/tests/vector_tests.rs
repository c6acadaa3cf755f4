//! Vector search through the full statement path: similarity ordering,
//! delete-time graph maintenance, and recovery rebuild.

use tempfile::TempDir;
use tessera_core::{Column, ColumnType, ColumnValue};
use tessera_engine::{
    CompareOp, Database, DatabaseConfig, OrderBy, Predicate, Query, SimilarityTarget,
};

fn docs_db() -> Database {
    let db = Database::open(DatabaseConfig::in_memory()).unwrap();
    db.create_table(
        "docs",
        vec![
            Column::new("title", ColumnType::Text),
            Column::new("vec", ColumnType::Embedding(2)),
        ],
    )
    .unwrap();
    db
}

fn insert_doc(db: &Database, title: &str, vec: [f32; 2]) -> u64 {
    db.insert(
        "docs",
        vec![
            ("title".into(), ColumnValue::Text(title.into())),
            ("vec".into(), ColumnValue::Embedding(vec.to_vec())),
        ],
    )
    .unwrap()
}

fn similarity_query(vec: [f32; 2]) -> Query {
    Query::scan("docs").order_by(OrderBy::Similarity {
        column: "vec".into(),
        target: SimilarityTarget::Vector(vec.to_vec()),
    })
}

#[test]
fn similarity_orders_by_cosine_distance() {
    let db = docs_db();
    insert_doc(&db, "east", [1.0, 0.0]);
    insert_doc(&db, "north", [0.0, 1.0]);
    insert_doc(&db, "northeast", [1.0, 1.0]);

    let rows = db.select(&similarity_query([1.0, 0.1])).unwrap();
    let titles: Vec<_> = rows
        .iter()
        .map(|r| match r.get("title") {
            Some(ColumnValue::Text(t)) => t.clone(),
            other => panic!("unexpected title {other:?}"),
        })
        .collect();
    assert_eq!(titles, vec!["east", "northeast", "north"]);
}

#[test]
fn deleted_rows_leave_the_graph_and_neighbors_stay_reachable() {
    // Five points on a line not through the origin; removing the middle one
    // must keep the rest reachable through the reconnected graph.
    let db = docs_db();
    for i in 1..=5 {
        insert_doc(&db, &format!("p{i}"), [i as f32, (i + 1) as f32]);
    }

    db.delete(
        "docs",
        &Predicate::Compare {
            column: "title".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Text("p3".into()),
        },
    )
    .unwrap();

    let rows = db.select(&similarity_query([1.0, 2.0]).limit(4)).unwrap();
    assert_eq!(rows.len(), 4);
    let titles: Vec<_> = rows
        .iter()
        .map(|r| match r.get("title") {
            Some(ColumnValue::Text(t)) => t.clone(),
            _ => unreachable!(),
        })
        .collect();
    assert!(!titles.contains(&"p3".to_string()));
    assert!(titles.contains(&"p4".to_string()));
    assert!(titles.contains(&"p5".to_string()));
}

#[test]
fn update_swaps_the_indexed_vector() {
    let db = docs_db();
    insert_doc(&db, "mover", [1.0, 0.0]);
    insert_doc(&db, "anchor", [0.0, 1.0]);

    db.update(
        "docs",
        vec![("vec".into(), ColumnValue::Embedding(vec![0.0, 1.0]))],
        &Predicate::Compare {
            column: "title".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Text("mover".into()),
        },
    )
    .unwrap();

    let rows = db.select(&similarity_query([0.0, 1.0]).limit(1)).unwrap();
    // Both now point north; nearest must have distance ~0 either way.
    assert_eq!(rows.len(), 1);

    let rows = db.select(&similarity_query([1.0, 0.0])).unwrap();
    // Nothing points east anymore, so both results are equally far; the
    // important part is that the old vector for "mover" is gone, i.e. no
    // result ranks "mover" as a near-exact match.
    assert_eq!(rows.len(), 2);
}

#[test]
fn rollback_restores_swapped_vectors() {
    let db = docs_db();
    insert_doc(&db, "mover", [1.0, 0.0]);
    insert_doc(&db, "anchor", [0.0, 1.0]);

    db.begin().unwrap();
    db.update(
        "docs",
        vec![("vec".into(), ColumnValue::Embedding(vec![0.0, 1.0]))],
        &Predicate::Compare {
            column: "title".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Text("mover".into()),
        },
    )
    .unwrap();
    db.rollback().unwrap();

    // The swap was replayed back: a search due east finds the old vector
    // as an exact match again.
    let rows = db.select(&similarity_query([1.0, 0.0]).limit(1)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title"), Some(&ColumnValue::Text("mover".into())));
    assert_eq!(
        rows[0].get("vec"),
        Some(&ColumnValue::Embedding(vec![1.0, 0.0]))
    );
}

#[test]
fn rolled_back_delete_keeps_the_vector_searchable() {
    let db = docs_db();
    insert_doc(&db, "keeper", [1.0, 0.0]);
    insert_doc(&db, "anchor", [0.0, 1.0]);

    db.begin().unwrap();
    assert_eq!(
        db.delete(
            "docs",
            &Predicate::Compare {
                column: "title".into(),
                op: CompareOp::Eq,
                value: ColumnValue::Text("keeper".into()),
            },
        )
        .unwrap(),
        1
    );
    db.rollback().unwrap();

    let rows = db.select(&similarity_query([1.0, 0.0]).limit(1)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title"), Some(&ColumnValue::Text("keeper".into())));
}

#[test]
fn rolled_back_insert_leaves_no_vector_behind() {
    let db = docs_db();
    insert_doc(&db, "real", [0.0, 1.0]);

    db.begin().unwrap();
    insert_doc(&db, "ghost", [1.0, 0.0]);
    db.rollback().unwrap();

    // The ghost's chain is invisible and its vector is out of the graph, so
    // nothing ranks near its old position.
    let rows = db.select(&similarity_query([1.0, 0.0])).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title"), Some(&ColumnValue::Text("real".into())));
}

#[test]
fn similarity_to_text_uses_the_mock_embedder() {
    let db = Database::open(DatabaseConfig::in_memory()).unwrap();
    db.create_table(
        "docs",
        vec![
            Column::new("title", ColumnType::Text),
            Column::new("vec", ColumnType::Embedding(8)),
        ],
    )
    .unwrap();

    // Index one row at exactly the mock embedding of a known string: it
    // must rank first for that string.
    let target = tessera_engine::mock_query_vector("database systems", 8);
    db.insert(
        "docs",
        vec![
            ("title".into(), ColumnValue::Text("match".into())),
            ("vec".into(), ColumnValue::Embedding(target)),
        ],
    )
    .unwrap();
    db.insert(
        "docs",
        vec![
            ("title".into(), ColumnValue::Text("other".into())),
            ("vec".into(), ColumnValue::Embedding(vec![0.5; 8])),
        ],
    )
    .unwrap();

    let rows = db
        .select(
            &Query::scan("docs")
                .order_by(OrderBy::Similarity {
                    column: "vec".into(),
                    target: SimilarityTarget::Text("database systems".into()),
                })
                .limit(1),
        )
        .unwrap();
    assert_eq!(rows[0].get("title"), Some(&ColumnValue::Text("match".into())));
}

#[test]
fn similarity_without_a_graph_is_an_error() {
    let db = docs_db();
    // Table exists but nothing was ever inserted: no graph for dimension 2.
    let err = db.select(&similarity_query([1.0, 0.0])).unwrap_err();
    assert!(err.to_string().contains("no vector index"));
}

#[test]
fn wrong_dimension_inserts_are_rejected() {
    let db = docs_db();
    let err = db
        .insert(
            "docs",
            vec![
                ("title".into(), ColumnValue::Text("bad".into())),
                ("vec".into(), ColumnValue::Embedding(vec![1.0, 2.0, 3.0])),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, tessera_core::Error::TypeMismatch { .. }));
    assert_eq!(db.count("docs").unwrap(), 0);

    let err = db
        .insert(
            "docs",
            vec![
                ("title".into(), ColumnValue::Text("empty".into())),
                ("vec".into(), ColumnValue::Embedding(vec![])),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, tessera_core::Error::TypeMismatch { .. }));
}

#[test]
fn embedding_predicates_are_rejected() {
    let db = docs_db();
    insert_doc(&db, "a", [1.0, 0.0]);

    let err = db
        .select(&Query::scan("docs").filter(Predicate::Compare {
            column: "vec".into(),
            op: CompareOp::Eq,
            value: ColumnValue::Embedding(vec![1.0, 0.0]),
        }))
        .unwrap_err();
    assert!(matches!(err, tessera_core::Error::TypeMismatch { .. }));
}

#[test]
fn recovery_rebuilds_the_graph_from_live_rows() {
    let root = TempDir::new().unwrap();
    let config = DatabaseConfig::durable(root.path().join("data"), root.path().join("wal"));

    {
        let db = Database::open(config.clone()).unwrap();
        db.create_table(
            "docs",
            vec![
                Column::new("title", ColumnType::Text),
                Column::new("vec", ColumnType::Embedding(2)),
            ],
        )
        .unwrap();
        insert_doc(&db, "east", [1.0, 0.0]);
        insert_doc(&db, "north", [0.0, 1.0]);
        db.delete(
            "docs",
            &Predicate::Compare {
                column: "title".into(),
                op: CompareOp::Eq,
                value: ColumnValue::Text("north".into()),
            },
        )
        .unwrap();
        // Crash without a checkpoint.
    }

    let db = Database::open(config).unwrap();
    let rows = db.select(&similarity_query([1.0, 0.0])).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("title"), Some(&ColumnValue::Text("east".into())));
}
