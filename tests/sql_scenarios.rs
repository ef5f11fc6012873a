//! End-to-end SQL scenarios against an in-memory engine.

use vellum::{Database, Params, Value, VellumError};

fn db() -> Database {
    Database::open_memory().unwrap()
}

fn exec(db: &Database, sql: &str) {
    db.exec(sql, Params::default())
        .unwrap_or_else(|e| panic!("{sql}: {e}"));
}

fn query(db: &Database, sql: &str) -> Vec<vellum::FieldBuffer> {
    db.query(sql, Params::default())
        .unwrap_or_else(|e| panic!("{sql}: {e}"))
}

fn ints(rows: &[vellum::FieldBuffer], field: &str) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.get_field(field) {
            Some(Value::Integer(i)) => *i,
            other => panic!("field {field}: {other:?}"),
        })
        .collect()
}

#[test]
fn implicit_key_assignment_and_select_star() {
    // S1: a schemaless insert round-trips and gets key 1 from the
    // implicit counter.
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t VALUES {a: 1, b: 'x'}");
    let rows = query(&db, "SELECT *, pk() AS key FROM t");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_field("a"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get_field("b"), Some(&Value::text("x")));
    assert_eq!(rows[0].get_field("key"), Some(&Value::Integer(1)));

    exec(&db, "INSERT INTO t VALUES {a: 2}");
    let rows = query(&db, "SELECT pk() AS key FROM t");
    assert_eq!(ints(&rows, "key"), vec![1, 2]);
}

#[test]
fn duplicate_primary_key_fails() {
    // S2: the second insert of the same declared key is rejected with
    // the duplicate-document error, not a generic write failure.
    let db = db();
    exec(&db, "CREATE TABLE t (a INTEGER PRIMARY KEY)");
    exec(&db, "INSERT INTO t VALUES {a: 5}");
    let err = db
        .exec("INSERT INTO t VALUES {a: 5}", Params::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::DuplicateDocument { .. }), "{err}");
}

#[test]
fn order_by_uses_the_index_and_sorts() {
    // S3: the planner drops the sort and walks the index ascending.
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE INDEX ix ON t (a)");
    exec(&db, "INSERT INTO t VALUES {a: 3}, {a: 1}, {a: 2}");

    let explain = query(&db, "EXPLAIN SELECT a FROM t ORDER BY a");
    let Some(Value::Text(plan)) = explain[0].get_field("plan").cloned() else {
        panic!("explain yields a plan");
    };
    assert!(plan.contains("scan index ix"), "{plan}");
    assert!(!plan.contains("sort"), "{plan}");

    let rows = query(&db, "SELECT a FROM t ORDER BY a");
    assert_eq!(ints(&rows, "a"), vec![1, 2, 3]);
    let rows = query(&db, "SELECT a FROM t ORDER BY a DESC");
    assert_eq!(ints(&rows, "a"), vec![3, 2, 1]);
}

#[test]
fn not_null_violation_on_missing_field() {
    // S4.
    let db = db();
    exec(&db, "CREATE TABLE t (a INTEGER NOT NULL)");
    let err = db
        .exec("INSERT INTO t VALUES {b: 1}", Params::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::NotNullViolation { .. }), "{err}");
}

#[test]
fn nested_array_update() {
    // S6: updating through an array index rewrites only that element.
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t VALUES {a: [{b: 1}, {b: 2}]}");
    exec(&db, "UPDATE t SET a.1.b = 9");
    let rows = query(&db, "SELECT a FROM t");
    let Some(Value::Array(items)) = rows[0].get_field("a") else {
        panic!("a is an array");
    };
    let Value::Document(first) = &items[0] else {
        panic!("array of documents");
    };
    let Value::Document(second) = &items[1] else {
        panic!("array of documents");
    };
    assert_eq!(first.get_field("b"), Some(&Value::Integer(1)));
    assert_eq!(second.get_field("b"), Some(&Value::Integer(9)));
}

#[test]
fn where_filters_with_index_and_without() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t VALUES {a: 1, b: 10}, {a: 2, b: 20}, {a: 3, b: 30}");

    let no_index = query(&db, "SELECT a FROM t WHERE a >= 2 AND b < 30");
    assert_eq!(ints(&no_index, "a"), vec![2]);

    exec(&db, "CREATE INDEX ix_a ON t (a)");
    let with_index = query(&db, "SELECT a FROM t WHERE a >= 2 AND b < 30");
    assert_eq!(ints(&with_index, "a"), vec![2]);

    let in_list = query(&db, "SELECT a FROM t WHERE a IN (3, 1)");
    assert_eq!(ints(&in_list, "a"), vec![1, 3]);

    let between = query(&db, "SELECT a FROM t WHERE a BETWEEN 2 AND 3");
    assert_eq!(ints(&between, "a"), vec![2, 3]);
}

#[test]
fn unique_index_rejects_duplicates_across_statements() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE UNIQUE INDEX ix_email ON t (email)");
    exec(&db, "INSERT INTO t VALUES {email: 'a@x', n: 1}");
    let err = db
        .exec("INSERT INTO t VALUES {email: 'a@x', n: 2}", Params::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::DuplicateIndexValue { .. }), "{err}");
    // The failed statement left nothing behind.
    assert_eq!(query(&db, "SELECT * FROM t").len(), 1);
}

#[test]
fn update_and_delete_maintain_indexes() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE INDEX ix ON t (a)");
    exec(&db, "INSERT INTO t VALUES {a: 1}, {a: 2}, {a: 3}");

    exec(&db, "UPDATE t SET a = 10 WHERE a = 2");
    let rows = query(&db, "SELECT a FROM t WHERE a = 10");
    assert_eq!(ints(&rows, "a"), vec![10]);
    assert!(query(&db, "SELECT a FROM t WHERE a = 2").is_empty());

    exec(&db, "DELETE FROM t WHERE a = 10");
    assert!(query(&db, "SELECT a FROM t WHERE a = 10").is_empty());
    let rows = query(&db, "SELECT a FROM t ORDER BY a");
    assert_eq!(ints(&rows, "a"), vec![1, 3]);
}

#[test]
fn mutations_emit_affected_documents() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    let inserted = db
        .query("INSERT INTO t VALUES {a: 1}, {a: 2}", Params::default())
        .unwrap();
    assert_eq!(inserted.len(), 2);
    assert_eq!(inserted[0].get_field("a"), Some(&Value::Integer(1)));

    let updated = db
        .query("UPDATE t SET a = a + 10 WHERE a = 2", Params::default())
        .unwrap();
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0].get_field("a"), Some(&Value::Integer(12)));

    let deleted = db.query("DELETE FROM t WHERE a = 1", Params::default()).unwrap();
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0].get_field("a"), Some(&Value::Integer(1)));
}

#[test]
fn unset_removes_fields() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t VALUES {a: 1, b: 2}");
    exec(&db, "UPDATE t UNSET b");
    let rows = query(&db, "SELECT * FROM t");
    assert_eq!(rows[0].get_field("a"), Some(&Value::Integer(1)));
    assert_eq!(rows[0].get_field("b"), None);
}

#[test]
fn distinct_and_like() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(
        &db,
        "INSERT INTO t VALUES {a: 1, name: 'alpha'}, {a: 1, name: 'beta'}, {a: 2, name: 'alpine'}",
    );
    let rows = query(&db, "SELECT DISTINCT a FROM t ORDER BY a");
    assert_eq!(ints(&rows, "a"), vec![1, 2]);

    let rows = query(&db, "SELECT name FROM t WHERE name LIKE 'alp%' ORDER BY name");
    let names: Vec<String> = rows
        .iter()
        .map(|r| match r.get_field("name") {
            Some(Value::Text(s)) => s.to_string(),
            other => panic!("{other:?}"),
        })
        .collect();
    assert_eq!(names, ["alpha", "alpine"]);
}

#[test]
fn group_by_accumulates_aggregates() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(
        &db,
        "INSERT INTO t VALUES {g: 1, v: 10}, {g: 2, v: 5}, {g: 1, v: 20}, {g: 2, v: 7}",
    );
    let rows = query(
        &db,
        "SELECT g, count(*) AS n, sum(v) AS total, min(v) AS low, max(v) AS high, avg(v) AS mean \
         FROM t GROUP BY g",
    );
    assert_eq!(rows.len(), 2);
    assert_eq!(ints(&rows, "g"), vec![1, 2]);
    assert_eq!(ints(&rows, "n"), vec![2, 2]);
    assert_eq!(ints(&rows, "total"), vec![30, 12]);
    assert_eq!(ints(&rows, "low"), vec![10, 5]);
    assert_eq!(ints(&rows, "high"), vec![20, 7]);
    assert_eq!(rows[0].get_field("mean"), Some(&Value::Double(15.0)));
}

#[test]
fn count_star_over_empty_table_is_zero() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    let rows = query(&db, "SELECT count(*) AS n FROM t");
    assert_eq!(ints(&rows, "n"), vec![0]);
}

#[test]
fn limit_offset_matches_the_counting_law() {
    // Law: LIMIT n OFFSET k yields min(n, total - k) rows.
    let db = db();
    exec(&db, "CREATE TABLE t");
    for i in 0..7 {
        db.exec(
            "INSERT INTO t VALUES {a: ?}",
            Params::positional(vec![Value::Integer(i)]),
        )
        .unwrap();
    }
    for (limit, offset) in [(3usize, 2usize), (10, 5), (0, 0), (7, 0), (4, 7)] {
        let rows = query(
            &db,
            &format!("SELECT a FROM t ORDER BY a LIMIT {limit} OFFSET {offset}"),
        );
        let expected = limit.min(7usize.saturating_sub(offset));
        assert_eq!(rows.len(), expected, "limit {limit} offset {offset}");
    }
}

#[test]
fn order_by_is_identical_with_and_without_an_index() {
    // Law: the planner's index choice must not change ORDER BY output.
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(
        &db,
        "INSERT INTO t VALUES {p: 5, q: 'e'}, {p: 1, q: 'a'}, {p: 3, q: 'c'}, \
         {p: 2, q: 'b'}, {p: 4, q: 'd'}",
    );
    let unindexed = query(&db, "SELECT p FROM t ORDER BY p ASC");
    exec(&db, "CREATE INDEX ix_p ON t (p)");
    let indexed = query(&db, "SELECT p FROM t ORDER BY p ASC");
    assert_eq!(ints(&unindexed, "p"), ints(&indexed, "p"));
}

#[test]
fn cast_and_arithmetic_projection() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t VALUES {a: '41'}");
    let rows = query(&db, "SELECT CAST(a AS INTEGER) + 1 AS n FROM t");
    assert_eq!(ints(&rows, "n"), vec![42]);

    let err = db
        .query("SELECT CAST(a AS BLOB) FROM missing", Params::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::TableNotFound(_)));
}

#[test]
fn typed_constraints_coerce_inserted_values() {
    let db = db();
    exec(
        &db,
        "CREATE TABLE t (age INTEGER, score DOUBLE DEFAULT 1.5, name TEXT NOT NULL)",
    );
    exec(&db, "INSERT INTO t VALUES {age: '33', name: 'ada'}");
    let rows = query(&db, "SELECT * FROM t");
    assert_eq!(rows[0].get_field("age"), Some(&Value::Integer(33)));
    assert_eq!(rows[0].get_field("score"), Some(&Value::Double(1.5)));

    let err = db
        .exec("INSERT INTO t VALUES {age: 1, name: NULL}", Params::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::NotNullViolation { .. }));
}

#[test]
fn insert_tuple_form_builds_documents() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t (a, b) VALUES (1, 'x'), (2, 'y')");
    let rows = query(&db, "SELECT a, b FROM t ORDER BY a");
    assert_eq!(ints(&rows, "a"), vec![1, 2]);
    assert_eq!(rows[1].get_field("b"), Some(&Value::text("y")));
}

#[test]
fn reindex_rebuilds_from_live_rows() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE INDEX ix ON t (a)");
    exec(&db, "INSERT INTO t VALUES {a: 2}, {a: 1}, {a: 3}");
    exec(&db, "DELETE FROM t WHERE a = 2");
    exec(&db, "REINDEX ix");
    let rows = query(&db, "SELECT a FROM t ORDER BY a");
    assert_eq!(ints(&rows, "a"), vec![1, 3]);
    exec(&db, "REINDEX");
    let rows = query(&db, "SELECT a FROM t WHERE a = 3");
    assert_eq!(ints(&rows, "a"), vec![3]);
}

#[test]
fn drop_table_and_if_exists_variants() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE INDEX ix ON t (a)");
    exec(&db, "DROP TABLE t");
    let err = db.query("SELECT * FROM t", Params::default()).unwrap_err();
    assert!(matches!(err, VellumError::TableNotFound(_)));
    // The table's index went with it.
    let err = db.exec("DROP INDEX ix", Params::default()).unwrap_err();
    assert!(matches!(err, VellumError::IndexNotFound(_)));

    exec(&db, "DROP TABLE IF EXISTS t");
    exec(&db, "DROP INDEX IF EXISTS ix");
    exec(&db, "CREATE TABLE IF NOT EXISTS u");
    exec(&db, "CREATE TABLE IF NOT EXISTS u");
}

#[test]
fn untyped_primary_key_orders_mixed_numerics() {
    // A declared key without a type accepts both numeric kinds; the
    // stored byte order is their numeric order, and SQL equality crosses
    // the kinds.
    let db = db();
    exec(&db, "CREATE TABLE t (a PRIMARY KEY)");
    exec(&db, "INSERT INTO t VALUES {a: 2.5}, {a: 1}, {a: 2}");
    let rows = query(&db, "SELECT a FROM t");
    let values: Vec<_> = rows
        .iter()
        .map(|r| r.get_field("a").cloned().unwrap())
        .collect();
    assert_eq!(
        values,
        vec![Value::Integer(1), Value::Integer(2), Value::Double(2.5)]
    );
    let rows = query(&db, "SELECT a FROM t WHERE a = 2.0");
    assert_eq!(ints(&rows, "a"), vec![2]);
}

#[test]
fn untyped_index_matches_numerics_across_kinds() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE INDEX ix ON t (a)");
    exec(&db, "INSERT INTO t VALUES {a: 1}, {a: 2.0}, {a: 3}");
    // The index scan and a bare filter agree on cross-kind equality.
    let rows = query(&db, "SELECT a FROM t WHERE a = 2");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_field("a"), Some(&Value::Double(2.0)));
    let rows = query(&db, "SELECT a FROM t WHERE a > 2.0");
    assert_eq!(ints(&rows, "a"), vec![3]);
}

#[test]
fn untyped_index_range_with_mixed_endpoints_fails() {
    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "CREATE INDEX ix ON t (a)");
    exec(&db, "INSERT INTO t VALUES {a: 1}, {a: 'x'}");
    let err = db
        .query("SELECT a FROM t WHERE a BETWEEN 1 AND 'z'", Params::default())
        .unwrap_err();
    assert!(matches!(err, VellumError::TypeMismatch { .. }), "{err}");
}

#[test]
fn quoted_identifiers_reach_keyword_named_fields() {
    let db = db();
    exec(&db, "CREATE TABLE `order`");
    exec(&db, "INSERT INTO `order` VALUES {a: 1}");
    let rows = query(&db, "SELECT a FROM \"order\"");
    assert_eq!(ints(&rows, "a"), vec![1]);
}

#[test]
fn cancellation_surfaces_and_rolls_back() {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;

    let db = db();
    exec(&db, "CREATE TABLE t");
    exec(&db, "INSERT INTO t VALUES {a: 1}");
    let flag = Arc::new(AtomicBool::new(true));
    let err = db
        .query_cancellable("DELETE FROM t", Params::default(), flag)
        .unwrap_err();
    assert!(matches!(err, VellumError::Cancelled));
    // The cancelled statement's transaction rolled back.
    assert_eq!(query(&db, "SELECT * FROM t").len(), 1);
}
