//! End-to-end statement tests through the public connection API.

use std::path::PathBuf;
use std::time::Duration;

use pysqlite::{Connection, Error, SqlValue, StatementResult};

fn scratch_db() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    (dir, path)
}

fn open(path: &PathBuf) -> Connection {
    Connection::open_with_timeout(path, Duration::from_millis(200)).expect("open db")
}

fn exec(conn: &mut Connection, sql: &str) -> StatementResult {
    conn.exec(sql)
        .unwrap_or_else(|e| panic!("statement failed [{}]: {}", sql, e))
}

fn rows(conn: &mut Connection, sql: &str) -> Vec<Vec<SqlValue>> {
    match exec(conn, sql) {
        StatementResult::Rows(r) => r.rows.into_iter().map(|row| row.items).collect(),
        other => panic!("expected rows from [{}], got {:?}", sql, other),
    }
}

fn seed_employees(conn: &mut Connection) {
    exec(
        conn,
        "CREATE TABLE employees (id INT PRIMARY KEY, name STR NOT NULL, role STR, salary INT, dept_id INT)",
    );
    exec(
        conn,
        "INSERT INTO employees VALUES \
         (1, 'Alice', 'Engineer', 120000, 10), \
         (2, 'Bob', 'Engineer', 95000, 10), \
         (3, 'Carol', 'Manager', 150000, 20), \
         (4, 'Dave', NULL, NULL, NULL)",
    );
}

#[test]
fn test_create_insert_select_roundtrip() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    let got = rows(&mut conn, "SELECT * FROM employees");
    assert_eq!(got.len(), 4);
    assert_eq!(
        got[0],
        vec![
            SqlValue::Int(1),
            SqlValue::Str("Alice".into()),
            SqlValue::Str("Engineer".into()),
            SqlValue::Int(120000),
            SqlValue::Int(10)
        ]
    );
    // NULLs round-trip.
    assert_eq!(got[3][2], SqlValue::Null);
}

#[test]
fn test_persistence_across_reopen() {
    let (_dir, path) = scratch_db();
    {
        let mut conn = open(&path);
        seed_employees(&mut conn);
    }
    let mut conn = open(&path);
    let got = rows(&mut conn, "SELECT name FROM employees WHERE id = 3");
    assert_eq!(got, vec![vec![SqlValue::Str("Carol".into())]]);
    assert_eq!(conn.table_names().unwrap(), vec!["employees".to_string()]);
}

#[test]
fn test_projection_alias_where_order() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    let got = rows(
        &mut conn,
        "SELECT name AS who, salary + 1 FROM employees WHERE salary >= 100000 ORDER BY who DESC",
    );
    assert_eq!(
        got,
        vec![
            vec![SqlValue::Str("Carol".into()), SqlValue::Int(150001)],
            vec![SqlValue::Str("Alice".into()), SqlValue::Int(120001)],
        ]
    );
    // ORDER BY a non-projected column.
    let got = rows(
        &mut conn,
        "SELECT name FROM employees WHERE salary > 0 ORDER BY salary",
    );
    assert_eq!(
        got,
        vec![
            vec![SqlValue::Str("Bob".into())],
            vec![SqlValue::Str("Alice".into())],
            vec![SqlValue::Str("Carol".into())],
        ]
    );
}

#[test]
fn test_index_scan_results_match_seq_scan() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    let before = rows(&mut conn, "SELECT id FROM employees WHERE role = 'Engineer'");
    exec(&mut conn, "CREATE INDEX idx_role ON employees(role)");
    let after = rows(&mut conn, "SELECT id FROM employees WHERE role = 'Engineer'");
    assert_eq!(before, after);
    assert_eq!(after, vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]]);
    // NULL roles are never matched by the probe.
    let none = rows(&mut conn, "SELECT id FROM employees WHERE role = 'Ghost'");
    assert!(none.is_empty());
}

#[test]
fn test_left_join_pads_with_nulls() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    exec(
        &mut conn,
        "CREATE TABLE employees (id INT PRIMARY KEY, name STR, dept_id INT)",
    );
    exec(
        &mut conn,
        "CREATE TABLE departments (dept_id INT PRIMARY KEY, name STR)",
    );
    exec(
        &mut conn,
        "INSERT INTO employees VALUES (1, 'Alice', 10), (2, 'Bob', NULL)",
    );
    exec(&mut conn, "INSERT INTO departments VALUES (10, 'Eng')");
    let got = rows(
        &mut conn,
        "SELECT e.name, d.name FROM employees e LEFT JOIN departments d ON e.dept_id = d.dept_id",
    );
    assert_eq!(
        got,
        vec![
            vec![SqlValue::Str("Alice".into()), SqlValue::Str("Eng".into())],
            vec![SqlValue::Str("Bob".into()), SqlValue::Null],
        ]
    );
    // INNER drops the unmatched row.
    let got = rows(
        &mut conn,
        "SELECT e.name, d.name FROM employees e INNER JOIN departments d ON e.dept_id = d.dept_id",
    );
    assert_eq!(
        got,
        vec![vec![
            SqlValue::Str("Alice".into()),
            SqlValue::Str("Eng".into())
        ]]
    );
}

#[test]
fn test_group_by_aggregates() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    exec(
        &mut conn,
        "CREATE TABLE employees (id INT PRIMARY KEY, name STR, role STR, salary INT, dept_id INT)",
    );
    exec(
        &mut conn,
        "INSERT INTO employees VALUES \
         (1, 'a', 'E', 100, 10), (2, 'b', 'E', 200, 10), (3, 'c', 'M', 300, 20)",
    );
    let got = rows(
        &mut conn,
        "SELECT dept_id, COUNT(*), AVG(salary) FROM employees GROUP BY dept_id ORDER BY dept_id",
    );
    assert_eq!(
        got,
        vec![
            vec![SqlValue::Int(10), SqlValue::Int(2), SqlValue::Real(150.0)],
            vec![SqlValue::Int(20), SqlValue::Int(1), SqlValue::Real(300.0)],
        ]
    );
}

#[test]
fn test_aggregates_null_handling() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    // COUNT(*) counts NULL rows, COUNT(col) and AVG skip them.
    let got = rows(
        &mut conn,
        "SELECT COUNT(*), COUNT(salary), SUM(salary), MIN(salary), MAX(salary) FROM employees",
    );
    assert_eq!(
        got,
        vec![vec![
            SqlValue::Int(4),
            SqlValue::Int(3),
            SqlValue::Int(365000),
            SqlValue::Int(95000),
            SqlValue::Int(150000),
        ]]
    );
    // Aggregates over an empty set: COUNT is 0, the rest NULL.
    let got = rows(
        &mut conn,
        "SELECT COUNT(*), SUM(salary), AVG(salary) FROM employees WHERE id > 100",
    );
    assert_eq!(
        got,
        vec![vec![SqlValue::Int(0), SqlValue::Null, SqlValue::Null]]
    );
}

#[test]
fn test_cte_materializes_once_and_scans() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    let got = rows(
        &mut conn,
        "WITH hi AS (SELECT name, salary FROM employees WHERE salary > 100000) \
         SELECT name FROM hi ORDER BY name",
    );
    assert_eq!(
        got,
        vec![
            vec![SqlValue::Str("Alice".into())],
            vec![SqlValue::Str("Carol".into())],
        ]
    );
    // A later CTE can read an earlier one.
    let got = rows(
        &mut conn,
        "WITH hi AS (SELECT name, salary FROM employees WHERE salary > 100000), \
              top AS (SELECT name FROM hi WHERE salary > 140000) \
         SELECT name FROM top",
    );
    assert_eq!(got, vec![vec![SqlValue::Str("Carol".into())]]);
}

#[test]
fn test_update_and_delete() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    assert_eq!(
        exec(&mut conn, "UPDATE employees SET salary = salary + 1000 WHERE role = 'Engineer'"),
        StatementResult::Affected(2)
    );
    let got = rows(&mut conn, "SELECT salary FROM employees WHERE id = 1");
    assert_eq!(got, vec![vec![SqlValue::Int(121000)]]);

    // A pk rotation through delete-all-then-insert-all.
    assert_eq!(
        exec(&mut conn, "UPDATE employees SET id = id + 1"),
        StatementResult::Affected(4)
    );
    let got = rows(&mut conn, "SELECT id FROM employees ORDER BY id");
    assert_eq!(
        got,
        vec![
            vec![SqlValue::Int(2)],
            vec![SqlValue::Int(3)],
            vec![SqlValue::Int(4)],
            vec![SqlValue::Int(5)],
        ]
    );

    assert_eq!(
        exec(&mut conn, "DELETE FROM employees WHERE id >= 4"),
        StatementResult::Affected(2)
    );
    let got = rows(&mut conn, "SELECT COUNT(*) FROM employees");
    assert_eq!(got, vec![vec![SqlValue::Int(2)]]);

    // An update that would collide two primary keys changes nothing.
    assert!(matches!(
        conn.exec("UPDATE employees SET id = 2 WHERE id = 3"),
        Err(Error::Constraint(_))
    ));
    let got = rows(&mut conn, "SELECT id FROM employees ORDER BY id");
    assert_eq!(got, vec![vec![SqlValue::Int(2)], vec![SqlValue::Int(3)]]);
}

#[test]
fn test_constraint_and_type_errors() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    assert!(matches!(
        conn.exec("INSERT INTO employees VALUES (1, 'Dup', NULL, NULL, NULL)"),
        Err(Error::Constraint(_))
    ));
    assert!(matches!(
        conn.exec("INSERT INTO employees VALUES (9, NULL, NULL, NULL, NULL)"),
        Err(Error::Constraint(_))
    ));
    assert!(matches!(
        conn.exec("INSERT INTO employees VALUES ('nine', 'Nina', NULL, NULL, NULL)"),
        Err(Error::Schema(_))
    ));
    assert!(matches!(
        conn.exec("SELECT * FROM employees WHERE id < 'x'"),
        Err(Error::Type(_))
    ));
    assert!(matches!(
        conn.exec("SELECT * FROM missing"),
        Err(Error::Schema(_))
    ));
    assert!(matches!(conn.exec("SELEKT 1"), Err(Error::Syntax { .. })));
}

#[test]
fn test_explicit_transaction_commit_and_rollback() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    exec(&mut conn, "CREATE TABLE t (id INT PRIMARY KEY, v STR)");

    exec(&mut conn, "BEGIN TRANSACTION");
    exec(&mut conn, "INSERT INTO t VALUES (1, 'kept')");
    exec(&mut conn, "COMMIT");

    exec(&mut conn, "BEGIN");
    exec(&mut conn, "INSERT INTO t VALUES (2, 'dropped')");
    // Uncommitted changes are visible to the writing connection.
    assert_eq!(rows(&mut conn, "SELECT COUNT(*) FROM t"), vec![vec![SqlValue::Int(2)]]);
    exec(&mut conn, "ROLLBACK");
    assert_eq!(rows(&mut conn, "SELECT COUNT(*) FROM t"), vec![vec![SqlValue::Int(1)]]);

    // A statement error inside a transaction leaves it usable.
    exec(&mut conn, "BEGIN");
    assert!(matches!(
        conn.exec("INSERT INTO t VALUES (1, 'dup')"),
        Err(Error::Constraint(_))
    ));
    exec(&mut conn, "INSERT INTO t VALUES (3, 'ok')");
    exec(&mut conn, "COMMIT");
    assert_eq!(rows(&mut conn, "SELECT COUNT(*) FROM t"), vec![vec![SqlValue::Int(2)]]);

    // Transaction-control statements are validated.
    assert!(matches!(conn.exec("COMMIT"), Err(Error::Schema(_))));
    assert!(matches!(conn.exec("ROLLBACK"), Err(Error::Schema(_))));
    exec(&mut conn, "BEGIN");
    assert!(matches!(conn.exec("BEGIN"), Err(Error::Schema(_))));
    exec(&mut conn, "ROLLBACK");
}

#[test]
fn test_ddl_rolls_back_inside_transaction() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    exec(&mut conn, "BEGIN");
    exec(&mut conn, "CREATE TABLE ephemeral (id INT PRIMARY KEY)");
    exec(&mut conn, "INSERT INTO ephemeral VALUES (1)");
    exec(&mut conn, "ROLLBACK");
    assert!(matches!(
        conn.exec("SELECT * FROM ephemeral"),
        Err(Error::Schema(_))
    ));
    assert!(conn.table_names().unwrap().is_empty());
}

#[test]
fn test_drop_table_and_index() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    seed_employees(&mut conn);
    exec(&mut conn, "CREATE INDEX idx_role ON employees(role)");
    exec(&mut conn, "DROP INDEX idx_role");
    // Query still works without the index.
    assert_eq!(
        rows(&mut conn, "SELECT id FROM employees WHERE role = 'Manager'"),
        vec![vec![SqlValue::Int(3)]]
    );
    exec(&mut conn, "DROP TABLE employees");
    assert!(conn.table_names().unwrap().is_empty());
    assert!(matches!(
        conn.exec("SELECT * FROM employees"),
        Err(Error::Schema(_))
    ));
}

#[test]
fn test_select_without_from() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    let got = rows(&mut conn, "SELECT 1 + 2 * 3, 'hello', NULL");
    assert_eq!(
        got,
        vec![vec![
            SqlValue::Int(7),
            SqlValue::Str("hello".into()),
            SqlValue::Null
        ]]
    );
}

#[test]
fn test_multi_statement_workload_with_big_rows() {
    let (_dir, path) = scratch_db();
    let mut conn = open(&path);
    exec(&mut conn, "CREATE TABLE blobs (id INT PRIMARY KEY, body STR)");
    // Payloads larger than a page exercise overflow chains through SQL.
    let big = "x".repeat(10_000);
    for i in 0..30 {
        exec(
            &mut conn,
            &format!("INSERT INTO blobs VALUES ({}, '{}{}')", i, big, i),
        );
    }
    let got = rows(&mut conn, "SELECT COUNT(*) FROM blobs");
    assert_eq!(got, vec![vec![SqlValue::Int(30)]]);
    let got = rows(&mut conn, "SELECT body FROM blobs WHERE id = 7");
    assert_eq!(got[0][0], SqlValue::Str(format!("{}7", big)));
    exec(&mut conn, "DELETE FROM blobs WHERE id < 15");
    let got = rows(&mut conn, "SELECT COUNT(*) FROM blobs");
    assert_eq!(got, vec![vec![SqlValue::Int(15)]]);
}
