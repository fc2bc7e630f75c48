//! Crash simulation: snapshots of the database and journal taken at
//! chosen points stand in for a killed process; reopening the snapshot
//! must always land on a committed state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pysqlite::{Connection, SqlValue, StatementResult};

fn scratch() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("crash.db");
    (dir, path)
}

fn open(path: &Path) -> Connection {
    Connection::open_with_timeout(path, Duration::from_millis(200)).expect("open db")
}

fn journal_path(db: &Path) -> PathBuf {
    let mut os = db.as_os_str().to_owned();
    os.push("-journal");
    PathBuf::from(os)
}

/// Copies the database (and its journal, if present) as a crashed
/// process would have left them.
fn snapshot(db: &Path, dest_dir: &Path) -> PathBuf {
    let dest = dest_dir.join("snapshot.db");
    std::fs::copy(db, &dest).unwrap();
    let j = journal_path(db);
    if j.exists() {
        std::fs::copy(&j, journal_path(&dest)).unwrap();
    }
    dest
}

fn count(conn: &mut Connection, table: &str) -> i64 {
    match conn.exec(&format!("SELECT COUNT(*) FROM {}", table)).unwrap() {
        StatementResult::Rows(r) => match r.rows[0].items[0] {
            SqlValue::Int(n) => n,
            ref v => panic!("expected INT, got {:?}", v),
        },
        other => panic!("expected rows, got {:?}", other),
    }
}

/// Scenario A: a transaction killed before COMMIT leaves no trace, and
/// the journal is gone after reopening.
#[test]
fn test_crash_before_commit_rolls_back() {
    let (dir, path) = scratch();
    let mut conn = open(&path);
    conn.exec("CREATE TABLE t (id INT PRIMARY KEY, v STR)").unwrap();

    conn.exec("BEGIN").unwrap();
    conn.exec("INSERT INTO t VALUES (1, 'a')").unwrap();
    conn.exec("INSERT INTO t VALUES (2, 'b')").unwrap();
    // The journal exists while the transaction is live.
    assert!(journal_path(&path).exists());

    // "Kill" the process mid-transaction.
    let snap = snapshot(&path, dir.path());
    drop(conn);

    let mut reopened = open(&snap);
    assert_eq!(count(&mut reopened, "t"), 0);
    assert!(!journal_path(&snap).exists());
}

/// A crash after the journal was synced and the main file partially
/// overwritten: the pre-images win.
#[test]
fn test_crash_mid_overwrite_restores_preimages() {
    let (dir, path) = scratch();
    let mut conn = open(&path);
    conn.exec("CREATE TABLE t (id INT PRIMARY KEY, v STR)").unwrap();
    conn.exec("INSERT INTO t VALUES (1, 'committed')").unwrap();
    drop(conn);

    let committed_image = std::fs::read(&path).unwrap();

    // Run a transaction that rewrites the table, snapshotting the journal
    // it leaves while open.
    let mut conn = open(&path);
    conn.exec("BEGIN").unwrap();
    conn.exec("UPDATE t SET v = 'doomed'").unwrap();
    conn.exec("INSERT INTO t VALUES (2, 'doomed too')").unwrap();
    let journal_bytes = std::fs::read(journal_path(&path)).unwrap();
    conn.exec("ROLLBACK").unwrap();
    drop(conn);

    // Build the crash image: journal present, main file scribbled with a
    // half-finished overwrite of the table's root (page 2, the page the
    // journal holds a pre-image of) plus a grown page.
    let snap = dir.path().join("scribbled.db");
    let mut scribbled = committed_image.clone();
    let page = 4096;
    assert!(scribbled.len() >= 3 * page);
    for b in scribbled[2 * page..3 * page].iter_mut() {
        *b = 0xee;
    }
    scribbled.extend(std::iter::repeat(0xee_u8).take(page));
    std::fs::write(&snap, &scribbled).unwrap();
    std::fs::write(journal_path(&snap), &journal_bytes).unwrap();

    let mut reopened = open(&snap);
    assert!(!journal_path(&snap).exists());
    assert_eq!(count(&mut reopened, "t"), 1);
    match reopened.exec("SELECT v FROM t").unwrap() {
        StatementResult::Rows(r) => {
            assert_eq!(r.rows[0].items[0], SqlValue::Str("committed".into()));
        }
        other => panic!("expected rows, got {:?}", other),
    }
    // The file shrank back to its committed page count.
    assert_eq!(
        std::fs::read(&snap).unwrap().len(),
        committed_image.len()
    );
}

/// A journal whose header never reached the disk is ignored: the main
/// file was never touched.
#[test]
fn test_headerless_journal_is_harmless() {
    let (_dir, path) = scratch();
    let mut conn = open(&path);
    conn.exec("CREATE TABLE t (id INT PRIMARY KEY, v STR)").unwrap();
    conn.exec("INSERT INTO t VALUES (1, 'a')").unwrap();
    drop(conn);

    std::fs::write(journal_path(&path), b"PY").unwrap();
    let mut reopened = open(&path);
    assert_eq!(count(&mut reopened, "t"), 1);
}

/// Auto-commit atomicity: a failing multi-row INSERT outside any
/// transaction leaves no partial effect.
#[test]
fn test_autocommit_statement_is_atomic() {
    let (_dir, path) = scratch();
    let mut conn = open(&path);
    conn.exec("CREATE TABLE t (id INT PRIMARY KEY, v STR)").unwrap();
    conn.exec("INSERT INTO t VALUES (1, 'a')").unwrap();
    // The second row collides; the first must not stick.
    assert!(conn
        .exec("INSERT INTO t VALUES (7, 'x'), (1, 'dup'), (8, 'y')")
        .is_err());
    assert_eq!(count(&mut conn, "t"), 1);
    assert!(!journal_path(&path).exists());
}

/// Interleaved committed transactions with a crash between them: the
/// reopened state equals the last committed prefix.
#[test]
fn test_reopen_equals_committed_prefix() {
    let (dir, path) = scratch();
    let mut conn = open(&path);
    conn.exec("CREATE TABLE t (id INT PRIMARY KEY, v STR)").unwrap();
    for i in 0..10 {
        conn.exec(&format!("INSERT INTO t VALUES ({}, 'r{}')", i, i))
            .unwrap();
    }
    // Start an eleventh, uncommitted change and crash.
    conn.exec("BEGIN").unwrap();
    conn.exec("DELETE FROM t WHERE id < 5").unwrap();
    conn.exec("INSERT INTO t VALUES (100, 'phantom')").unwrap();
    let snap = snapshot(&path, dir.path());
    drop(conn);

    let mut reopened = open(&snap);
    assert_eq!(count(&mut reopened, "t"), 10);
    match reopened.exec("SELECT COUNT(*) FROM t WHERE id = 100").unwrap() {
        StatementResult::Rows(r) => assert_eq!(r.rows[0].items[0], SqlValue::Int(0)),
        other => panic!("expected rows, got {:?}", other),
    }
}
