use std::fs;

use rusqlite::{Connection, params, types::Value as SqlValue};
use tambal::{
    repair::{Backup, FullCrawler, Mechanic, SqlDumpAssembler},
    storage::pager::Pager,
    types::{RowId, value::Value},
    utils::mock::{MemoryAssembler, TempDatabase},
};

const SCHEMA: &str = "
    CREATE TABLE contacts(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT NOT NULL, score REAL, avatar BLOB);
    CREATE INDEX contacts_name ON contacts(name);
    CREATE TABLE events(kind, payload);
    CREATE VIEW recent_events AS SELECT * FROM events WHERE kind = 2;
";

fn to_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(integer) => Value::Integer(integer),
        SqlValue::Real(real) => Value::Real(real),
        SqlValue::Text(text) => Value::Text(text),
        SqlValue::Blob(blob) => Value::Blob(blob),
    }
}

fn query_rows(conn: &Connection, table: &str) -> Vec<(RowId, Vec<Value>)> {
    let mut stmt = conn.prepare(&format!("SELECT rowid, * FROM {} ORDER BY rowid", table)).unwrap();
    let columns = stmt.column_count();
    stmt.query_map([], |row| {
        let rowid: i64 = row.get(0)?;
        let values = (1..columns)
            .map(|index| row.get::<_, SqlValue>(index).map(to_value))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok((rowid, values))
    })
    .unwrap()
    .collect::<rusqlite::Result<Vec<_>>>()
    .unwrap()
}

fn sequence_of(conn: &Connection, table: &str) -> i64 {
    conn.query_row("SELECT seq FROM sqlite_sequence WHERE name = ?1", [table], |row| row.get(0))
        .unwrap()
}

/// The rowid alias column is stored as NULL on disk.
fn with_rowid_alias(rows: Vec<(RowId, Vec<Value>)>) -> Vec<(RowId, Vec<Value>)> {
    rows.into_iter()
        .map(|(rowid, mut values)| {
            assert_eq!(values[0], Value::Null);
            values[0] = Value::Integer(rowid);
            (rowid, values)
        })
        .collect()
}

fn insert_contacts(conn: &Connection, range: std::ops::RangeInclusive<i64>) {
    let tx = conn.unchecked_transaction().unwrap();
    for i in range {
        let avatar = if i % 100 == 0 { Some(vec![i as u8; 9000]) } else { None };
        tx.execute(
            "INSERT INTO contacts(name, score, avatar) VALUES(?1, ?2, ?3)",
            params![format!("contact {}", i), i as f64 + 0.25, avatar],
        )
        .unwrap();
    }
    tx.commit().unwrap();
}

fn populate(conn: &Connection) {
    conn.execute_batch(SCHEMA).unwrap();
    insert_contacts(conn, 1..=2000);
    let tx = conn.unchecked_transaction().unwrap();
    for i in 1..=300i64 {
        tx.execute(
            "INSERT INTO events(kind, payload) VALUES(?1, ?2)",
            params![i % 3, "e".repeat(i as usize * 20)],
        )
        .unwrap();
    }
    tx.commit().unwrap();
    conn.execute_batch("DELETE FROM contacts WHERE id % 7 = 0; DELETE FROM events WHERE kind = 0;")
        .unwrap();
}

fn create_database(temp_db: &TempDatabase) {
    let conn = Connection::open(&temp_db.path).unwrap();
    conn.execute_batch("PRAGMA journal_mode=DELETE;").unwrap();
    populate(&conn);
}

#[test]
fn test_crawl_matches_sqlite() {
    let temp_db = TempDatabase::new();
    create_database(&temp_db);
    let conn = Connection::open(&temp_db.path).unwrap();

    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();

    assert!(report.completed);
    assert_eq!(report.score, 1.0);
    assert_eq!(report.conflicts, 0);
    assert!(report.corrupted_pages.is_empty());
    assert_eq!(assembler.tables.keys().collect::<Vec<_>>(), vec!["contacts", "events"]);
    assert_eq!(with_rowid_alias(assembler.table_rows("contacts")), query_rows(&conn, "contacts"));
    assert_eq!(assembler.table_rows("events"), query_rows(&conn, "events"));
    assert_eq!(assembler.sequences.get("contacts"), Some(&sequence_of(&conn, "contacts")));
}

#[test]
fn test_dump_rebuilds_the_database() {
    let temp_db = TempDatabase::new();
    create_database(&temp_db);
    let conn = Connection::open(&temp_db.path).unwrap();

    let mut assembler = SqlDumpAssembler::new(Vec::new());
    FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    let dump = String::from_utf8(assembler.into_inner()).unwrap();

    let restored = Connection::open_in_memory().unwrap();
    restored.execute_batch(&dump).unwrap();
    for table in ["contacts", "events"] {
        assert_eq!(query_rows(&restored, table), query_rows(&conn, table));
    }
    assert_eq!(sequence_of(&restored, "contacts"), 2000);

    let check: String = restored.query_row("PRAGMA integrity_check", [], |row| row.get(0)).unwrap();
    assert_eq!(check, "ok");
}

#[test]
fn test_uncheckpointed_wal_is_read() {
    let temp_db = TempDatabase::new();
    let conn = Connection::open(&temp_db.path).unwrap();
    conn.execute_batch("PRAGMA journal_mode=DELETE;").unwrap();
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch("PRAGMA journal_mode=WAL;").unwrap();
    conn.execute_batch("PRAGMA wal_autocheckpoint=0;").unwrap();
    insert_contacts(&conn, 1..=500);

    // the writer stays open, so every row still lives in the WAL only
    let wal_size = fs::metadata(temp_db.wal_path()).unwrap().len();
    assert!(wal_size > 0);

    let mut pager = Pager::new(&temp_db.path);
    pager.initialize().unwrap();
    assert!(pager.wal_max_frame() > 0);
    assert!(pager.number_of_pages() as u64 * pager.page_size() as u64 > pager.file_size());
    drop(pager);

    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(report.score, 1.0);
    assert_eq!(with_rowid_alias(assembler.table_rows("contacts")), query_rows(&conn, "contacts"));
    assert_eq!(assembler.sequences.get("contacts"), Some(&500));
}

#[test]
fn test_utf16_database() {
    let temp_db = TempDatabase::new();
    let conn = Connection::open(&temp_db.path).unwrap();
    conn.execute_batch("PRAGMA encoding='UTF-16le'; CREATE TABLE words(word TEXT, note);").unwrap();
    for word in ["hello", "grüße", "日本語", "", "emoji 🦀"] {
        conn.execute("INSERT INTO words VALUES(?1, ?2)", params![word, word.len() as i64])
            .unwrap();
    }

    let mut assembler = MemoryAssembler::new();
    FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(assembler.table_rows("words"), query_rows(&conn, "words"));
}

#[test]
fn test_material_repairs_damaged_sqlite_database() {
    let temp_db = TempDatabase::new();
    create_database(&temp_db);
    let expected = query_rows(&Connection::open(&temp_db.path).unwrap(), "events");

    let material = Backup::new(&temp_db.path).work().unwrap();
    let page_size = material.info.page_size as usize;

    // the header page and the events root are wiped, leaves stay intact
    let events_root = material.contents["events"].root_page;
    let mut data = temp_db.read().unwrap();
    data[..page_size].fill(0);
    let root_offset = (events_root as usize - 1) * page_size;
    if !material.contents["events"].pages.contains_key(&events_root) {
        data[root_offset..root_offset + page_size].fill(0xff);
    }
    temp_db.write(&data).unwrap();

    let mut assembler = MemoryAssembler::new();
    let report = Mechanic::new(&temp_db.path, &material, &mut assembler).work().unwrap();
    assert!(report.completed);
    assert_eq!(report.score, 1.0);
    assert_eq!(assembler.table_rows("events"), expected);
    assert_eq!(assembler.table_rows("contacts").len(), 2000 - 2000 / 7);
}
