use std::{
    cell::RefCell,
    rc::Rc,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use tambal::{
    config::RepairConfig,
    repair::{Assembler, FullCrawler, SqlDumpAssembler, cipher::CipherDelegate},
    storage::{pager::PageCodec, wal::Salt},
    types::{
        PageNo, RowId,
        cell::Cell,
        error::{DatabaseError, ErrorKind, Result, Severity},
        value::Value,
    },
    utils::{
        mock::{DatabaseBuilder, MemoryAssembler, TempDatabase, WalBuilder},
        notifier,
    },
};

const PAGE_SIZE: usize = 1024;

fn rows(count: i64) -> Vec<(RowId, Vec<Value>)> {
    (1..=count)
        .map(|i| (i, vec![Value::Integer(i), Value::Text(format!("customer number {:05}", i))]))
        .collect()
}

fn build_shop(temp_db: &TempDatabase) -> (DatabaseBuilder, u32) {
    let mut builder = DatabaseBuilder::new(PAGE_SIZE);
    let customers = builder.add_table(
        "customers",
        "CREATE TABLE customers(id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT)",
        &rows(400),
    );
    builder.add_table(
        "notes",
        "CREATE TABLE notes(body TEXT)",
        &[(1, vec![Value::Text("n".repeat(3000))])],
    );
    builder.add_table(
        "sqlite_sequence",
        "CREATE TABLE sqlite_sequence(name,seq)",
        &[(1, vec![Value::Text("customers".to_string()), Value::Integer(400)])],
    );
    builder.write(&temp_db.path).unwrap();
    (builder, customers)
}

#[test]
fn test_healthy_database_is_fully_recovered() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);

    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();

    assert!(report.completed);
    assert_eq!(report.score, 1.0);
    assert_eq!(report.tables, 2);
    assert_eq!(report.cells, 401);
    assert!(report.corrupted_pages.is_empty());
    assert!(report.finished_at.is_some());

    assert!(assembler.assembling && assembler.assembled);
    assert_eq!(assembler.table_rows("customers"), rows(400));
    assert_eq!(assembler.table_rows("notes")[0].1, vec![Value::Text("n".repeat(3000))]);
    assert_eq!(assembler.sequences.get("customers"), Some(&400));
    assert!(!assembler.tables.contains_key("sqlite_sequence"));
}

#[test]
fn test_damaged_leaf_gives_partial_score() {
    let temp_db = TempDatabase::new();
    let (_, customers) = build_shop(&temp_db);
    let leaves = {
        let mut pager = tambal::storage::pager::Pager::new(&temp_db.path);
        pager.initialize().unwrap();
        pager.acquire_page(customers).unwrap().sub_page_numbers().to_vec()
    };
    let victim = leaves[leaves.len() / 2];
    temp_db.scramble_page(victim, PAGE_SIZE).unwrap();

    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();

    assert!(report.completed);
    assert!(report.score > 0.0 && report.score < 1.0);
    assert_eq!(report.corrupted_pages, vec![victim]);
    let recovered = assembler.table_rows("customers").len();
    assert!(recovered > 300 && recovered < 400);
    assert_eq!(assembler.table_rows("notes").len(), 1);
}

#[test]
fn test_progress_is_monotonic_and_finishes() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);

    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = seen.clone();
    let mut assembler = MemoryAssembler::new();
    let mut crawler = FullCrawler::new(&temp_db.path, &mut assembler);
    crawler.set_progress_callback(move |progress, increment| {
        assert!(increment > 0.0);
        sink.borrow_mut().push(progress);
    });
    crawler.work().unwrap();
    assert_eq!(crawler.progress(), 1.0);
    drop(crawler);

    let seen = seen.borrow();
    assert!(seen.len() > 2);
    assert!(seen.windows(2).all(|pair| pair[0] <= pair[1]));
    assert!(seen.iter().all(|progress| (0.0..=1.0).contains(progress)));
    assert_eq!(seen.last(), Some(&1.0));
}

#[test]
fn test_nothing_to_salvage() {
    let temp_db = TempDatabase::new();
    temp_db.write(&[]).unwrap();
    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(report.score, 0.0);
    assert_eq!(report.cells, 0);

    temp_db.write(&vec![7u8; 4096]).unwrap();
    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(report.score, 0.0);
    assert!(!assembler.assembling);
}

#[test]
fn test_destroyed_schema_salvages_nothing_but_does_not_fail() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);
    // wipe the master leaf but keep the database header
    let zeros = vec![0u8; PAGE_SIZE - 100];
    temp_db.patch_page(1, PAGE_SIZE, 100, &zeros).unwrap();

    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert!(report.completed);
    assert_eq!(report.tables, 0);
    assert_eq!(report.corrupted_pages, vec![1]);
}

#[test]
fn test_interrupted_repair_is_reported_as_notice() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let path = temp_db.path.clone();
    notifier::set_notification("interrupted-repair", move |error, notified| {
        if notified == path.as_path() && error.kind() == ErrorKind::Interrupt {
            assert_eq!(error.severity(), Severity::Notice);
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let mut assembler = MemoryAssembler::new();
    let mut crawler = FullCrawler::new(&temp_db.path, &mut assembler);
    crawler.interrupt_handle().interrupt();
    let report = crawler.work().unwrap();
    notifier::remove_notification("interrupted-repair");

    assert!(!report.completed);
    assert_eq!(seen.load(Ordering::SeqCst), 1);
}

#[test]
fn test_interrupted_repair_is_incomplete() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);

    let mut assembler = MemoryAssembler::new();
    let mut crawler = FullCrawler::new(&temp_db.path, &mut assembler);
    crawler.interrupt_handle().interrupt();
    let report = crawler.work().unwrap();
    assert!(!report.completed);
    assert!(crawler.progress() < 1.0);
}

#[test]
fn test_duplicate_rowids_are_conflicts() {
    let temp_db = TempDatabase::new();
    let mut builder = DatabaseBuilder::new(PAGE_SIZE);
    let mut duplicated = rows(5);
    duplicated.push((3, vec![Value::Integer(3), Value::Text("again".to_string())]));
    builder.add_table("t", "CREATE TABLE t(a, b)", &duplicated);
    builder.write(&temp_db.path).unwrap();

    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.cells, 5);
    assert!(report.score < 1.0);
    assert!(report.corrupted_pages.is_empty());
}

#[test]
fn test_milestones_follow_the_interval() {
    let temp_db = TempDatabase::new();
    let mut builder = DatabaseBuilder::new(PAGE_SIZE);
    builder.add_table("t", "CREATE TABLE t(a, b)", &rows(35));
    builder.write(&temp_db.path).unwrap();

    let config = RepairConfig {
        milestone_interval: 10,
        ..RepairConfig::default()
    };
    let mut assembler = MemoryAssembler::new();
    FullCrawler::new(&temp_db.path, &mut assembler).with_config(config).work().unwrap();
    assert_eq!(assembler.milestones, 3);
}

#[test]
fn test_committed_wal_rows_are_recovered() {
    let temp_db = TempDatabase::new();
    let mut builder = DatabaseBuilder::new(PAGE_SIZE);
    let root = builder.add_table("t", "CREATE TABLE t(a, b)", &rows(2));
    builder.write(&temp_db.path).unwrap();

    // the same table as it looks after one more insert, committed through the WAL
    let mut updated = DatabaseBuilder::new(PAGE_SIZE);
    let updated_root = updated.add_table("t", "CREATE TABLE t(a, b)", &rows(3));
    assert_eq!(updated_root, root);
    let updated_page = updated.build()[(root as usize - 1) * PAGE_SIZE..root as usize * PAGE_SIZE].to_vec();
    WalBuilder::new(PAGE_SIZE, Salt::new(1, 1))
        .frame(root, &updated_page, updated.number_of_pages())
        .write(temp_db.wal_path())
        .unwrap();

    let mut assembler = MemoryAssembler::new();
    FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(assembler.table_rows("t"), rows(3));

    let config = RepairConfig {
        skip_wal: true,
        ..RepairConfig::default()
    };
    let mut assembler = MemoryAssembler::new();
    FullCrawler::new(&temp_db.path, &mut assembler).with_config(config).work().unwrap();
    assert_eq!(assembler.table_rows("t"), rows(2));
}

/// Accepts tables but cannot store a single row.
struct BrokenDestination;

impl Assembler for BrokenDestination {
    fn mark_as_assembling(&mut self) -> Result<()> {
        Ok(())
    }

    fn assemble_table(&mut self, _table_name: &str, _sql: &str) -> Result<()> {
        Ok(())
    }

    fn assemble_cell(&mut self, _cell: &Cell) -> Result<()> {
        Err(DatabaseError::Assemble {
            details: "destination is read-only".to_string(),
        })
    }

    fn assemble_sequence(&mut self, _table_name: &str, _sequence: i64) -> Result<()> {
        Ok(())
    }

    fn mark_as_milestone(&mut self) -> Result<()> {
        Ok(())
    }

    fn mark_as_assembled(&mut self) -> Result<()> {
        Ok(())
    }
}

#[test]
fn test_destination_failure_is_critical() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);

    let mut assembler = BrokenDestination;
    let result = FullCrawler::new(&temp_db.path, &mut assembler).work();
    assert!(matches!(result, Err(DatabaseError::Assemble { .. })));
}

#[test]
fn test_sql_dump_output() {
    let temp_db = TempDatabase::new();
    let mut builder = DatabaseBuilder::new(PAGE_SIZE);
    builder.add_table(
        "people",
        "CREATE TABLE people(id INTEGER PRIMARY KEY, name TEXT, photo BLOB)",
        &[
            (1, vec![Value::Null, Value::Text("O'Brien".to_string()), Value::Blob(vec![0xca, 0xfe])]),
            (7, vec![Value::Null, Value::Text("Zed".to_string()), Value::Null]),
        ],
    );
    builder.write(&temp_db.path).unwrap();

    let mut assembler = SqlDumpAssembler::new(Vec::new());
    FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    let dump = String::from_utf8(assembler.into_inner()).unwrap();

    assert!(dump.starts_with("PRAGMA foreign_keys=OFF;\nBEGIN TRANSACTION;\n"));
    assert!(dump.contains("CREATE TABLE people(id INTEGER PRIMARY KEY, name TEXT, photo BLOB);"));
    assert!(dump.contains(r#"INSERT INTO "people"(rowid, "id", "name", "photo") VALUES(1, 1, 'O''Brien', X'CAFE');"#));
    assert!(dump.contains(r#"VALUES(7, 7, 'Zed', NULL);"#));
    assert!(dump.trim_end().ends_with("COMMIT;"));
}

struct XorCodec;

impl PageCodec for XorCodec {
    fn decode(&self, _page: PageNo, data: &[u8]) -> Option<Vec<u8>> {
        Some(data.iter().map(|byte| byte ^ 0x5a).collect())
    }
}

#[derive(Default)]
struct XorCipher {
    refuse: bool,
    opened: bool,
    closed: bool,
}

impl CipherDelegate for XorCipher {
    fn open_cipher_in_memory(&mut self) -> Result<()> {
        if self.refuse {
            return Err(DatabaseError::Cipher {
                details: "wrong key".to_string(),
            });
        }
        self.opened = true;
        Ok(())
    }

    fn set_cipher_salt(&mut self, _salt: Salt) {}

    fn cipher_context(&self) -> Option<Arc<dyn PageCodec>> {
        self.opened.then(|| Arc::new(XorCodec) as Arc<dyn PageCodec>)
    }

    fn cipher_page_size(&self) -> usize {
        PAGE_SIZE
    }

    fn close_cipher(&mut self) {
        self.closed = true;
    }
}

#[test]
fn test_encrypted_database() {
    let temp_db = TempDatabase::new();
    build_shop(&temp_db);
    let encrypted: Vec<u8> = temp_db.read().unwrap().iter().map(|byte| byte ^ 0x5a).collect();
    temp_db.write(&encrypted).unwrap();

    let mut cipher = XorCipher::default();
    let mut assembler = MemoryAssembler::new();
    let report = {
        let mut crawler = FullCrawler::new(&temp_db.path, &mut assembler);
        crawler.set_cipher_delegate(&mut cipher);
        crawler.work().unwrap()
    };
    assert_eq!(report.score, 1.0);
    assert_eq!(assembler.table_rows("customers"), rows(400));
    assert!(cipher.opened && cipher.closed);

    // without the cipher the file is noise
    let mut assembler = MemoryAssembler::new();
    let report = FullCrawler::new(&temp_db.path, &mut assembler).work().unwrap();
    assert_eq!(report.score, 0.0);

    let mut cipher = XorCipher {
        refuse: true,
        ..XorCipher::default()
    };
    let mut assembler = MemoryAssembler::new();
    let mut crawler = FullCrawler::new(&temp_db.path, &mut assembler);
    crawler.set_cipher_delegate(&mut cipher);
    assert!(matches!(crawler.work(), Err(DatabaseError::Cipher { .. })));
}
