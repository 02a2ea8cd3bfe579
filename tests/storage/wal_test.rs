use tambal::{
    storage::wal::{Salt, Wal},
    types::{WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE},
    utils::mock::{TempDatabase, WalBuilder},
};

const PAGE_SIZE: usize = 512;

fn page(fill: u8) -> Vec<u8> {
    vec![fill; PAGE_SIZE]
}

fn open_wal(temp_db: &TempDatabase) -> Wal {
    let mut wal = Wal::new(&temp_db.path);
    wal.set_page_size(PAGE_SIZE);
    wal.initialize().unwrap();
    wal
}

fn frame_offset(frame: usize) -> usize {
    WAL_HEADER_SIZE + (frame - 1) * (WAL_FRAME_HEADER_SIZE + PAGE_SIZE)
}

#[test]
fn test_wal_path_is_derived_from_database() {
    let temp_db = TempDatabase::new();
    let wal = Wal::new(&temp_db.path);
    assert_eq!(wal.path(), temp_db.wal_path().as_path());
}

#[test]
fn test_only_committed_frames_are_published() {
    let temp_db = TempDatabase::new();
    WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 0)
        .frame(3, &page(2), 3)
        .frame(4, &page(3), 0)
        .write(temp_db.wal_path())
        .unwrap();

    let wal = open_wal(&temp_db);
    assert_eq!(wal.frame_count(), 3);
    assert_eq!(wal.max_frame(), 2);
    assert!(wal.contains_page(2));
    assert!(wal.contains_page(3));
    assert!(!wal.contains_page(4));
    assert_eq!(wal.disposed_pages(), 1);
    assert_eq!(wal.truncate(), Some(3));
    assert_eq!(wal.max_page_number(), 3);
}

#[test]
fn test_latest_committed_copy_wins() {
    let temp_db = TempDatabase::new();
    WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .frame(2, &page(9), 2)
        .write(temp_db.wal_path())
        .unwrap();

    let wal = open_wal(&temp_db);
    assert_eq!(wal.number_of_pages(), 1);
    assert_eq!(wal.acquire_page_data(2).unwrap()[0], 9);
}

#[test]
fn test_checksum_mismatch_ends_the_valid_prefix() {
    let temp_db = TempDatabase::new();
    let mut data = WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .frame(3, &page(2), 3)
        .frame(4, &page(3), 4)
        .build();
    data[frame_offset(2) + WAL_FRAME_HEADER_SIZE + 10] ^= 0x55;
    std::fs::write(temp_db.wal_path(), data).unwrap();

    let wal = open_wal(&temp_db);
    assert_eq!(wal.frame_count(), 1);
    assert_eq!(wal.max_frame(), 1);
    assert!(wal.contains_page(2));
    assert!(!wal.contains_page(3));
    assert!(!wal.contains_page(4));
}

#[test]
fn test_damaged_frame_header_ends_the_valid_prefix() {
    // page number at +0..4, commit size at +4..8
    for field_offset in [3, 7] {
        let temp_db = TempDatabase::new();
        let mut data = WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
            .frame(2, &page(1), 2)
            .frame(3, &page(2), 3)
            .frame(4, &page(3), 4)
            .build();
        data[frame_offset(2) + field_offset] ^= 0x01;
        std::fs::write(temp_db.wal_path(), data).unwrap();

        let wal = open_wal(&temp_db);
        assert_eq!(wal.frame_count(), 1, "field offset {}", field_offset);
        assert_eq!(wal.max_frame(), 1);
        assert!(wal.contains_page(2));
        assert!(!wal.contains_page(3));
        assert!(!wal.contains_page(4));
    }
}

#[test]
fn test_stale_salt_ends_the_valid_prefix() {
    let temp_db = TempDatabase::new();
    let mut data = WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .frame(3, &page(2), 3)
        .build();
    let salt_offset = frame_offset(2) + 8;
    data[salt_offset..salt_offset + 4].copy_from_slice(&99u32.to_be_bytes());
    std::fs::write(temp_db.wal_path(), data).unwrap();

    let wal = open_wal(&temp_db);
    assert_eq!(wal.frame_count(), 1);
    assert!(!wal.contains_page(3));
}

#[test]
fn test_big_endian_checksums() {
    let temp_db = TempDatabase::new();
    WalBuilder::new(PAGE_SIZE, Salt::new(5, 6))
        .big_endian()
        .frame(2, &page(7), 2)
        .write(temp_db.wal_path())
        .unwrap();

    let wal = open_wal(&temp_db);
    assert!(wal.is_big_endian_checksum());
    assert_eq!(wal.salt(), Salt::new(5, 6));
    assert_eq!(wal.acquire_page_data(2).unwrap()[100], 7);
}

#[test]
fn test_max_allowed_frame_caps_the_replay() {
    let temp_db = TempDatabase::new();
    WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .frame(2, &page(2), 2)
        .write(temp_db.wal_path())
        .unwrap();

    let mut wal = Wal::new(&temp_db.path);
    wal.set_page_size(PAGE_SIZE);
    wal.set_max_allowed_frame(1);
    wal.initialize().unwrap();
    assert_eq!(wal.frame_count(), 1);
    assert_eq!(wal.acquire_page_data(2).unwrap()[0], 1);
}

#[test]
fn test_bad_header_is_corruption() {
    let temp_db = TempDatabase::new();
    let mut data = WalBuilder::new(PAGE_SIZE, Salt::new(3, 4)).frame(2, &page(1), 2).build();
    data[0] = 0;
    std::fs::write(temp_db.wal_path(), &data).unwrap();

    let mut wal = Wal::new(&temp_db.path);
    wal.set_page_size(PAGE_SIZE);
    assert!(wal.initialize().unwrap_err().is_corruption());
}

#[test]
fn test_page_size_mismatch_is_corruption() {
    let temp_db = TempDatabase::new();
    WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .write(temp_db.wal_path())
        .unwrap();

    let mut wal = Wal::new(&temp_db.path);
    wal.set_page_size(PAGE_SIZE * 2);
    assert!(wal.initialize().unwrap_err().is_corruption());
}

#[test]
fn test_partial_trailing_frame_is_ignored() {
    let temp_db = TempDatabase::new();
    let mut data = WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .frame(3, &page(2), 3)
        .build();
    data.truncate(data.len() - 10);
    std::fs::write(temp_db.wal_path(), data).unwrap();

    let wal = open_wal(&temp_db);
    assert_eq!(wal.frame_count(), 1);
    assert!(!wal.contains_page(3));
}

#[test]
fn test_dispose_forgets_every_frame() {
    let temp_db = TempDatabase::new();
    WalBuilder::new(PAGE_SIZE, Salt::new(3, 4))
        .frame(2, &page(1), 2)
        .write(temp_db.wal_path())
        .unwrap();

    let mut wal = open_wal(&temp_db);
    wal.dispose();
    assert!(!wal.contains_page(2));
    assert_eq!(wal.frame_count(), 0);
    assert!(wal.acquire_page_data(2).is_err());
}
