use std::collections::BTreeMap;

use proptest::prelude::*;
use tambal::{
    repair::material::{Content, MATERIAL_HEADER_SIZE, Material, MaterialInfo},
    storage::wal::Salt,
    types::error::DatabaseError,
    utils::mock::TempDatabase,
};

fn sample_material() -> Material {
    let mut material = Material::new(MaterialInfo {
        page_size: 4096,
        reserved_bytes: 0,
        wal_salt: Salt::new(0x1234, 0x5678),
        wal_frame_count: 3,
    });
    material.contents.insert(
        "users".to_string(),
        Content {
            sql: "CREATE TABLE users(id INTEGER PRIMARY KEY, name TEXT)".to_string(),
            root_page: 2,
            sequence: 17,
            associated_sqls: vec!["CREATE INDEX users_name ON users(name)".to_string()],
            pages: BTreeMap::from([(3, 0xdead_beef), (4, 1), (900, 2)]),
        },
    );
    material.contents.insert(
        "empty".to_string(),
        Content {
            sql: "CREATE TABLE empty(a)".to_string(),
            root_page: 5,
            ..Content::default()
        },
    );
    material
}

fn corrupted_element(data: &[u8]) -> Option<String> {
    match Material::init_with_data(data) {
        Err(DatabaseError::CorruptedMaterial { element }) => Some(element),
        _ => None,
    }
}

#[test]
fn test_material_round_trip() {
    let material = sample_material();
    let data = material.encoded_data(3).unwrap();
    assert_eq!(Material::init_with_data(&data).unwrap(), material);
    assert_eq!(material.number_of_pages(), 3);
}

#[test]
fn test_empty_material_round_trip() {
    let material = Material::default();
    let data = material.encoded_data(3).unwrap();
    assert_eq!(Material::init_with_data(&data).unwrap(), material);
}

#[test]
fn test_checksum_guards_the_body() {
    let mut data = sample_material().encoded_data(3).unwrap();
    data[4] ^= 0x01;
    assert_eq!(corrupted_element(&data).as_deref(), Some("Checksum"));
}

#[test]
fn test_damaged_compression_is_content_corruption() {
    let mut data = sample_material().encoded_data(3).unwrap();
    let last = data.len() - 1;
    data[MATERIAL_HEADER_SIZE..=last].iter_mut().for_each(|byte| *byte = 0x5a);
    assert_eq!(corrupted_element(&data).as_deref(), Some("Content"));
}

#[test]
fn test_short_header_and_version() {
    let data = sample_material().encoded_data(3).unwrap();
    assert_eq!(corrupted_element(&data[..10]).as_deref(), Some("Header"));

    let mut data = data;
    data[8] = 0x7f;
    assert_eq!(corrupted_element(&data).as_deref(), Some("Version"));
}

#[test]
fn test_truncations_never_panic() {
    let data = sample_material().encoded_data(1).unwrap();
    for length in 0..data.len() {
        assert!(Material::init_with_data(&data[..length]).is_err());
    }
}

#[test]
fn test_empty_names_cannot_be_encoded() {
    let mut material = Material::default();
    material.contents.insert(String::new(), Content::default());
    assert!(material.encoded_data(3).is_err());
}

#[test]
fn test_save_and_load() {
    let temp_db = TempDatabase::new();
    let path = temp_db.directory().join("users.material");
    let material = sample_material();
    material.save(&path, 5).unwrap();
    assert_eq!(Material::load(&path).unwrap(), material);
}

fn arbitrary_content() -> impl Strategy<Value = Content> {
    (
        "[a-z ()]{1,40}",
        1u32..100_000,
        0i64..1_000_000,
        prop::collection::vec("[a-zA-Z ]{0,30}", 0..3),
        prop::collection::btree_map(1u32..1_000_000, any::<u32>(), 0..50),
    )
        .prop_map(|(sql, root_page, sequence, associated_sqls, pages)| Content {
            sql,
            root_page,
            sequence,
            associated_sqls,
            pages,
        })
}

proptest! {
    #[test]
    fn prop_material_round_trip(
        contents in prop::collection::btree_map("[a-z_]{1,12}", arbitrary_content(), 0..6),
        page_size in prop::sample::select(vec![512u32, 1024, 4096, 65536]),
        salt in (any::<u32>(), any::<u32>()),
        frames in any::<u32>(),
    ) {
        let material = Material {
            info: MaterialInfo {
                page_size,
                reserved_bytes: 0,
                wal_salt: Salt::new(salt.0, salt.1),
                wal_frame_count: frames,
            },
            contents,
        };
        let data = material.encoded_data(1).unwrap();
        prop_assert_eq!(Material::init_with_data(&data).unwrap(), material);
    }
}
