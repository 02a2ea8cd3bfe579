use bytes::Bytes;
use tambal::types::{
    HEADER_SIZE,
    page::{Page, PageType, header_offset, max_local, min_local},
};

const PAGE_SIZE: usize = 1024;

fn leaf_page(pointers: &[u16]) -> Vec<u8> {
    let mut data = vec![0u8; PAGE_SIZE];
    data[0] = PageType::LeafTable.as_u8();
    data[3..5].copy_from_slice(&(pointers.len() as u16).to_be_bytes());
    for (index, pointer) in pointers.iter().enumerate() {
        data[8 + index * 2..10 + index * 2].copy_from_slice(&pointer.to_be_bytes());
    }
    data
}

fn interior_page(children: &[u32], right_most: u32) -> Vec<u8> {
    let mut data = vec![0u8; PAGE_SIZE];
    data[0] = PageType::InteriorTable.as_u8();
    data[3..5].copy_from_slice(&(children.len() as u16).to_be_bytes());
    data[8..12].copy_from_slice(&right_most.to_be_bytes());
    let mut content = PAGE_SIZE;
    for (index, child) in children.iter().enumerate() {
        content -= 5;
        data[content..content + 4].copy_from_slice(&child.to_be_bytes());
        data[content + 4] = index as u8 + 1;
        data[12 + index * 2..14 + index * 2].copy_from_slice(&(content as u16).to_be_bytes());
    }
    data
}

#[test]
fn test_page_type_bytes() {
    assert_eq!(PageType::from_u8(2), PageType::InteriorIndex);
    assert_eq!(PageType::from_u8(5), PageType::InteriorTable);
    assert_eq!(PageType::from_u8(10), PageType::LeafIndex);
    assert_eq!(PageType::from_u8(13), PageType::LeafTable);
    assert_eq!(PageType::from_u8(0), PageType::Unknown);
    assert_eq!(PageType::from_u8(7), PageType::Unknown);
    assert_eq!(PageType::LeafTable.header_size(), 8);
    assert_eq!(PageType::InteriorTable.header_size(), 12);
    assert!(PageType::LeafTable.is_leaf() && PageType::LeafTable.is_table());
    assert!(PageType::InteriorIndex.is_interior() && !PageType::InteriorIndex.is_table());
}

#[test]
fn test_header_offset_of_first_page() {
    assert_eq!(header_offset(1), HEADER_SIZE);
    assert_eq!(header_offset(2), 0);

    let mut data = vec![0u8; PAGE_SIZE];
    data[HEADER_SIZE] = PageType::LeafTable.as_u8();
    assert_eq!(Page::acquire_type(1, &data), PageType::LeafTable);
    assert_eq!(Page::acquire_type(2, &data), PageType::Unknown);
}

#[test]
fn test_parse_leaf_pointers() {
    let page = Page::parse(3, Bytes::from(leaf_page(&[1000, 900])), PAGE_SIZE, 10).unwrap();
    assert_eq!(page.page_type, PageType::LeafTable);
    assert_eq!(page.cell_count(), 2);
    assert_eq!(page.cell_pointer(0), Some(1000));
    assert_eq!(page.cell_pointer(2), None);
    assert!(page.sub_page_numbers().is_empty());
}

#[test]
fn test_pointer_inside_the_header_is_corrupt() {
    let error = Page::parse(3, Bytes::from(leaf_page(&[4])), PAGE_SIZE, 10).unwrap_err();
    assert!(error.is_corruption());
    assert_eq!(error.page(), Some(3));
}

#[test]
fn test_pointer_in_reserved_area_is_corrupt() {
    let data = Bytes::from(leaf_page(&[1010]));
    assert!(Page::parse(3, data.clone(), PAGE_SIZE, 10).is_ok());
    assert!(Page::parse(3, data, PAGE_SIZE - 20, 10).is_err());
}

#[test]
fn test_cell_count_past_the_page_is_corrupt() {
    let mut data = leaf_page(&[]);
    data[3..5].copy_from_slice(&0xffffu16.to_be_bytes());
    assert!(Page::parse(3, Bytes::from(data), PAGE_SIZE, 10).is_err());
}

#[test]
fn test_unknown_type_is_corrupt() {
    let data = vec![0u8; PAGE_SIZE];
    assert!(Page::parse(3, Bytes::from(data), PAGE_SIZE, 10).unwrap_err().is_corruption());
}

#[test]
fn test_interior_children_in_order() {
    let page = Page::parse(2, Bytes::from(interior_page(&[4, 5, 6], 7)), PAGE_SIZE, 10).unwrap();
    assert_eq!(page.page_type, PageType::InteriorTable);
    assert_eq!(page.sub_page_numbers(), &[4, 5, 6, 7]);
}

#[test]
fn test_child_beyond_page_count_is_corrupt() {
    assert!(Page::parse(2, Bytes::from(interior_page(&[4, 50], 7)), PAGE_SIZE, 10).is_err());
    assert!(Page::parse(2, Bytes::from(interior_page(&[4], 0)), PAGE_SIZE, 10).is_err());
}

#[test]
fn test_hash_follows_content() {
    let first = Page::parse(3, Bytes::from(leaf_page(&[1000])), PAGE_SIZE, 10).unwrap();
    let same = Page::parse(3, Bytes::from(leaf_page(&[1000])), PAGE_SIZE, 10).unwrap();
    let mut changed = leaf_page(&[1000]);
    changed[1001] = 1;
    let changed = Page::parse(3, Bytes::from(changed), PAGE_SIZE, 10).unwrap();
    assert_eq!(first.hash(), same.hash());
    assert_ne!(first.hash(), changed.hash());
}

#[test]
fn test_local_payload_bounds() {
    assert_eq!(max_local(PageType::LeafTable, 1024), 989);
    assert_eq!(max_local(PageType::LeafIndex, 1024), 230);
    assert_eq!(min_local(1024), 103);
}

#[test]
fn test_truncated_buffers_never_panic() {
    let leaf = leaf_page(&[1000, 900, 800]);
    let interior = interior_page(&[4, 5, 6], 7);
    for length in 0..=PAGE_SIZE {
        for source in [&leaf, &interior] {
            let data = Bytes::copy_from_slice(&source[..length]);
            if let Ok(page) = Page::parse(3, data, PAGE_SIZE, 10) {
                // whatever parsed must point inside the bytes actually present
                assert!(page.cell_pointers().iter().all(|pointer| (*pointer as usize) < length));
            }
        }
    }
}
