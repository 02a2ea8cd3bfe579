use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{
    storage::serialization::Deserialization,
    types::{
        CELL_POINTER_SIZE, HEADER_SIZE, INTERIOR_PAGE_HEADER_SIZE, LEAF_PAGE_HEADER_SIZE, PageNo,
        error::{DatabaseError, Result},
    },
    utils::hash::calculate_page_checksum,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PageType {
    InteriorIndex = 2,
    InteriorTable = 5,
    LeafIndex = 10,
    LeafTable = 13,
    Unknown = 0,
}

impl PageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => PageType::InteriorIndex,
            5 => PageType::InteriorTable,
            10 => PageType::LeafIndex,
            13 => PageType::LeafTable,
            _ => PageType::Unknown,
        }
    }

    pub fn as_u8(&self) -> u8 {
        match self {
            PageType::InteriorIndex => 2,
            PageType::InteriorTable => 5,
            PageType::LeafIndex => 10,
            PageType::LeafTable => 13,
            PageType::Unknown => 0,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, PageType::LeafIndex | PageType::LeafTable)
    }

    pub fn is_interior(&self) -> bool {
        matches!(self, PageType::InteriorIndex | PageType::InteriorTable)
    }

    pub fn is_table(&self) -> bool {
        matches!(self, PageType::InteriorTable | PageType::LeafTable)
    }

    pub fn header_size(&self) -> usize {
        if self.is_interior() {
            INTERIOR_PAGE_HEADER_SIZE
        } else {
            LEAF_PAGE_HEADER_SIZE
        }
    }
}

/*
 * B-tree page layout
 * ┌────────────────────────────────────────────────────────────────┐
 * │ [page 1 only] database header (100 bytes)                      │
 * ├────────────────────────────────────────────────────────────────┤
 * │ PAGE HEADER (8 bytes leaf / 12 bytes interior)                 │
 * │  type(1) | first_freeblock(2) | cell_count(2) |                │
 * │  content_start(2) | fragmented(1) | [right_most_pointer(4)]    │
 * ├────────────────────────────────────────────────────────────────┤
 * │ CELL POINTER ARRAY [ptr0(2)] [ptr1(2)] ...                     │
 * ├────────────────────────────────────────────────────────────────┤
 * │ UNALLOCATED SPACE                                              │
 * ├────────────────────────────────────────────────────────────────┤
 * │ CELL CONTENT AREA                                              │
 * ├────────────────────────────────────────────────────────────────┤
 * │ RESERVED BYTES                                                 │
 * └────────────────────────────────────────────────────────────────┘
 */

/// One parsed B-tree node. Holds a shared view of the page bytes.
#[derive(Debug, Clone)]
pub struct Page {
    pub number: PageNo,
    pub page_type: PageType,
    pub data: Bytes,
    usable_size: usize,
    cell_pointers: Vec<u16>,
    sub_page_numbers: Vec<PageNo>,
}

/// Offset of the B-tree header within the page.
pub fn header_offset(number: PageNo) -> usize {
    if number == 1 { HEADER_SIZE } else { 0 }
}

impl Page {
    /// Classifies a page from its type byte without parsing anything else.
    pub fn acquire_type(number: PageNo, data: &[u8]) -> PageType {
        data.get(header_offset(number))
            .map(|byte| PageType::from_u8(*byte))
            .unwrap_or(PageType::Unknown)
    }

    /// Parses the page header, cell pointer array and, for interior pages,
    /// the child page numbers. Every pointer must land inside the usable area
    /// and every child must be in `1..=page_count`.
    pub fn parse(number: PageNo, data: Bytes, usable_size: usize, page_count: PageNo) -> Result<Self> {
        let usable_size = usable_size.min(data.len());
        let offset = header_offset(number);
        let deserialization = Deserialization::new(&data[..usable_size]);

        let page_type = Self::acquire_type(number, &data[..usable_size]);
        if page_type == PageType::Unknown {
            return Err(DatabaseError::corrupted_page(
                number,
                format!("Unknown page type: {:?}", data.get(offset)),
            ));
        }

        let header_size = page_type.header_size();
        let cell_count = deserialization
            .get_2bytes_uint(offset + 3)
            .ok_or_else(|| DatabaseError::corrupted_page(number, "Unable to read cell count"))?
            as usize;

        let array_start = offset + header_size;
        let array_end = array_start + cell_count * CELL_POINTER_SIZE;
        if !deserialization.is_enough(array_end) {
            return Err(DatabaseError::corrupted_page(
                number,
                format!("Cell pointer array of {} cells exceeds the page", cell_count),
            ));
        }

        let mut cell_pointers = Vec::with_capacity(cell_count);
        for index in 0..cell_count {
            let pointer = deserialization
                .get_2bytes_uint(array_start + index * CELL_POINTER_SIZE)
                .ok_or_else(|| DatabaseError::corrupted_page(number, "Unable to read cell pointer"))?;
            if (pointer as usize) < array_end || pointer as usize >= usable_size {
                return Err(DatabaseError::corrupted_page(
                    number,
                    format!("Cell pointer {} out of range", pointer),
                ));
            }
            cell_pointers.push(pointer);
        }

        let mut sub_page_numbers = Vec::new();
        if page_type.is_interior() {
            let check = |child: u32| {
                if child == 0 || child > page_count {
                    Err(DatabaseError::corrupted_page(
                        number,
                        format!("Child page {} exceeds the page count {}", child, page_count),
                    ))
                } else {
                    Ok(child)
                }
            };
            sub_page_numbers.reserve(cell_count + 1);
            for pointer in &cell_pointers {
                let child = deserialization
                    .get_4bytes_uint(*pointer as usize)
                    .ok_or_else(|| DatabaseError::corrupted_page(number, "Unable to read left child"))?;
                sub_page_numbers.push(check(child)?);
            }
            let right_most = deserialization
                .get_4bytes_uint(offset + LEAF_PAGE_HEADER_SIZE)
                .ok_or_else(|| DatabaseError::corrupted_page(number, "Unable to read right child"))?;
            sub_page_numbers.push(check(right_most)?);
        }

        Ok(Self {
            number,
            page_type,
            data,
            usable_size,
            cell_pointers,
            sub_page_numbers,
        })
    }

    pub fn cell_count(&self) -> usize {
        self.cell_pointers.len()
    }

    pub fn cell_pointer(&self, index: usize) -> Option<u16> {
        self.cell_pointers.get(index).copied()
    }

    pub fn cell_pointers(&self) -> &[u16] {
        &self.cell_pointers
    }

    pub fn sub_page_numbers(&self) -> &[PageNo] {
        &self.sub_page_numbers
    }

    pub fn usable_size(&self) -> usize {
        self.usable_size
    }

    /// Page bytes up to the reserved area.
    pub fn usable_data(&self) -> &[u8] {
        &self.data[..self.usable_size]
    }

    /// Largest payload kept entirely on a page of this kind.
    pub fn max_local(&self) -> usize {
        max_local(self.page_type, self.usable_size)
    }

    /// Payload kept locally once a cell spills into overflow pages.
    pub fn min_local(&self) -> usize {
        min_local(self.usable_size)
    }

    /// CRC32 over the full page content, as recorded in a material.
    pub fn hash(&self) -> u32 {
        calculate_page_checksum(&self.data)
    }
}

pub fn max_local(page_type: PageType, usable_size: usize) -> usize {
    if page_type == PageType::LeafTable {
        usable_size.saturating_sub(35)
    } else {
        ((usable_size.saturating_sub(12)) * 64 / 255).saturating_sub(23)
    }
}

pub fn min_local(usable_size: usize) -> usize {
    ((usable_size.saturating_sub(12)) * 32 / 255).saturating_sub(23)
}
