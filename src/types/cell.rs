use std::collections::HashSet;

use bytes::Bytes;

use crate::{
    storage::{header::TextEncoding, pager::Pager, serialization::Deserialization},
    types::{
        OVERFLOW_POINTER_SIZE, PageNo, RowId,
        error::{DatabaseError, Result},
        page::{Page, PageType},
        row::Row,
        value::{ColumnType, Value},
    },
};

/// Number of payload bytes a record value of `serial_type` occupies.
/// Returns `None` for the reserved types 10 and 11.
pub fn serial_type_length(serial_type: u64) -> Option<usize> {
    match serial_type {
        0 | 8 | 9 => Some(0),
        1 => Some(1),
        2 => Some(2),
        3 => Some(3),
        4 => Some(4),
        5 => Some(6),
        6 | 7 => Some(8),
        10 | 11 => None,
        n => usize::try_from((n - 12) / 2).ok(),
    }
}

pub fn serial_type_column_type(serial_type: u64) -> ColumnType {
    match serial_type {
        0 => ColumnType::Null,
        7 => ColumnType::Real,
        1..=9 => ColumnType::Integer,
        n if n % 2 == 1 => ColumnType::Text,
        _ => ColumnType::Blob,
    }
}

#[derive(Debug, Clone, Copy)]
struct Column {
    serial_type: u64,
    offset: usize,
}

/// One leaf-table cell: a rowid and its decoded record.
#[derive(Debug, Clone)]
pub struct Cell {
    page_number: PageNo,
    pointer: u16,
    rowid: RowId,
    payload: Bytes,
    columns: Vec<Column>,
    text_encoding: TextEncoding,
    overflow_page_count: usize,
}

impl Cell {
    /// Parses cell `index` of a leaf-table `page`, following its overflow
    /// chain through `pager` when the payload spills off the page.
    pub fn parse(page: &Page, index: usize, pager: &mut Pager) -> Result<Self> {
        let number = page.number;
        if page.page_type != PageType::LeafTable {
            return Err(DatabaseError::corrupted_page(
                number,
                format!("Cells of {:?} pages carry no rows", page.page_type),
            ));
        }
        let pointer = page
            .cell_pointer(index)
            .ok_or_else(|| DatabaseError::corrupted_page(number, format!("No cell {}", index)))?;

        let usable_size = page.usable_size();
        let mut deserialization = Deserialization::new(page.usable_data());
        deserialization.seek(pointer as usize);

        let (length, payload_size) = deserialization.advance_varint();
        if length == 0 {
            return Err(DatabaseError::corrupted_page(number, "Unable to deserialize payload size"));
        }
        let (length, rowid) = deserialization.advance_varint();
        if length == 0 {
            return Err(DatabaseError::corrupted_page(number, "Unable to deserialize rowid"));
        }
        let payload_size = usize::try_from(payload_size)
            .map_err(|_| DatabaseError::corrupted_page(number, "Payload size overflows"))?;

        let local_size = local_payload_size(payload_size, page.max_local(), page.min_local(), usable_size);
        let overflow_capacity = usable_size.saturating_sub(OVERFLOW_POINTER_SIZE).max(1);
        let reachable = local_size.saturating_add((pager.number_of_pages() as usize).saturating_mul(overflow_capacity));
        if payload_size > reachable {
            return Err(DatabaseError::corrupted_page(
                number,
                format!("Payload size {} exceeds what the file can hold", payload_size),
            ));
        }
        let local_start = deserialization.cursor();
        let local = deserialization
            .get_bytes(local_start, local_size)
            .ok_or_else(|| DatabaseError::corrupted_page(number, "Unable to deserialize local payload"))?;

        let mut overflow_page_count = 0;
        let payload = if local_size == payload_size {
            page.data.slice(local_start..local_start + local_size)
        } else {
            let first_overflow = deserialization
                .get_4bytes_uint(local_start + local_size)
                .ok_or_else(|| DatabaseError::corrupted_page(number, "Unable to deserialize overflow page number"))?;
            let mut payload = Vec::new();
            payload
                .try_reserve_exact(payload_size)
                .map_err(|e| DatabaseError::NoMemory {
                    details: format!("Payload of {} bytes on page {}: {}", payload_size, number, e),
                })?;
            payload.extend_from_slice(local);
            overflow_page_count =
                read_overflow_chain(number, first_overflow, payload_size, &mut payload, pager)?;
            Bytes::from(payload)
        };

        let columns = parse_record(number, &payload)?;

        Ok(Self {
            page_number: number,
            pointer,
            rowid: rowid as i64,
            payload,
            columns,
            text_encoding: pager.text_encoding(),
            overflow_page_count,
        })
    }

    pub fn page_number(&self) -> PageNo {
        self.page_number
    }

    pub fn pointer(&self) -> u16 {
        self.pointer
    }

    pub fn rowid(&self) -> RowId {
        self.rowid
    }

    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }

    pub fn overflow_page_count(&self) -> usize {
        self.overflow_page_count
    }

    /// Number of columns in the record.
    pub fn count(&self) -> usize {
        self.columns.len()
    }

    pub fn serial_type(&self, index: usize) -> Option<u64> {
        self.columns.get(index).map(|column| column.serial_type)
    }

    pub fn column_type(&self, index: usize) -> ColumnType {
        self.columns
            .get(index)
            .map(|column| serial_type_column_type(column.serial_type))
            .unwrap_or(ColumnType::Null)
    }

    fn column_bytes(&self, index: usize) -> &[u8] {
        let Some(column) = self.columns.get(index) else {
            return &[];
        };
        let length = serial_type_length(column.serial_type).unwrap_or(0);
        // offsets were validated against the payload during parsing
        &self.payload[column.offset..column.offset + length]
    }

    pub fn integer_value(&self, index: usize) -> i64 {
        let Some(column) = self.columns.get(index) else {
            return 0;
        };
        match column.serial_type {
            8 => 0,
            9 => 1,
            1..=6 => {
                let length = serial_type_length(column.serial_type).unwrap_or(0);
                Deserialization::new(&self.payload)
                    .get_int(column.offset, length)
                    .unwrap_or(0)
            }
            _ => 0,
        }
    }

    pub fn double_value(&self, index: usize) -> f64 {
        match self.columns.get(index) {
            Some(column) if column.serial_type == 7 => Deserialization::new(&self.payload)
                .get_8bytes_double(column.offset)
                .unwrap_or(0.0),
            _ => 0.0,
        }
    }

    /// Text decoded with the database's declared encoding.
    pub fn text_value(&self, index: usize) -> String {
        self.text_encoding.decode(self.column_bytes(index))
    }

    pub fn blob_value(&self, index: usize) -> &[u8] {
        self.column_bytes(index)
    }

    pub fn value(&self, index: usize) -> Value {
        match self.column_type(index) {
            ColumnType::Null => Value::Null,
            ColumnType::Integer => Value::Integer(self.integer_value(index)),
            ColumnType::Real => Value::Real(self.double_value(index)),
            ColumnType::Text => Value::Text(self.text_value(index)),
            ColumnType::Blob => Value::Blob(self.blob_value(index).to_vec()),
        }
    }

    pub fn values(&self) -> Vec<Value> {
        (0..self.count()).map(|index| self.value(index)).collect()
    }

    pub fn to_row(&self) -> Row {
        Row::new(self.rowid, self.values())
    }
}

/// Bytes of a table-leaf payload stored on the page itself.
pub fn local_payload_size(payload_size: usize, max_local: usize, min_local: usize, usable_size: usize) -> usize {
    if payload_size <= max_local {
        return payload_size;
    }
    let overflow_capacity = usable_size.saturating_sub(OVERFLOW_POINTER_SIZE).max(1);
    let surplus = min_local + (payload_size - min_local) % overflow_capacity;
    if surplus <= max_local { surplus } else { min_local }
}

/// Appends the overflow chain starting at `first` to `payload` until it holds
/// `payload_size` bytes. Each overflow page starts with the next page number.
fn read_overflow_chain(
    number: PageNo,
    first: PageNo,
    payload_size: usize,
    payload: &mut Vec<u8>,
    pager: &mut Pager,
) -> Result<usize> {
    let usable_size = pager.usable_size();
    let capacity = usable_size.saturating_sub(OVERFLOW_POINTER_SIZE).max(1);
    let max_hops = payload_size / capacity + 1;
    let page_count = pager.number_of_pages();

    let mut visited = HashSet::new();
    let mut next = first;
    while next != 0 && payload.len() < payload_size {
        if visited.len() >= max_hops {
            return Err(DatabaseError::corrupted_page(number, "Overflow chain is too long"));
        }
        if next > page_count {
            return Err(DatabaseError::corrupted_page(
                number,
                format!("Overflow page {} exceeds the page count {}", next, page_count),
            ));
        }
        if !visited.insert(next) {
            return Err(DatabaseError::corrupted_page(
                number,
                format!("Overflow page {} is redundant", next),
            ));
        }

        let data = pager.acquire_page_data(next)?;
        let overflow = Deserialization::new(&data[..usable_size.min(data.len())]);
        let following = overflow
            .get_4bytes_uint(0)
            .ok_or_else(|| DatabaseError::corrupted_page(next, "Unable to read next overflow page"))?;
        let size = (payload_size - payload.len()).min(capacity);
        let chunk = overflow
            .get_bytes(OVERFLOW_POINTER_SIZE, size)
            .ok_or_else(|| DatabaseError::corrupted_page(next, "Overflow page too short"))?;
        payload.extend_from_slice(chunk);
        next = following;
    }

    if next != 0 || payload.len() != payload_size {
        return Err(DatabaseError::corrupted_page(number, "Unexpected termination of overflow pages"));
    }
    Ok(visited.len())
}

/// Reads the record header and checks every value lies inside the payload.
fn parse_record(number: PageNo, payload: &[u8]) -> Result<Vec<Column>> {
    let deserialization = Deserialization::new(payload);
    let (length, header_size) = deserialization.get_varint(0);
    if length == 0 {
        return Err(DatabaseError::corrupted_page(number, "Unable to deserialize record header size"));
    }
    let header_size = header_size as usize;
    if header_size < length || header_size > payload.len() {
        return Err(DatabaseError::corrupted_page(
            number,
            format!("Record header size {} out of range", header_size),
        ));
    }

    let mut columns = Vec::new();
    let mut cursor = length;
    let mut offset = header_size;
    while cursor < header_size {
        let (length, serial_type) = deserialization.get_varint(cursor);
        if length == 0 || cursor + length > header_size {
            return Err(DatabaseError::corrupted_page(number, "Unable to deserialize serial type"));
        }
        cursor += length;
        let size = serial_type_length(serial_type).ok_or_else(|| {
            DatabaseError::corrupted_page(number, format!("Illegal serial type {}", serial_type))
        })?;
        columns.push(Column { serial_type, offset });
        offset = offset
            .checked_add(size)
            .filter(|end| *end <= payload.len())
            .ok_or_else(|| DatabaseError::corrupted_page(number, "Record values exceed the payload"))?;
    }

    Ok(columns)
}
