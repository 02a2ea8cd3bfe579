//! Builders for hand-made database and WAL files, used by the tests and
//! benchmarks to lay out exactly the bytes a scenario needs.

use std::{
    collections::BTreeMap,
    fs,
    io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;

use crate::{
    repair::assembler::Assembler,
    storage::{
        header::{DatabaseHeader, TextEncoding},
        serialization::{Serialization, encode_varint},
        wal::{Salt, WalChecksum, calculate_checksum},
    },
    types::{
        HEADER_SIZE, INTERIOR_PAGE_HEADER_SIZE, LEAF_PAGE_HEADER_SIZE, PageNo, RowId, WAL_FORMAT_VERSION,
        WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE, WAL_MAGIC_BE, WAL_MAGIC_LE,
        cell::{Cell, local_payload_size},
        error::{DatabaseError, Result},
        page::{PageType, max_local, min_local},
        value::Value,
    },
};

/// A database path inside a temporary directory removed on drop, together
/// with its `-wal` and `.factory` siblings.
pub struct TempDatabase {
    pub path: PathBuf,
    directory: TempDir,
}

impl TempDatabase {
    pub fn new() -> Self {
        Self::with_name("test.db")
    }

    pub fn with_name(name: &str) -> Self {
        let directory = tempfile::Builder::new()
            .prefix("tambal_test_")
            .tempdir()
            .unwrap_or_else(|e| panic!("Failed to create temp dir: {}", e));
        Self {
            path: directory.path().join(name),
            directory,
        }
    }

    pub fn directory(&self) -> &Path {
        self.directory.path()
    }

    pub fn wal_path(&self) -> PathBuf {
        let mut path = self.path.as_os_str().to_owned();
        path.push("-wal");
        PathBuf::from(path)
    }

    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        fs::write(&self.path, data)
    }

    pub fn read(&self) -> io::Result<Vec<u8>> {
        fs::read(&self.path)
    }

    /// Overwrites `bytes` at `offset` of page `number`.
    pub fn patch_page(&self, number: PageNo, page_size: usize, offset: usize, bytes: &[u8]) -> io::Result<()> {
        let mut data = self.read()?;
        let start = (number as usize - 1) * page_size + offset;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        self.write(&data)
    }

    /// Fills page `number` with garbage.
    pub fn scramble_page(&self, number: PageNo, page_size: usize) -> io::Result<()> {
        let garbage: Vec<u8> = (0..page_size).map(|i| (i * 31 + 7) as u8 | 0x80).collect();
        self.patch_page(number, page_size, 0, &garbage)
    }
}

impl Default for TempDatabase {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes `values` as a record: header size, serial types, then bodies.
pub fn encode_record(values: &[Value], encoding: TextEncoding) -> Vec<u8> {
    let mut types = Vec::new();
    let mut body = Serialization::new();
    for value in values {
        match value {
            Value::Null => types.push(0),
            Value::Integer(0) => types.push(8),
            Value::Integer(1) => types.push(9),
            Value::Integer(v) => {
                let (serial_type, width) = integer_serial_type(*v);
                types.push(serial_type);
                body.put_int(*v, width);
            }
            Value::Real(v) => {
                types.push(7);
                body.put_8bytes_double(*v);
            }
            Value::Text(text) => {
                let bytes = encode_text(text, encoding);
                types.push(bytes.len() as u64 * 2 + 13);
                body.put_bytes(&bytes);
            }
            Value::Blob(blob) => {
                types.push(blob.len() as u64 * 2 + 12);
                body.put_bytes(blob);
            }
        }
    }

    let type_bytes: Vec<u8> = types.iter().flat_map(|serial_type| encode_varint(*serial_type)).collect();
    // the header size counts its own varint
    let mut header_size = type_bytes.len() + 1;
    if encode_varint(header_size as u64).len() > 1 {
        header_size += 1;
    }
    let mut record = encode_varint(header_size as u64);
    record.extend_from_slice(&type_bytes);
    record.extend_from_slice(&body.finalize());
    record
}

fn integer_serial_type(value: i64) -> (u64, usize) {
    match value {
        -0x80..=0x7f => (1, 1),
        -0x8000..=0x7fff => (2, 2),
        -0x80_0000..=0x7f_ffff => (3, 3),
        -0x8000_0000..=0x7fff_ffff => (4, 4),
        -0x8000_0000_0000..=0x7fff_ffff_ffff => (5, 6),
        _ => (6, 8),
    }
}

fn encode_text(text: &str, encoding: TextEncoding) -> Vec<u8> {
    match encoding {
        TextEncoding::Utf8 => text.as_bytes().to_vec(),
        TextEncoding::Utf16Le => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        TextEncoding::Utf16Be => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
    }
}

/// Lays out a SQLite database page by page: a single-page `sqlite_master`
/// on page 1 and one table b-tree per [`DatabaseBuilder::add_table`].
pub struct DatabaseBuilder {
    page_size: usize,
    reserved_bytes: usize,
    text_encoding: TextEncoding,
    pages: Vec<Vec<u8>>,
    master: Vec<Vec<Value>>,
}

impl DatabaseBuilder {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            reserved_bytes: 0,
            text_encoding: TextEncoding::Utf8,
            pages: vec![vec![0; page_size]],
            master: Vec::new(),
        }
    }

    pub fn reserved_bytes(mut self, reserved_bytes: usize) -> Self {
        self.reserved_bytes = reserved_bytes;
        self
    }

    pub fn text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.text_encoding = encoding;
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn number_of_pages(&self) -> PageNo {
        self.pages.len() as PageNo
    }

    fn usable_size(&self) -> usize {
        self.page_size - self.reserved_bytes
    }

    fn allocate_page(&mut self) -> PageNo {
        self.pages.push(vec![0; self.page_size]);
        self.pages.len() as PageNo
    }

    /// Mutable bytes of an already allocated page.
    pub fn page_mut(&mut self, number: PageNo) -> &mut [u8] {
        &mut self.pages[number as usize - 1]
    }

    pub fn add_master_item(&mut self, item_type: &str, name: &str, tbl_name: &str, root_page: PageNo, sql: Option<&str>) {
        self.master.push(vec![
            Value::Text(item_type.to_string()),
            Value::Text(name.to_string()),
            Value::Text(tbl_name.to_string()),
            Value::Integer(root_page as i64),
            sql.map_or(Value::Null, |sql| Value::Text(sql.to_string())),
        ]);
    }

    /// Adds a table holding `rows`, ordered by rowid, and returns its root page.
    pub fn add_table(&mut self, name: &str, sql: &str, rows: &[(RowId, Vec<Value>)]) -> PageNo {
        let root = self.build_table_tree(rows);
        self.add_master_item("table", name, name, root, Some(sql));
        root
    }

    /// Writes a table b-tree without registering it in `sqlite_master`.
    pub fn build_table_tree(&mut self, rows: &[(RowId, Vec<Value>)]) -> PageNo {
        let mut rows: Vec<&(RowId, Vec<Value>)> = rows.iter().collect();
        rows.sort_by_key(|(rowid, _)| *rowid);

        let mut leaves: Vec<(PageNo, RowId)> = Vec::new();
        let mut pending: Vec<Vec<u8>> = Vec::new();
        let mut pending_size = 0;
        let mut last_rowid = 0;
        let capacity = self.usable_size() - LEAF_PAGE_HEADER_SIZE;
        for (rowid, values) in rows {
            let cell = self.leaf_cell(*rowid, values);
            if !pending.is_empty() && pending_size + cell.len() + 2 > capacity {
                let page = self.allocate_page();
                self.write_leaf(page, &pending);
                leaves.push((page, last_rowid));
                pending.clear();
                pending_size = 0;
            }
            pending_size += cell.len() + 2;
            pending.push(cell);
            last_rowid = *rowid;
        }
        if !pending.is_empty() || leaves.is_empty() {
            let page = self.allocate_page();
            self.write_leaf(page, &pending);
            leaves.push((page, last_rowid));
        }
        self.build_interior_levels(leaves)
    }

    fn build_interior_levels(&mut self, mut children: Vec<(PageNo, RowId)>) -> PageNo {
        let capacity = self.usable_size() - INTERIOR_PAGE_HEADER_SIZE;
        while children.len() > 1 {
            let mut parents = Vec::new();
            let mut group: Vec<(PageNo, RowId)> = Vec::new();
            let mut group_size = 0;
            for child in children {
                let cell_size = 4 + encode_varint(child.1 as u64).len() + 2;
                if group.len() > 1 && group_size + cell_size > capacity {
                    parents.push(self.write_interior_group(&group));
                    group.clear();
                    group_size = 0;
                }
                group_size += cell_size;
                group.push(child);
            }
            parents.push(self.write_interior_group(&group));
            children = parents;
        }
        children[0].0
    }

    fn write_interior_group(&mut self, group: &[(PageNo, RowId)]) -> (PageNo, RowId) {
        let page = self.allocate_page();
        let Some(((right_most, max_rowid), cells)) = group.split_last() else {
            return (page, 0);
        };
        let cells: Vec<Vec<u8>> = cells
            .iter()
            .map(|(child, key)| {
                let mut cell = child.to_be_bytes().to_vec();
                cell.extend(encode_varint(*key as u64));
                cell
            })
            .collect();
        let usable = self.usable_size();
        let data = &mut self.pages[page as usize - 1];
        write_page_cells(data, 0, usable, PageType::InteriorTable, &cells);
        data[8..12].copy_from_slice(&right_most.to_be_bytes());
        (page, *max_rowid)
    }

    fn write_leaf(&mut self, page: PageNo, cells: &[Vec<u8>]) {
        let usable = self.usable_size();
        write_page_cells(&mut self.pages[page as usize - 1], 0, usable, PageType::LeafTable, cells);
    }

    /// A table leaf cell, spilling the payload tail into freshly allocated
    /// overflow pages when it does not fit locally.
    fn leaf_cell(&mut self, rowid: RowId, values: &[Value]) -> Vec<u8> {
        let payload = encode_record(values, self.text_encoding);
        let usable = self.usable_size();
        let local = local_payload_size(
            payload.len(),
            max_local(PageType::LeafTable, usable),
            min_local(usable),
            usable,
        );

        let mut cell = encode_varint(payload.len() as u64);
        cell.extend(encode_varint(rowid as u64));
        cell.extend_from_slice(&payload[..local]);
        if local < payload.len() {
            let first = self.write_overflow_chain(&payload[local..]);
            cell.extend_from_slice(&first.to_be_bytes());
        }
        cell
    }

    fn write_overflow_chain(&mut self, mut remaining: &[u8]) -> PageNo {
        let chunk_size = self.usable_size() - 4;
        let first = self.allocate_page();
        let mut current = first;
        loop {
            let take = remaining.len().min(chunk_size);
            let next = if remaining.len() > take { self.allocate_page() } else { 0 };
            let data = &mut self.pages[current as usize - 1];
            data[..4].copy_from_slice(&next.to_be_bytes());
            data[4..4 + take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            if next == 0 {
                return first;
            }
            current = next;
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let mut pages = self.pages.clone();
        let master_cells: Vec<Vec<u8>> = self
            .master
            .iter()
            .enumerate()
            .map(|(index, values)| {
                let payload = encode_record(values, self.text_encoding);
                let mut cell = encode_varint(payload.len() as u64);
                cell.extend(encode_varint(index as u64 + 1));
                cell.extend_from_slice(&payload);
                cell
            })
            .collect();
        write_page_cells(
            &mut pages[0],
            HEADER_SIZE,
            self.usable_size(),
            PageType::LeafTable,
            &master_cells,
        );

        let header = DatabaseHeader {
            page_size: self.page_size as u32,
            reserved_space: self.reserved_bytes as u8,
            database_size_pages: pages.len() as u32,
            text_encoding: self.text_encoding,
            ..DatabaseHeader::default()
        };
        pages[0][..HEADER_SIZE].copy_from_slice(&header.to_bytes());
        pages.concat()
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.build())
    }
}

/// Writes a b-tree page header at `offset` and packs `cells` downwards from
/// the end of the usable area.
fn write_page_cells(data: &mut [u8], offset: usize, usable: usize, page_type: PageType, cells: &[Vec<u8>]) {
    let mut content = usable;
    let mut pointers = Vec::with_capacity(cells.len());
    for cell in cells {
        content -= cell.len();
        data[content..content + cell.len()].copy_from_slice(cell);
        pointers.push(content as u16);
    }

    data[offset] = page_type.as_u8();
    data[offset + 1..offset + 3].copy_from_slice(&0u16.to_be_bytes());
    data[offset + 3..offset + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
    data[offset + 5..offset + 7].copy_from_slice(&(content as u16).to_be_bytes());
    data[offset + 7] = 0;
    let array = offset + page_type.header_size();
    for (index, pointer) in pointers.iter().enumerate() {
        data[array + index * 2..array + index * 2 + 2].copy_from_slice(&pointer.to_be_bytes());
    }
}

/// Lays out a WAL file frame by frame, with valid checksums.
pub struct WalBuilder {
    page_size: usize,
    salt: Salt,
    big_endian: bool,
    frames: Vec<(PageNo, Vec<u8>, u32)>,
}

impl WalBuilder {
    pub fn new(page_size: usize, salt: Salt) -> Self {
        Self {
            page_size,
            salt,
            big_endian: false,
            frames: Vec::new(),
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big_endian = true;
        self
    }

    /// Appends a frame; a non-zero `commit` marks it as a commit frame
    /// recording that many database pages.
    pub fn frame(mut self, page: PageNo, data: &[u8], commit: u32) -> Self {
        let mut page_data = data.to_vec();
        page_data.resize(self.page_size, 0);
        self.frames.push((page, page_data, commit));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut header = Serialization::with_capacity(WAL_HEADER_SIZE);
        header.put_4bytes_uint(if self.big_endian { WAL_MAGIC_BE } else { WAL_MAGIC_LE });
        header.put_4bytes_uint(WAL_FORMAT_VERSION);
        header.put_4bytes_uint(self.page_size as u32);
        header.put_4bytes_uint(0);
        header.put_4bytes_uint(self.salt.first);
        header.put_4bytes_uint(self.salt.second);
        let mut data = header.finalize();
        let mut checksum = calculate_checksum(&data, WalChecksum::default(), self.big_endian);
        data.extend_from_slice(&checksum.s1.to_be_bytes());
        data.extend_from_slice(&checksum.s2.to_be_bytes());

        for (page, page_data, commit) in &self.frames {
            let mut frame = Serialization::with_capacity(WAL_FRAME_HEADER_SIZE);
            frame.put_4bytes_uint(*page);
            frame.put_4bytes_uint(*commit);
            frame.put_4bytes_uint(self.salt.first);
            frame.put_4bytes_uint(self.salt.second);
            let frame_header = frame.finalize();
            checksum = calculate_checksum(&frame_header[..8], checksum, self.big_endian);
            checksum = calculate_checksum(page_data, checksum, self.big_endian);
            data.extend_from_slice(&frame_header);
            data.extend_from_slice(&checksum.s1.to_be_bytes());
            data.extend_from_slice(&checksum.s2.to_be_bytes());
            data.extend_from_slice(page_data);
        }
        data
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        fs::write(path, self.build())
    }
}

/// Keeps every assembled row in memory, keyed by table then rowid.
#[derive(Debug, Default)]
pub struct MemoryAssembler {
    pub tables: BTreeMap<String, String>,
    pub rows: BTreeMap<String, BTreeMap<RowId, Vec<Value>>>,
    pub sequences: BTreeMap<String, i64>,
    pub milestones: usize,
    pub assembling: bool,
    pub assembled: bool,
    current: Option<String>,
}

impl MemoryAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.values().map(BTreeMap::len).sum()
    }

    pub fn table_rows(&self, table: &str) -> Vec<(RowId, Vec<Value>)> {
        self.rows
            .get(table)
            .map(|rows| rows.iter().map(|(rowid, values)| (*rowid, values.clone())).collect())
            .unwrap_or_default()
    }
}

impl Assembler for MemoryAssembler {
    fn mark_as_assembling(&mut self) -> Result<()> {
        self.assembling = true;
        Ok(())
    }

    fn assemble_table(&mut self, table_name: &str, sql: &str) -> Result<()> {
        self.tables.insert(table_name.to_string(), sql.to_string());
        self.rows.entry(table_name.to_string()).or_default();
        self.current = Some(table_name.to_string());
        Ok(())
    }

    fn assemble_cell(&mut self, cell: &Cell) -> Result<()> {
        let Some(table) = self.current.as_ref() else {
            return Err(DatabaseError::Misuse {
                details: "Cell assembled before its table".to_string(),
            });
        };
        let rows = self.rows.entry(table.clone()).or_default();
        if rows.contains_key(&cell.rowid()) {
            return Err(DatabaseError::Conflict {
                table: table.clone(),
                details: format!("Duplicate rowid {}", cell.rowid()),
            });
        }
        rows.insert(cell.rowid(), cell.values());
        Ok(())
    }

    fn assemble_sequence(&mut self, table_name: &str, sequence: i64) -> Result<()> {
        self.sequences.insert(table_name.to_string(), sequence);
        Ok(())
    }

    fn mark_as_milestone(&mut self) -> Result<()> {
        self.milestones += 1;
        Ok(())
    }

    fn mark_as_assembled(&mut self) -> Result<()> {
        self.assembled = true;
        self.current = None;
        Ok(())
    }
}
