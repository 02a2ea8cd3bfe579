//! Backup metadata consumed by [`Mechanic`](crate::repair::mechanic::Mechanic).
//!
//! File layout:
//! ```text
//! Offset  Size  Description
//!   0       4   Magic
//!   4       4   CRC32 of the decompressed body (0 when the body is empty)
//!   8       4   Version
//!  12       8   WAL salt pair at capture time
//!  20       4   Committed WAL frames at capture time
//!  24       4   Page size
//!  28       4   Reserved bytes
//!  32       -   zstd-compressed body
//! ```
//! The body repeats, per table:
//! `name\0 sql\0 varint(root) varint(sequence) varint(n) n*(sql\0) varint(m) m*(varint(page delta) u32(hash))`.
//! Page numbers are ascending; the first is stored as is, the rest as the
//! difference to the previous one.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::Path,
};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    storage::{
        serialization::{Deserialization, Serialization},
        wal::Salt,
    },
    types::{
        FrameNo, PageNo,
        error::{DatabaseError, Result},
    },
    utils::hash::calculate_checksum,
};

pub const MATERIAL_MAGIC: u32 = 0x544d_424c;
pub const MATERIAL_VERSION: u32 = 0x0100_0000;
pub const MATERIAL_HEADER_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MaterialInfo {
    pub page_size: u32,
    pub reserved_bytes: u32,
    pub wal_salt: Salt,
    pub wal_frame_count: FrameNo,
}

/// What a backup knows about one table.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Content {
    pub sql: String,
    pub root_page: PageNo,
    pub sequence: i64,
    /// Indexes, triggers and views built on the table.
    pub associated_sqls: Vec<String>,
    /// Leaf page number to the CRC32 of its content.
    pub pages: BTreeMap<PageNo, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Material {
    pub info: MaterialInfo,
    pub contents: BTreeMap<String, Content>,
}

impl Material {
    pub fn new(info: MaterialInfo) -> Self {
        Self {
            info,
            contents: BTreeMap::new(),
        }
    }

    pub fn number_of_pages(&self) -> usize {
        self.contents.values().map(|content| content.pages.len()).sum()
    }

    fn encode_body(&self) -> Result<Vec<u8>> {
        let mut body = Serialization::new();
        for (name, content) in &self.contents {
            if name.is_empty() {
                return Err(DatabaseError::SerializationError {
                    details: "Material table name is empty".to_string(),
                });
            }
            if content.sql.is_empty() {
                return Err(DatabaseError::SerializationError {
                    details: format!("Material sql of table {} is empty", name),
                });
            }
            body.put_zero_terminated_string(name)?;
            body.put_zero_terminated_string(&content.sql)?;
            body.put_varint(content.root_page as u64);
            body.put_varint(content.sequence as u64);
            body.put_varint(content.associated_sqls.len() as u64);
            for sql in &content.associated_sqls {
                body.put_zero_terminated_string(sql)?;
            }
            body.put_varint(content.pages.len() as u64);
            let mut previous = 0;
            for (number, hash) in &content.pages {
                body.put_varint((number - previous) as u64);
                body.put_4bytes_uint(*hash);
                previous = *number;
            }
        }
        Ok(body.finalize())
    }

    /// Serializes the material, compressing the body at `compression_level`.
    pub fn encoded_data(&self, compression_level: i32) -> Result<Vec<u8>> {
        let body = self.encode_body()?;
        let checksum = if body.is_empty() {
            0
        } else {
            calculate_checksum([body.as_slice()])
        };
        let compressed = zstd::encode_all(body.as_slice(), compression_level)?;

        let mut serialization = Serialization::with_capacity(MATERIAL_HEADER_SIZE + compressed.len());
        serialization.put_4bytes_uint(MATERIAL_MAGIC);
        serialization.put_4bytes_uint(checksum);
        serialization.put_4bytes_uint(MATERIAL_VERSION);
        serialization.put_4bytes_uint(self.info.wal_salt.first);
        serialization.put_4bytes_uint(self.info.wal_salt.second);
        serialization.put_4bytes_uint(self.info.wal_frame_count);
        serialization.put_4bytes_uint(self.info.page_size);
        serialization.put_4bytes_uint(self.info.reserved_bytes);
        serialization.put_bytes(&compressed);
        Ok(serialization.finalize())
    }

    /// Parses data produced by [`Material::encoded_data`]. Nothing is trusted
    /// until the body checksum matches.
    pub fn init_with_data(data: &[u8]) -> Result<Self> {
        let mut header = Deserialization::new(data);
        if !header.is_enough(MATERIAL_HEADER_SIZE) {
            return Err(DatabaseError::corrupted_material("Header"));
        }
        let mut next = || {
            header
                .advance_4bytes_uint()
                .ok_or_else(|| DatabaseError::corrupted_material("Header"))
        };
        if next()? != MATERIAL_MAGIC {
            return Err(DatabaseError::corrupted_material("Magic"));
        }
        let checksum = next()?;
        if next()? != MATERIAL_VERSION {
            return Err(DatabaseError::corrupted_material("Version"));
        }
        let info = MaterialInfo {
            wal_salt: Salt::new(next()?, next()?),
            wal_frame_count: next()?,
            page_size: next()?,
            reserved_bytes: next()?,
        };

        let body = zstd::decode_all(&data[MATERIAL_HEADER_SIZE..])
            .map_err(|_| DatabaseError::corrupted_material("Content"))?;
        let expected = if body.is_empty() {
            0
        } else {
            calculate_checksum([body.as_slice()])
        };
        if expected != checksum {
            return Err(DatabaseError::corrupted_material("Checksum"));
        }

        let mut material = Material::new(info);
        let mut decoder = Deserialization::new(&body);
        while !decoder.ended() {
            let name = decoder
                .advance_zero_terminated_string()
                .filter(|name| !name.is_empty())
                .ok_or_else(|| DatabaseError::corrupted_material("TableName"))?
                .to_string();
            let content = Self::decode_content(&mut decoder)?;
            if material.contents.insert(name, content).is_some() {
                return Err(DatabaseError::corrupted_material("TableName"));
            }
        }
        debug!(tables = material.contents.len(), pages = material.number_of_pages(), "Material decoded");
        Ok(material)
    }

    fn decode_content(decoder: &mut Deserialization<'_>) -> Result<Content> {
        fn varint(decoder: &mut Deserialization<'_>, element: &str) -> Result<u64> {
            match decoder.advance_varint() {
                (0, _) => Err(DatabaseError::corrupted_material(element)),
                (_, value) => Ok(value),
            }
        }

        let sql = decoder
            .advance_zero_terminated_string()
            .filter(|sql| !sql.is_empty())
            .ok_or_else(|| DatabaseError::corrupted_material("SQL"))?
            .to_string();
        let root_page = PageNo::try_from(varint(decoder, "RootPage")?)
            .map_err(|_| DatabaseError::corrupted_material("RootPage"))?;
        let sequence = varint(decoder, "Sequence")? as i64;

        let count = varint(decoder, "AssociatedSQLs")?;
        let mut associated_sqls = Vec::new();
        for _ in 0..count {
            let sql = decoder
                .advance_zero_terminated_string()
                .ok_or_else(|| DatabaseError::corrupted_material("AssociatedSQL"))?;
            associated_sqls.push(sql.to_string());
        }

        let count = varint(decoder, "Pages")?;
        let mut pages = BTreeMap::new();
        let mut previous: PageNo = 0;
        for _ in 0..count {
            let delta = PageNo::try_from(varint(decoder, "PageNumber")?)
                .map_err(|_| DatabaseError::corrupted_material("PageNumber"))?;
            let number = previous
                .checked_add(delta)
                .filter(|number| *number > previous)
                .ok_or_else(|| DatabaseError::corrupted_material("PageNumber"))?;
            let hash = decoder
                .advance_4bytes_uint()
                .ok_or_else(|| DatabaseError::corrupted_material("PageHash"))?;
            pages.insert(number, hash);
            previous = number;
        }

        Ok(Content {
            sql,
            root_page,
            sequence,
            associated_sqls,
            pages,
        })
    }

    /// Writes the material next to `path` first and renames it into place.
    pub fn save<P: AsRef<Path>>(&self, path: P, compression_level: i32) -> Result<()> {
        let path = path.as_ref();
        let data = self.encoded_data(compression_level)?;
        let directory = path.parent().filter(|parent| !parent.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let mut file = tempfile::NamedTempFile::new_in(directory)?;
        file.write_all(&data)?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| DatabaseError::Io(e.error))?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = fs::read(path)?;
        Self::init_with_data(&data)
    }
}
