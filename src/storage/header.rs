use crate::{
    storage::serialization::{Deserialization, Serialization},
    types::{HEADER_SIZE, MAX_PAGE_SIZE, SQLITE_MAGIC, error::DatabaseError},
};

/// Text encodings a database header can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    #[default]
    Utf8,
    Utf16Le,
    Utf16Be,
}

impl TextEncoding {
    pub fn from_u32(value: u32) -> Self {
        match value {
            2 => TextEncoding::Utf16Le,
            3 => TextEncoding::Utf16Be,
            _ => TextEncoding::Utf8,
        }
    }

    pub fn as_u32(&self) -> u32 {
        match self {
            TextEncoding::Utf8 => 1,
            TextEncoding::Utf16Le => 2,
            TextEncoding::Utf16Be => 3,
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            TextEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            TextEncoding::Utf16Le | TextEncoding::Utf16Be => {
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        TextEncoding::Utf16Le => u16::from_le_bytes([pair[0], pair[1]]),
                        _ => u16::from_be_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16_lossy(&units)
            }
        }
    }
}

/// The 100-byte header at the start of every SQLite database file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub magic: [u8; 16],
    pub page_size: u32,
    pub file_format_write_version: u8,
    pub file_format_read_version: u8,
    pub reserved_space: u8,
    pub max_embedded_payload_fraction: u8,
    pub min_embedded_payload_fraction: u8,
    pub leaf_payload_fraction: u8,
    pub file_change_counter: u32,
    pub database_size_pages: u32,
    pub freelist_trunk_page: u32,
    pub freelist_pages_count: u32,
    pub schema_cookie: u32,
    pub schema_format_number: u32,
    pub default_page_cache_size: u32,
    pub largest_root_btree_page: u32,
    pub text_encoding: TextEncoding,
    pub user_version: u32,
    pub incremental_vacuum_mode: u32,
    pub application_id: u32,
    pub reserved: [u8; 20],
    pub version_valid_for: u32,
    pub sqlite_version_number: u32,
}

impl Default for DatabaseHeader {
    fn default() -> Self {
        Self {
            magic: *SQLITE_MAGIC,
            page_size: 4096,
            file_format_write_version: 1,
            file_format_read_version: 1,
            reserved_space: 0,
            max_embedded_payload_fraction: 64,
            min_embedded_payload_fraction: 32,
            leaf_payload_fraction: 32,
            file_change_counter: 1,
            database_size_pages: 1,
            freelist_trunk_page: 0,
            freelist_pages_count: 0,
            schema_cookie: 1,
            schema_format_number: 4,
            default_page_cache_size: 0,
            largest_root_btree_page: 0,
            text_encoding: TextEncoding::Utf8,
            user_version: 0,
            incremental_vacuum_mode: 0,
            application_id: 0,
            reserved: [0; 20],
            version_valid_for: 1,
            sqlite_version_number: 3_045_000,
        }
    }
}

impl DatabaseHeader {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut serialization = Serialization::with_capacity(HEADER_SIZE);

        serialization.put_bytes(&self.magic);
        // 65536 is stored as 1
        let page_size = if self.page_size as usize == MAX_PAGE_SIZE {
            1
        } else {
            self.page_size as u16
        };
        serialization.put_2bytes_uint(page_size);
        serialization.put_1byte_uint(self.file_format_write_version);
        serialization.put_1byte_uint(self.file_format_read_version);
        serialization.put_1byte_uint(self.reserved_space);
        serialization.put_1byte_uint(self.max_embedded_payload_fraction);
        serialization.put_1byte_uint(self.min_embedded_payload_fraction);
        serialization.put_1byte_uint(self.leaf_payload_fraction);
        serialization.put_4bytes_uint(self.file_change_counter);
        serialization.put_4bytes_uint(self.database_size_pages);
        serialization.put_4bytes_uint(self.freelist_trunk_page);
        serialization.put_4bytes_uint(self.freelist_pages_count);
        serialization.put_4bytes_uint(self.schema_cookie);
        serialization.put_4bytes_uint(self.schema_format_number);
        serialization.put_4bytes_uint(self.default_page_cache_size);
        serialization.put_4bytes_uint(self.largest_root_btree_page);
        serialization.put_4bytes_uint(self.text_encoding.as_u32());
        serialization.put_4bytes_uint(self.user_version);
        serialization.put_4bytes_uint(self.incremental_vacuum_mode);
        serialization.put_4bytes_uint(self.application_id);
        serialization.put_bytes(&self.reserved);
        serialization.put_4bytes_uint(self.version_valid_for);
        serialization.put_4bytes_uint(self.sqlite_version_number);

        let mut buffer = serialization.finalize();
        buffer.resize(HEADER_SIZE, 0);
        buffer
    }

    /// Parses the header without validating page size or reserved bytes;
    /// the pager owns those checks.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DatabaseError> {
        let short = || DatabaseError::CorruptedDatabase {
            reason: "Header too short".to_string(),
        };
        if bytes.len() < HEADER_SIZE {
            return Err(short());
        }

        let mut deserialization = Deserialization::new(&bytes[..HEADER_SIZE]);

        let mut magic = [0u8; 16];
        magic.copy_from_slice(deserialization.advance_bytes(16).ok_or_else(short)?);

        let raw_page_size = deserialization.advance_2bytes_uint().ok_or_else(short)?;
        let page_size = if raw_page_size == 1 {
            MAX_PAGE_SIZE as u32
        } else {
            raw_page_size as u32
        };

        let file_format_write_version = deserialization.advance_1byte_uint().ok_or_else(short)?;
        let file_format_read_version = deserialization.advance_1byte_uint().ok_or_else(short)?;
        let reserved_space = deserialization.advance_1byte_uint().ok_or_else(short)?;
        let max_embedded_payload_fraction =
            deserialization.advance_1byte_uint().ok_or_else(short)?;
        let min_embedded_payload_fraction =
            deserialization.advance_1byte_uint().ok_or_else(short)?;
        let leaf_payload_fraction = deserialization.advance_1byte_uint().ok_or_else(short)?;

        let mut next_u32 = || deserialization.advance_4bytes_uint().ok_or_else(short);
        let file_change_counter = next_u32()?;
        let database_size_pages = next_u32()?;
        let freelist_trunk_page = next_u32()?;
        let freelist_pages_count = next_u32()?;
        let schema_cookie = next_u32()?;
        let schema_format_number = next_u32()?;
        let default_page_cache_size = next_u32()?;
        let largest_root_btree_page = next_u32()?;
        let text_encoding = TextEncoding::from_u32(next_u32()?);
        let user_version = next_u32()?;
        let incremental_vacuum_mode = next_u32()?;
        let application_id = next_u32()?;

        let mut reserved = [0u8; 20];
        reserved.copy_from_slice(deserialization.advance_bytes(20).ok_or_else(short)?);

        let version_valid_for = deserialization.advance_4bytes_uint().ok_or_else(short)?;
        let sqlite_version_number = deserialization.advance_4bytes_uint().ok_or_else(short)?;

        Ok(Self {
            magic,
            page_size,
            file_format_write_version,
            file_format_read_version,
            reserved_space,
            max_embedded_payload_fraction,
            min_embedded_payload_fraction,
            leaf_payload_fraction,
            file_change_counter,
            database_size_pages,
            freelist_trunk_page,
            freelist_pages_count,
            schema_cookie,
            schema_format_number,
            default_page_cache_size,
            largest_root_btree_page,
            text_encoding,
            user_version,
            incremental_vacuum_mode,
            application_id,
            reserved,
            version_valid_for,
            sqlite_version_number,
        })
    }

    pub fn has_valid_magic(&self) -> bool {
        &self.magic == SQLITE_MAGIC
    }
}
