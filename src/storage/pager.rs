use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use tracing::{debug, warn};

use crate::{
    storage::{
        file_handle::{FileHandle, file_size},
        header::{DatabaseHeader, TextEncoding},
        wal::{Salt, Wal},
    },
    types::{
        FrameNo, HEADER_SIZE, MAX_PAGE_SIZE, MAX_RESERVED_BYTES, MIN_PAGE_SIZE, PageNo,
        error::{DatabaseError, Result},
        page::Page,
    },
    utils::notifier,
};

pub const DEFAULT_PAGE_CACHE_CAPACITY: usize = 512;

/// Page-level decryption applied to every page before it is parsed.
pub trait PageCodec: Send + Sync {
    /// Returns the plaintext page, or `None` when the page cannot be decoded.
    fn decode(&self, page: PageNo, data: &[u8]) -> Option<Vec<u8>>;
}

/// Resolves page numbers to page bytes, from the WAL when it holds a
/// committed copy and from the main file otherwise.
pub struct Pager {
    path: PathBuf,
    file: Option<FileHandle>,
    page_size: Option<usize>,
    reserved_bytes: Option<usize>,
    number_of_pages: PageNo,
    file_size: u64,
    schema_cookie: u32,
    text_encoding: TextEncoding,
    wal: Wal,
    skip_wal: bool,
    codec: Option<Arc<dyn PageCodec>>,
    cache: HashMap<PageNo, Bytes>,
    cache_capacity: usize,
    initialized: bool,
}

impl Pager {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            wal: Wal::new(&path),
            path,
            file: None,
            page_size: None,
            reserved_bytes: None,
            number_of_pages: 0,
            file_size: 0,
            schema_cookie: 0,
            text_encoding: TextEncoding::Utf8,
            skip_wal: false,
            codec: None,
            cache: HashMap::new(),
            cache_capacity: DEFAULT_PAGE_CACHE_CAPACITY,
            initialized: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = Some(page_size);
    }

    pub fn set_reserved_bytes(&mut self, reserved_bytes: usize) {
        self.reserved_bytes = Some(reserved_bytes);
    }

    pub fn set_codec(&mut self, codec: Arc<dyn PageCodec>) {
        self.codec = Some(codec);
    }

    pub fn set_cache_capacity(&mut self, capacity: usize) {
        self.cache_capacity = capacity;
    }

    /// Frames after `frame` are left out of the WAL replay.
    pub fn set_wal_max_frame(&mut self, frame: FrameNo) {
        self.wal.set_max_allowed_frame(frame);
    }

    pub fn set_wal_skipped(&mut self) {
        self.skip_wal = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Opens the database file, reads the header unless page size and
    /// reserved bytes were preset, and loads the WAL.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        self.file_size = file_size(&self.path)?;
        if self.file_size == 0 {
            return Err(DatabaseError::Empty {
                path: self.path.clone(),
            });
        }
        let file = FileHandle::open(&self.path)?;

        if self.page_size.is_none() || self.reserved_bytes.is_none() {
            let header = self.acquire_header(&file)?;
            if !header.has_valid_magic() {
                return Err(DatabaseError::NotADatabase {
                    path: self.path.clone(),
                });
            }
            self.apply_header(&header);
        } else if let Ok(header) = self.acquire_header(&file) {
            // page size and reserved bytes come from elsewhere; the header
            // still contributes text encoding and schema cookie when readable
            if header.has_valid_magic() {
                self.schema_cookie = header.schema_cookie;
                self.text_encoding = header.text_encoding;
            }
        }

        let page_size = self.page_size.unwrap_or(0);
        if !page_size.is_power_of_two() || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(DatabaseError::corrupted_page(
                1,
                format!("Page size {} is not aligned or out of range", page_size),
            ));
        }
        let reserved_bytes = self.reserved_bytes.unwrap_or(0);
        if reserved_bytes > MAX_RESERVED_BYTES {
            return Err(DatabaseError::corrupted_page(
                1,
                format!("Reserved bytes {} is illegal", reserved_bytes),
            ));
        }

        self.number_of_pages = self.file_size.div_ceil(page_size as u64) as PageNo;
        self.file = Some(file);

        if !self.skip_wal {
            self.wal.set_page_size(page_size);
            if let Err(error) = self.wal.initialize() {
                if !error.is_corruption() {
                    return Err(error);
                }
                notifier::notify(&error, self.wal.path());
                warn!(path = %self.path.display(), "Disposing corrupted wal");
                self.wal.dispose();
            }
        }

        debug!(
            path = %self.path.display(),
            page_size,
            reserved_bytes,
            pages = self.number_of_pages(),
            "Pager initialized"
        );
        self.initialized = true;
        Ok(())
    }

    fn acquire_header(&self, file: &FileHandle) -> Result<DatabaseHeader> {
        match (&self.codec, self.page_size) {
            (Some(codec), Some(page_size)) => {
                let data = file.map(0, page_size)?;
                if data.len() != page_size {
                    return Err(DatabaseError::corrupted_page(1, "Short read of the first page"));
                }
                let decoded = codec
                    .decode(1, &data)
                    .ok_or_else(|| DatabaseError::corrupted_page(1, "Decode page data fail"))?;
                DatabaseHeader::from_bytes(&decoded)
            }
            (Some(_), None) => Err(DatabaseError::Misuse {
                details: "Page size must be set before reading an encrypted database".to_string(),
            }),
            (None, _) => {
                let data = file.map(0, HEADER_SIZE)?;
                if data.len() != HEADER_SIZE {
                    return Err(DatabaseError::NotADatabase {
                        path: self.path.clone(),
                    });
                }
                DatabaseHeader::from_bytes(&data)
            }
        }
    }

    fn apply_header(&mut self, header: &DatabaseHeader) {
        if self.page_size.is_none() {
            self.page_size = Some(header.page_size as usize);
        }
        if self.reserved_bytes.is_none() {
            self.reserved_bytes = Some(header.reserved_space as usize);
        }
        self.schema_cookie = header.schema_cookie;
        self.text_encoding = header.text_encoding;
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(DatabaseError::Misuse {
                details: "Pager used before initialize".to_string(),
            })
        }
    }

    /// Bytes of page `number`, exactly one page long.
    pub fn acquire_page_data(&mut self, number: PageNo) -> Result<Bytes> {
        self.ensure_initialized()?;
        if number == 0 {
            return Err(DatabaseError::corrupted_page(0, "Page number 0 is invalid"));
        }
        if let Some(data) = self.cache.get(&number) {
            return Ok(data.clone());
        }

        let page_size = self.page_size();
        let data = if self.wal.contains_page(number) {
            self.wal.acquire_page_data(number)?
        } else {
            if number > self.number_of_pages {
                return Err(DatabaseError::corrupted_page(
                    number,
                    format!(
                        "Acquired page number {} exceeds the page count {}",
                        number, self.number_of_pages
                    ),
                ));
            }
            let Some(file) = self.file.as_ref() else {
                return Err(DatabaseError::Misuse {
                    details: "Pager file is closed".to_string(),
                });
            };
            file.map((number as u64 - 1) * page_size as u64, page_size)?
        };

        if data.len() != page_size {
            return Err(DatabaseError::corrupted_page(
                number,
                format!(
                    "Acquired page data with size {} is less than the expected size {}",
                    data.len(),
                    page_size
                ),
            ));
        }

        let data = match &self.codec {
            Some(codec) => Bytes::from(
                codec
                    .decode(number, &data)
                    .ok_or_else(|| DatabaseError::corrupted_page(number, "Decode page data fail"))?,
            ),
            None => data,
        };

        if self.cache.len() >= self.cache_capacity {
            self.cache.clear();
        }
        if self.cache_capacity > 0 {
            self.cache.insert(number, data.clone());
        }
        Ok(data)
    }

    pub fn acquire_page(&mut self, number: PageNo) -> Result<Page> {
        let data = self.acquire_page_data(number)?;
        Page::parse(number, data, self.usable_size(), self.number_of_pages())
    }

    pub fn page_size(&self) -> usize {
        self.page_size.unwrap_or(0)
    }

    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes.unwrap_or(0)
    }

    pub fn usable_size(&self) -> usize {
        self.page_size() - self.reserved_bytes()
    }

    /// Pages addressable through the main file or the WAL.
    pub fn number_of_pages(&self) -> PageNo {
        self.number_of_pages.max(self.wal.max_page_number())
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn schema_cookie(&self) -> u32 {
        self.schema_cookie
    }

    pub fn text_encoding(&self) -> TextEncoding {
        self.text_encoding
    }

    pub fn wal_salt(&self) -> Salt {
        self.wal.salt()
    }

    /// Valid frames found in the WAL.
    pub fn wal_frame_count(&self) -> FrameNo {
        self.wal.frame_count()
    }

    pub fn wal_max_frame(&self) -> FrameNo {
        self.wal.max_frame()
    }

    pub fn wal_page_count(&self) -> usize {
        self.wal.number_of_pages()
    }

    pub fn disposed_wal_pages(&self) -> usize {
        self.wal.disposed_pages()
    }

    pub fn contains_page_in_wal(&self, number: PageNo) -> bool {
        self.wal.contains_page(number)
    }

    /// Ignores the WAL from now on; cached WAL copies are dropped with it.
    pub fn dispose_wal(&mut self) {
        self.wal.dispose();
        self.cache.clear();
    }
}
