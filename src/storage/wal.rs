//! Write-ahead log reader.
//!
//! WAL header layout (all fields big-endian):
//! ```text
//! Offset  Size  Description
//!   0       4   Magic: 0x377F0682 (little-endian checksum words) or 0x377F0683
//!   4       4   Format version
//!   8       4   Page size
//!  12       4   Checkpoint sequence
//!  16       8   Salt pair
//!  24       8   Checksum pair over bytes 0..24
//! ```
//! Each frame is a 24-byte header (page number, database size after commit,
//! salt pair, cumulative checksum pair) followed by one page.

use std::{
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    storage::{
        file_handle::{FileHandle, file_size},
        serialization::Deserialization,
    },
    types::{
        FrameNo, PageNo, WAL_FRAME_HEADER_SIZE, WAL_HEADER_SIZE, WAL_MAGIC_BE, WAL_MAGIC_LE,
        error::{DatabaseError, Result},
    },
};

/// The pair of random values identifying one WAL generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Salt {
    pub first: u32,
    pub second: u32,
}

impl Salt {
    pub fn new(first: u32, second: u32) -> Self {
        Self { first, second }
    }

    pub fn is_zero(&self) -> bool {
        self.first == 0 && self.second == 0
    }
}

/// Cumulative checksum pair carried by the WAL header and every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WalChecksum {
    pub s1: u32,
    pub s2: u32,
}

/// Folds `data` into `seed` using 32-bit words of the given byte order.
/// `data` must be a multiple of 8 bytes; a trailing remainder is ignored.
pub fn calculate_checksum(data: &[u8], seed: WalChecksum, big_endian_words: bool) -> WalChecksum {
    let word = |bytes: &[u8]| {
        let bytes = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if big_endian_words {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    };

    let mut s1 = seed.s1;
    let mut s2 = seed.s2;
    for chunk in data.chunks_exact(8) {
        s1 = s1.wrapping_add(word(&chunk[..4])).wrapping_add(s2);
        s2 = s2.wrapping_add(word(&chunk[4..])).wrapping_add(s1);
    }
    WalChecksum { s1, s2 }
}

#[derive(Debug, Clone, Copy)]
struct FrameHeader {
    page_number: PageNo,
    truncate: u32,
    salt: Salt,
    checksum: WalChecksum,
}

impl FrameHeader {
    fn parse(data: &[u8]) -> Option<Self> {
        let deserialization = Deserialization::new(data);
        Some(Self {
            page_number: deserialization.get_4bytes_uint(0)?,
            truncate: deserialization.get_4bytes_uint(4)?,
            salt: Salt::new(
                deserialization.get_4bytes_uint(8)?,
                deserialization.get_4bytes_uint(12)?,
            ),
            checksum: WalChecksum {
                s1: deserialization.get_4bytes_uint(16)?,
                s2: deserialization.get_4bytes_uint(20)?,
            },
        })
    }

    fn is_commit(&self) -> bool {
        self.truncate != 0
    }
}

pub struct Wal {
    path: PathBuf,
    file: Option<FileHandle>,
    page_size: usize,
    max_allowed_frame: Option<FrameNo>,
    salt: Salt,
    big_endian_checksum: bool,
    pages_to_frames: BTreeMap<PageNo, FrameNo>,
    disposed_pages: BTreeSet<PageNo>,
    frame_count: FrameNo,
    max_frame: FrameNo,
    truncate: Option<u32>,
    initialized: bool,
}

impl Wal {
    /// A WAL for the database at `database_path`; the log itself lives at `<path>-wal`.
    pub fn new<P: AsRef<Path>>(database_path: P) -> Self {
        let mut path = database_path.as_ref().as_os_str().to_owned();
        path.push("-wal");
        Self {
            path: PathBuf::from(path),
            file: None,
            page_size: 0,
            max_allowed_frame: None,
            salt: Salt::default(),
            big_endian_checksum: false,
            pages_to_frames: BTreeMap::new(),
            disposed_pages: BTreeSet::new(),
            frame_count: 0,
            max_frame: 0,
            truncate: None,
            initialized: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.page_size = page_size;
    }

    /// Frames after `frame` are ignored even when valid.
    pub fn set_max_allowed_frame(&mut self, frame: FrameNo) {
        self.max_allowed_frame = Some(frame);
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn frame_size(&self) -> usize {
        WAL_FRAME_HEADER_SIZE + self.page_size
    }

    fn frame_offset(&self, frame: FrameNo) -> u64 {
        WAL_HEADER_SIZE as u64 + (frame as u64 - 1) * self.frame_size() as u64
    }

    /// Reads the header and walks the frames, publishing committed pages.
    ///
    /// A missing or empty log succeeds with zero frames. A bad header is a
    /// corruption error; a bad frame only ends the valid prefix.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        if self.page_size == 0 {
            return Err(DatabaseError::Misuse {
                details: "Wal initialized before the page size is known".to_string(),
            });
        }

        let size = file_size(&self.path)?;
        if size == 0 {
            self.initialized = true;
            return Ok(());
        }

        let file = FileHandle::open(&self.path)?;
        let header = file.map(0, WAL_HEADER_SIZE)?;
        if header.len() < WAL_HEADER_SIZE {
            return Err(DatabaseError::corrupted_frame(0, "Wal header too short"));
        }

        let deserialization = Deserialization::new(&header);
        let read = |offset| {
            deserialization
                .get_4bytes_uint(offset)
                .ok_or_else(|| DatabaseError::corrupted_frame(0, "Wal header too short"))
        };

        let magic = read(0)?;
        if magic & !1 != WAL_MAGIC_LE {
            return Err(DatabaseError::corrupted_frame(
                0,
                format!("Incorrect wal magic: {:#x}", magic),
            ));
        }
        let big_endian_checksum = magic == WAL_MAGIC_BE;

        let page_size = read(8)? as usize;
        if page_size != self.page_size {
            return Err(DatabaseError::corrupted_frame(
                0,
                format!(
                    "Wal page size {} differs from database page size {}",
                    page_size, self.page_size
                ),
            ));
        }

        let salt = Salt::new(read(16)?, read(20)?);
        let expected = WalChecksum {
            s1: read(24)?,
            s2: read(28)?,
        };
        let mut checksum =
            calculate_checksum(&header[..24], WalChecksum::default(), big_endian_checksum);
        if checksum != expected {
            return Err(DatabaseError::corrupted_frame(
                0,
                format!(
                    "Mismatched wal checksum: {}, {} to {}, {}",
                    checksum.s1, checksum.s2, expected.s1, expected.s2
                ),
            ));
        }

        self.salt = salt;
        self.big_endian_checksum = big_endian_checksum;

        let frames_in_file = ((size - WAL_HEADER_SIZE as u64) / self.frame_size() as u64) as FrameNo;
        let last_frame = match self.max_allowed_frame {
            Some(max) => frames_in_file.min(max),
            None => frames_in_file,
        };

        let mut uncommitted: BTreeMap<PageNo, FrameNo> = BTreeMap::new();
        for frame in 1..=last_frame {
            let data = file.map(self.frame_offset(frame), self.frame_size())?;
            if data.len() < self.frame_size() {
                debug!(path = %self.path.display(), frame, "Short wal frame ends the log");
                break;
            }
            let Some(frame_header) = FrameHeader::parse(&data) else {
                break;
            };
            if frame_header.salt != self.salt {
                debug!(path = %self.path.display(), frame, "Stale salt ends the log");
                break;
            }

            checksum = calculate_checksum(&data[..8], checksum, big_endian_checksum);
            checksum = calculate_checksum(
                &data[WAL_FRAME_HEADER_SIZE..],
                checksum,
                big_endian_checksum,
            );
            if checksum != frame_header.checksum {
                debug!(
                    path = %self.path.display(),
                    frame,
                    "Mismatched frame checksum ends the log"
                );
                break;
            }

            self.frame_count = frame;
            uncommitted.insert(frame_header.page_number, frame);
            if frame_header.is_commit() {
                self.truncate = Some(frame_header.truncate);
                self.max_frame = frame;
                self.pages_to_frames.append(&mut uncommitted);
            }
        }
        // frames after the last commit never became part of the database
        self.disposed_pages.extend(uncommitted.into_keys());

        info!(
            path = %self.path.display(),
            frames = self.frame_count,
            committed = self.max_frame,
            pages = self.pages_to_frames.len(),
            "Wal loaded"
        );

        self.file = Some(file);
        self.initialized = true;
        Ok(())
    }

    pub fn contains_page(&self, page: PageNo) -> bool {
        self.pages_to_frames.contains_key(&page)
    }

    /// The latest committed copy of `page`.
    pub fn acquire_page_data(&self, page: PageNo) -> Result<Bytes> {
        let (Some(frame), Some(file)) = (self.pages_to_frames.get(&page), self.file.as_ref())
        else {
            return Err(DatabaseError::Misuse {
                details: format!("Page {} is not in the wal", page),
            });
        };
        let offset = self.frame_offset(*frame) + WAL_FRAME_HEADER_SIZE as u64;
        let data = file.map(offset, self.page_size)?;
        if data.len() != self.page_size {
            return Err(DatabaseError::corrupted_frame(
                *frame,
                format!(
                    "Acquired wal data with size {} is less than the expected size {}",
                    data.len(),
                    self.page_size
                ),
            ));
        }
        Ok(data)
    }

    /// Length of the valid frame prefix, committed or not.
    pub fn frame_count(&self) -> FrameNo {
        self.frame_count
    }

    /// The last commit frame.
    pub fn max_frame(&self) -> FrameNo {
        self.max_frame
    }

    /// Highest page number published by the log.
    pub fn max_page_number(&self) -> PageNo {
        self.pages_to_frames
            .last_key_value()
            .map(|(page, _)| *page)
            .unwrap_or(0)
    }

    /// Database size in pages recorded by the last commit frame.
    pub fn truncate(&self) -> Option<u32> {
        self.truncate
    }

    pub fn number_of_pages(&self) -> usize {
        self.pages_to_frames.len()
    }

    pub fn salt(&self) -> Salt {
        self.salt
    }

    pub fn is_big_endian_checksum(&self) -> bool {
        self.big_endian_checksum
    }

    pub fn disposed_pages(&self) -> usize {
        self.disposed_pages.len()
    }

    /// Forgets every frame; later reads fall back to the main file.
    pub fn dispose(&mut self) {
        let pages = std::mem::take(&mut self.pages_to_frames);
        self.disposed_pages.extend(pages.into_keys());
        self.file = None;
        self.truncate = None;
        self.frame_count = 0;
        self.max_frame = 0;
        self.salt = Salt::default();
        self.initialized = true;
    }
}
