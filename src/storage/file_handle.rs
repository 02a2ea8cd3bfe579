use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::{Path, PathBuf},
};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::debug;

use crate::types::error::Result;

/// Where the bytes of an opened file come from.
enum FileData {
    /// The whole file mapped once at open time, shared by every slice handed out.
    Mapped(Bytes),
    /// Files that cannot be mapped are read on demand.
    Unmapped(Mutex<File>),
}

/// A read-only view of one file on disk.
///
/// Every slice returned by [`FileHandle::map`] is a [`Bytes`] sharing the
/// mapping, so pages and cells can outlive the call that produced them.
pub struct FileHandle {
    path: PathBuf,
    size: u64,
    data: FileData,
}

impl FileHandle {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        let size = file.metadata()?.len();

        // mapping a zero-length file fails on most platforms
        let data = if size == 0 {
            FileData::Mapped(Bytes::new())
        } else {
            match unsafe { memmap2::Mmap::map(&file) } {
                Ok(mmap) => FileData::Mapped(Bytes::from_owner(mmap)),
                Err(error) => {
                    debug!(path = %path.display(), %error, "Mapping failed, reading on demand");
                    FileData::Unmapped(Mutex::new(file))
                }
            }
        };

        Ok(Self { path, size, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the file when it was opened.
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.data, FileData::Mapped(_))
    }

    /// Returns up to `size` bytes starting at `offset`. A range running past
    /// the end of the file yields a shorter (possibly empty) buffer.
    pub fn map(&self, offset: u64, size: usize) -> Result<Bytes> {
        if offset >= self.size {
            return Ok(Bytes::new());
        }
        let available = (self.size - offset).min(size as u64) as usize;
        match &self.data {
            FileData::Mapped(bytes) => {
                let start = offset as usize;
                Ok(bytes.slice(start..start + available))
            }
            FileData::Unmapped(file) => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(offset))?;
                let mut buffer = Vec::with_capacity(available);
                file.by_ref().take(available as u64).read_to_end(&mut buffer)?;
                Ok(Bytes::from(buffer))
            }
        }
    }
}

impl std::fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// Size of the file at `path`, or 0 when it does not exist.
pub fn file_size<P: AsRef<Path>>(path: P) -> Result<u64> {
    match std::fs::metadata(path) {
        Ok(metadata) => Ok(metadata.len()),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(error) => Err(error.into()),
    }
}
