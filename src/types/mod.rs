pub mod cell;
pub mod error;
pub mod fraction;
pub mod page;
pub mod row;
pub mod value;

// Common type aliases
pub type PageNo = u32;
pub type FrameNo = u32;
pub type RowId = i64;

// Constants following the SQLite file format
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";
pub const HEADER_SIZE: usize = 100; // Database header size, embedded in page 1
pub const MIN_PAGE_SIZE: usize = 512;
pub const MAX_PAGE_SIZE: usize = 65536;
pub const MAX_RESERVED_BYTES: usize = 255;

pub const LEAF_PAGE_HEADER_SIZE: usize = 8;
pub const INTERIOR_PAGE_HEADER_SIZE: usize = 12; // leaf header + right-most pointer
pub const CELL_POINTER_SIZE: usize = 2;
pub const OVERFLOW_POINTER_SIZE: usize = 4; // PageNo of the next overflow page

pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;
pub const WAL_MAGIC_LE: u32 = 0x377f_0682;
pub const WAL_MAGIC_BE: u32 = 0x377f_0683;
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;
