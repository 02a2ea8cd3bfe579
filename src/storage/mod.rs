pub mod file_handle;
pub mod header;
pub mod pager;
pub mod serialization;
pub mod wal;
