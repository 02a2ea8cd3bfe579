use std::sync::Arc;

use crate::{
    storage::{pager::PageCodec, wal::Salt},
    types::error::Result,
};

/// Supplies page decryption for an encrypted source database.
///
/// A repair opens the cipher once before the pager is initialized and hands
/// the resulting codec to the pager; failing to open it is critical.
pub trait CipherDelegate {
    /// Prepares an in-memory cipher context for the database.
    fn open_cipher_in_memory(&mut self) -> Result<()>;

    /// Salt of the database recorded in a material, for ciphers deriving
    /// page keys from it.
    fn set_cipher_salt(&mut self, salt: Salt);

    /// The codec decoding each page, available once the cipher is open.
    fn cipher_context(&self) -> Option<Arc<dyn PageCodec>>;

    /// Page size the encrypted file was written with.
    fn cipher_page_size(&self) -> usize;

    fn close_cipher(&mut self) {}
}
