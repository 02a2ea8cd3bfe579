use std::path::PathBuf;

use thiserror::Error;

use crate::types::{FrameNo, PageNo};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database file is empty: {path}")]
    Empty { path: PathBuf },

    #[error("File is not a database: {path}")]
    NotADatabase { path: PathBuf },

    #[error("Corrupted page: page={page}, reason={reason}")]
    CorruptedPage { page: PageNo, reason: String },

    #[error("Corrupted wal frame: frame={frame}, reason={reason}")]
    CorruptedFrame { frame: FrameNo, reason: String },

    #[error("Corrupted database: {reason}")]
    CorruptedDatabase { reason: String },

    #[error("Corrupted material: element={element}")]
    CorruptedMaterial { element: String },

    #[error("Out of memory: {details}")]
    NoMemory { details: String },

    #[error("Conflict while assembling table '{table}': {details}")]
    Conflict { table: String, details: String },

    #[error("Assembler failure: {details}")]
    Assemble { details: String },

    #[error("Cipher failure: {details}")]
    Cipher { details: String },

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Misuse: {details}")]
    Misuse { details: String },

    #[error("Serialization/deserialization error: {details}")]
    SerializationError { details: String },
}

/// Error taxonomy shared by every repair component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Empty,
    NotADatabase,
    Corrupt,
    IOError,
    NoMemory,
    Conflict,
    Interrupt,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Notice,
    Warning,
    Critical,
}

impl DatabaseError {
    pub fn corrupted_page(page: PageNo, reason: impl Into<String>) -> Self {
        DatabaseError::CorruptedPage {
            page,
            reason: reason.into(),
        }
    }

    pub fn corrupted_frame(frame: FrameNo, reason: impl Into<String>) -> Self {
        DatabaseError::CorruptedFrame {
            frame,
            reason: reason.into(),
        }
    }

    pub fn corrupted_material(element: impl Into<String>) -> Self {
        DatabaseError::CorruptedMaterial {
            element: element.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DatabaseError::Io(_) => ErrorKind::IOError,
            DatabaseError::Empty { .. } => ErrorKind::Empty,
            DatabaseError::NotADatabase { .. } => ErrorKind::NotADatabase,
            DatabaseError::CorruptedPage { .. }
            | DatabaseError::CorruptedFrame { .. }
            | DatabaseError::CorruptedDatabase { .. }
            | DatabaseError::CorruptedMaterial { .. } => ErrorKind::Corrupt,
            DatabaseError::NoMemory { .. } => ErrorKind::NoMemory,
            DatabaseError::Conflict { .. } => ErrorKind::Conflict,
            DatabaseError::Interrupted => ErrorKind::Interrupt,
            DatabaseError::Assemble { .. }
            | DatabaseError::Cipher { .. }
            | DatabaseError::Misuse { .. }
            | DatabaseError::SerializationError { .. } => ErrorKind::Error,
        }
    }

    /// The single place deciding whether an error is recovered locally or
    /// halts the whole operation.
    pub fn severity(&self) -> Severity {
        match self.kind() {
            ErrorKind::Corrupt | ErrorKind::Conflict | ErrorKind::Interrupt => Severity::Notice,
            ErrorKind::Empty | ErrorKind::NotADatabase => Severity::Warning,
            ErrorKind::IOError | ErrorKind::NoMemory | ErrorKind::Error => Severity::Critical,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity() == Severity::Critical
    }

    pub fn is_corruption(&self) -> bool {
        self.kind() == ErrorKind::Corrupt
    }

    /// Page the error refers to, if any.
    pub fn page(&self) -> Option<PageNo> {
        match self {
            DatabaseError::CorruptedPage { page, .. } => Some(*page),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;
