//! Storage error types
//!
//! Error codes:
//! - BLOB_STORAGE_IO_ERROR (ERROR severity)
//! - BLOB_DATA_CORRUPTION (FATAL severity)
//! - BLOB_VERSION_MISMATCH (ERROR severity)
//! - BLOB_ILLEGAL_STATE (ERROR severity)
//! - BLOB_RECORD_TOO_LARGE (ERROR severity)

use std::fmt;
use std::io;

/// Severity levels for storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Operation fails, storage remains usable
    Error,
    /// Storage must be considered inconsistent
    Fatal,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "ERROR"),
            Severity::Fatal => write!(f, "FATAL"),
        }
    }
}

/// Storage-specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorCode {
    /// Disk I/O failure
    BlobStorageIoError,
    /// Broken magic, bad header checksum, invalid record fields, cyclic redirects
    BlobDataCorruption,
    /// File written by an incompatible engine revision
    BlobVersionMismatch,
    /// Misuse: closed storage, double delete, unallocated id, deleted record
    BlobIllegalState,
    /// Payload (or requested capacity) above the supported maximum
    BlobRecordTooLarge,
}

impl StorageErrorCode {
    /// Returns the string code
    pub fn code(&self) -> &'static str {
        match self {
            StorageErrorCode::BlobStorageIoError => "BLOB_STORAGE_IO_ERROR",
            StorageErrorCode::BlobDataCorruption => "BLOB_DATA_CORRUPTION",
            StorageErrorCode::BlobVersionMismatch => "BLOB_VERSION_MISMATCH",
            StorageErrorCode::BlobIllegalState => "BLOB_ILLEGAL_STATE",
            StorageErrorCode::BlobRecordTooLarge => "BLOB_RECORD_TOO_LARGE",
        }
    }

    /// Returns the severity level for this error
    pub fn severity(&self) -> Severity {
        match self {
            StorageErrorCode::BlobDataCorruption => Severity::Fatal,
            StorageErrorCode::BlobStorageIoError
            | StorageErrorCode::BlobVersionMismatch
            | StorageErrorCode::BlobIllegalState
            | StorageErrorCode::BlobRecordTooLarge => Severity::Error,
        }
    }
}

impl fmt::Display for StorageErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Storage error type carrying the code, a message and optional context
#[derive(Debug)]
pub struct StorageError {
    /// Error code
    code: StorageErrorCode,
    /// Human-readable message
    message: String,
    /// Optional details about the error context
    details: Option<String>,
    /// Underlying IO error if applicable
    source: Option<io::Error>,
}

impl StorageError {
    /// Create a new storage I/O error
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Self {
            code: StorageErrorCode::BlobStorageIoError,
            message: message.into(),
            details: None,
            source: Some(source),
        }
    }

    /// Create a new data corruption error (FATAL)
    pub fn corruption(message: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::BlobDataCorruption,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create a data corruption error with byte offset context
    pub fn corruption_at_offset(offset: u64, reason: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::BlobDataCorruption,
            message: reason.into(),
            details: Some(format!("byte_offset: {}", offset)),
            source: None,
        }
    }

    /// Create a version mismatch error
    pub fn version_mismatch(found: u32, expected: u32) -> Self {
        Self {
            code: StorageErrorCode::BlobVersionMismatch,
            message: format!(
                "storage version {} does not match engine version {}",
                found, expected
            ),
            details: None,
            source: None,
        }
    }

    /// Create an illegal-state error (misuse of the API)
    pub fn illegal_state(message: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::BlobIllegalState,
            message: message.into(),
            details: None,
            source: None,
        }
    }

    /// Create an illegal-state error with record id context
    pub fn illegal_state_for_record(record_id: u32, reason: impl Into<String>) -> Self {
        Self {
            code: StorageErrorCode::BlobIllegalState,
            message: reason.into(),
            details: Some(format!("record_id: {}", record_id)),
            source: None,
        }
    }

    /// Create a too-large error; raised before any byte is written
    pub fn too_large(length: usize, max: usize) -> Self {
        Self {
            code: StorageErrorCode::BlobRecordTooLarge,
            message: format!("payload of {} bytes exceeds supported maximum {}", length, max),
            details: None,
            source: None,
        }
    }

    /// Returns the error code
    pub fn code(&self) -> StorageErrorCode {
        self.code
    }

    /// Returns the severity level
    pub fn severity(&self) -> Severity {
        self.code.severity()
    }

    /// Returns the error message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns additional error details
    pub fn details(&self) -> Option<&str> {
        self.details.as_deref()
    }

    /// Returns whether this error means the file must be considered inconsistent
    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.code.severity(),
            self.code.code(),
            self.message
        )?;
        if let Some(ref details) = self.details {
            write!(f, " ({})", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(StorageErrorCode::BlobStorageIoError.code(), "BLOB_STORAGE_IO_ERROR");
        assert_eq!(StorageErrorCode::BlobDataCorruption.code(), "BLOB_DATA_CORRUPTION");
        assert_eq!(StorageErrorCode::BlobVersionMismatch.code(), "BLOB_VERSION_MISMATCH");
        assert_eq!(StorageErrorCode::BlobIllegalState.code(), "BLOB_ILLEGAL_STATE");
        assert_eq!(StorageErrorCode::BlobRecordTooLarge.code(), "BLOB_RECORD_TOO_LARGE");
    }

    #[test]
    fn corruption_is_fatal() {
        let err = StorageError::corruption("header checksum mismatch");
        assert!(err.is_fatal());
        assert_eq!(err.code().code(), "BLOB_DATA_CORRUPTION");
    }

    #[test]
    fn misuse_is_not_fatal() {
        let err = StorageError::illegal_state_for_record(7, "record is already deleted");
        assert!(!err.is_fatal());
        assert_eq!(err.code(), StorageErrorCode::BlobIllegalState);
    }

    #[test]
    fn display_contains_required_fields() {
        let err = StorageError::corruption_at_offset(1024, "record capacity out of bounds");
        let display = format!("{}", err);
        assert!(display.contains("BLOB_DATA_CORRUPTION"));
        assert!(display.contains("FATAL"));
        assert!(display.contains("record capacity out of bounds"));
        assert!(display.contains("byte_offset: 1024"));
    }

    #[test]
    fn io_error_keeps_source() {
        let err = StorageError::io(
            "failed to read record header",
            io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        );
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_fatal());
    }
}
