//! Import pipeline errors
//!
//! These are the job-aborting failures. Problems with a single row are
//! reported as `ImportIssue`s and never surface here.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("unsupported file format '{0}': upload a CSV or Excel (xlsx, xls) file")]
    UnsupportedFormat(String),

    #[error("file is {size} bytes, the limit is {limit} bytes")]
    FileTooLarge { size: u64, limit: u64 },

    #[error("no data found in '{0}': the file has a heading row but no data rows")]
    NoData(String),

    #[error("invalid upload payload: {0}")]
    InvalidPayload(String),

    #[error("cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// csv's own message already names the record and line
    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("row reader stopped unexpectedly: {0}")]
    ReaderAborted(String),
}

impl ImportError {
    /// Stable code used in `ErrorResponse` and job history
    pub fn code(&self) -> &'static str {
        match self {
            ImportError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ImportError::FileTooLarge { .. } => "FILE_TOO_LARGE",
            ImportError::NoData(_) => "NO_DATA",
            ImportError::InvalidPayload(_) => "INVALID_REQUEST",
            ImportError::Unreadable { .. } => "FILE_UNREADABLE",
            ImportError::Csv(_) | ImportError::Spreadsheet(_) => "PARSE_ERROR",
            ImportError::Storage(_) => "DATABASE_ERROR",
            ImportError::ReaderAborted(_) => "READER_ABORTED",
        }
    }

    /// Rejections of the upload itself, reported back to the uploader
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ImportError::UnsupportedFormat(_)
                | ImportError::FileTooLarge { .. }
                | ImportError::NoData(_)
                | ImportError::InvalidPayload(_)
        )
    }

    pub fn unreadable(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ImportError::Unreadable {
            path: path.into(),
            source,
        }
    }
}

impl From<calamine::Error> for ImportError {
    fn from(e: calamine::Error) -> Self {
        ImportError::Spreadsheet(e.to_string())
    }
}

impl From<calamine::XlsxError> for ImportError {
    fn from(e: calamine::XlsxError) -> Self {
        ImportError::Spreadsheet(e.to_string())
    }
}
