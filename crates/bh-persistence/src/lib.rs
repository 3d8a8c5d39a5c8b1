//! ---
//! bh_section: "03-persistence-logging"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Crate root and error type of the CSV history log."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Durable history of control-loop records.

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Wrapper for IO errors encountered while reading/writing the log.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for CSV encoding or decoding issues.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    /// The file on disk does not start with the expected column header.
    #[error("unexpected log header: {0}")]
    HeaderMismatch(String),
}

pub mod history;

pub use history::{complete_lines, read_rows, read_snapshot, HistoryRecorder, LogSink};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_mismatch_display() {
        let err = PersistenceError::HeaderMismatch("a,b".into());
        assert_eq!(format!("{err}"), "unexpected log header: a,b");
    }
}
