//! ---
//! bh_section: "03-persistence-logging"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "CSV history recorder and snapshot readers."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use bh_msg::types::{Record, LOG_HEADER};
use tracing::{debug, info};

use crate::{PersistenceError, Result};

/// Byte destination of a history log.
pub trait LogSink: Write + Send {
    /// Force everything written so far to stable storage.
    fn sync(&self) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Append-only writer for the CSV history log.
///
/// Every append is flushed and synced before returning, so a record that was
/// acknowledged is on stable storage. Only one writer may own a log.
pub struct HistoryRecorder {
    path: PathBuf,
    writer: csv::Writer<Box<dyn LogSink>>,
    rows: u64,
}

impl HistoryRecorder {
    /// Create (or truncate) the log at `path` and write the header row.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = File::create(path)?;
        let recorder = Self::with_sink(path, file)?;
        info!(path = %path.display(), "history log created");
        Ok(recorder)
    }

    /// Start a log on an already opened sink. `path` is only reported, the
    /// header row goes to `sink`.
    pub fn with_sink(path: &Path, sink: impl LogSink + 'static) -> Result<Self> {
        let sink: Box<dyn LogSink> = Box::new(sink);
        let mut writer = csv::WriterBuilder::new().from_writer(sink);
        writer.write_record(LOG_HEADER)?;
        writer.flush()?;
        writer.get_ref().sync()?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            rows: 0,
        })
    }

    /// Append one record and force it to stable storage.
    ///
    /// Returns the number of data rows in the log after the append.
    pub fn append(&mut self, record: &Record) -> Result<u64> {
        self.writer.write_record(record.csv_fields())?;
        self.writer.flush()?;
        self.writer.get_ref().sync()?;
        self.rows += 1;
        debug!(rows = self.rows, time = record.time, "record appended");
        Ok(self.rows)
    }

    /// Number of data rows appended since the log was created.
    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    /// Location of the log on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for HistoryRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryRecorder")
            .field("path", &self.path)
            .field("rows", &self.rows)
            .finish_non_exhaustive()
    }
}

/// Drop any trailing bytes after the last newline.
pub fn complete_lines(mut bytes: Vec<u8>) -> Vec<u8> {
    match bytes.iter().rposition(|b| *b == b'\n') {
        Some(last) => bytes.truncate(last + 1),
        None => bytes.clear(),
    }
    bytes
}

/// Read the whole log as it currently stands, limited to complete lines.
pub async fn read_snapshot(path: &Path) -> Result<Vec<u8>> {
    let bytes = tokio::fs::read(path).await?;
    Ok(complete_lines(bytes))
}

/// Read every data row of a log, checking the header first.
pub fn read_rows(path: &Path) -> Result<Vec<Vec<String>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)?;
    let header = reader.headers()?.clone();
    if header.iter().ne(LOG_HEADER.iter().copied()) {
        return Err(PersistenceError::HeaderMismatch(
            header.iter().collect::<Vec<_>>().join(","),
        ));
    }

    let mut rows = Vec::new();
    for row in reader.records() {
        let row = row?;
        rows.push(row.iter().map(str::to_owned).collect());
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bh_msg::types::NO_OCCUPANCY_ANNOTATION;
    use tempfile::tempdir;

    fn record(time: f64, occupancy: u32) -> Record {
        Record {
            time,
            reference: 70.0,
            estimate: 31.6,
            error: if occupancy > 0 { 40.0 } else { 0.0 },
            control_input: if occupancy > 0 { 40000.0 } else { 0.0 },
            occupancy,
            humidity: 30.0,
            annotation: (occupancy == 0).then(|| NO_OCCUPANCY_ANNOTATION.to_owned()),
        }
    }

    #[test]
    fn writes_header_and_rows_verbatim() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("temperature_data.csv");
        let mut recorder = HistoryRecorder::create(&path).unwrap();
        assert_eq!(recorder.append(&record(0.04, 3)).unwrap(), 1);
        assert_eq!(recorder.append(&record(0.08, 0)).unwrap(), 2);

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "Time,Reference Temperature,Actual Temperature,Error,Control Input,People In Room,Humidity,Annotation\n\
             0.04,70.00,31.60,40.00,40000.00,3,30.00,\n\
             0.08,70.00,31.60,0.00,0.00,0,30.00,No people in room\n"
        );
        assert_eq!(recorder.rows_written(), 2);
    }

    #[test]
    fn create_truncates_previous_history() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("log.csv");
        {
            let mut recorder = HistoryRecorder::create(&path).unwrap();
            recorder.append(&record(0.04, 1)).unwrap();
        }
        let recorder = HistoryRecorder::create(&path).unwrap();
        assert_eq!(recorder.rows_written(), 0);
        assert!(read_rows(&path).unwrap().is_empty());
    }

    /// Accepts bytes until the first flush, then fails every write.
    struct FailAfterHeader {
        flushed: bool,
    }

    impl Write for FailAfterHeader {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.flushed {
                return Err(io::Error::other("device full"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            self.flushed = true;
            Ok(())
        }
    }

    impl LogSink for FailAfterHeader {
        fn sync(&self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_append_is_reported_and_not_counted() {
        let mut recorder =
            HistoryRecorder::with_sink(Path::new("full.csv"), FailAfterHeader { flushed: false })
                .unwrap();
        let err = recorder.append(&record(0.04, 1)).unwrap_err();
        assert!(matches!(err, PersistenceError::Io(_)));
        assert_eq!(recorder.rows_written(), 0);
        assert_eq!(recorder.path(), Path::new("full.csv"));
    }

    #[test]
    fn complete_lines_trims_partial_tail() {
        assert_eq!(complete_lines(b"a,b\nc,d\ne,".to_vec()), b"a,b\nc,d\n".to_vec());
        assert_eq!(complete_lines(b"a,b\n".to_vec()), b"a,b\n".to_vec());
        assert!(complete_lines(b"partial".to_vec()).is_empty());
    }

    #[test]
    fn read_rows_rejects_foreign_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("other.csv");
        std::fs::write(&path, "a,b\n1,2\n").unwrap();
        assert!(matches!(
            read_rows(&path),
            Err(PersistenceError::HeaderMismatch(_))
        ));
    }
}
