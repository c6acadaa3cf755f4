//! WAL writer
//!
//! Single-writer serialized: one mutex covers LSN assignment, the append,
//! and segment rolling, so records land in LSN order within and across
//! segments. `flush()` is fsync-backed; the engine must not apply a table
//! mutation before the records describing it have been flushed.

use crate::wal::record::{RecordType, WalRecord};
use crate::wal::{list_segments, segment_path};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tessera_core::{Error, Result};

/// Default segment roll size: 16 MiB
pub const DEFAULT_SEGMENT_SIZE: u64 = 16 * 1024 * 1024;

struct WriterInner {
    file: BufWriter<File>,
    segment_number: u64,
    segment_bytes: u64,
    next_lsn: u64,
}

/// Append-only segmented WAL writer
pub struct WalWriter {
    dir: PathBuf,
    segment_size: u64,
    inner: Mutex<WriterInner>,
}

impl WalWriter {
    /// Open the WAL in `dir`, continuing after any existing segments
    ///
    /// The next LSN is rederived by scanning existing records; appends go to
    /// a fresh segment so a torn tail in the previous one is never extended.
    pub fn open(dir: &Path, segment_size: u64) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let segments = list_segments(dir)?;
        let last_segment = segments
            .iter()
            .filter_map(|p| segment_number_of(p))
            .max()
            .unwrap_or(0);

        let mut next_lsn = 1;
        if !segments.is_empty() {
            let existing = crate::wal::reader::WalReader::open(dir)?.read_all();
            if let Some(max) = existing.iter().map(|r| r.lsn).max() {
                next_lsn = max + 1;
            }
        }

        let segment_number = last_segment + 1;
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(segment_path(dir, segment_number))?;

        tracing::debug!(
            dir = %dir.display(),
            segment_number,
            next_lsn,
            "opened write-ahead log"
        );

        Ok(WalWriter {
            dir: dir.to_path_buf(),
            segment_size,
            inner: Mutex::new(WriterInner {
                file: BufWriter::new(file),
                segment_number,
                segment_bytes: 0,
                next_lsn,
            }),
        })
    }

    /// Append one record, returning its assigned LSN
    ///
    /// The record is buffered; call [`WalWriter::flush`] before relying on
    /// it having reached disk.
    pub fn append(
        &self,
        record_type: RecordType,
        tx_id: u64,
        row_id: u64,
        table_name: &str,
        data: Vec<u8>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();

        if inner.segment_bytes >= self.segment_size {
            self.roll_segment(&mut inner)?;
        }

        let lsn = inner.next_lsn;
        inner.next_lsn += 1;

        let record = WalRecord {
            record_type,
            tx_id,
            lsn,
            row_id,
            table_name: table_name.to_string(),
            data,
        };
        let bytes = record.encode();
        inner
            .file
            .write_all(&bytes)
            .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("WAL append: {}", e))))?;
        inner.segment_bytes += bytes.len() as u64;
        Ok(lsn)
    }

    /// Flush buffered records and fsync the active segment
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;
        Ok(())
    }

    /// Next LSN the writer would assign
    pub fn next_lsn(&self) -> u64 {
        self.inner.lock().next_lsn
    }

    /// Active segment number
    pub fn segment_number(&self) -> u64 {
        self.inner.lock().segment_number
    }

    fn roll_segment(&self, inner: &mut WriterInner) -> Result<()> {
        inner.file.flush()?;
        inner.file.get_ref().sync_all()?;

        let segment_number = inner.segment_number + 1;
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(segment_path(&self.dir, segment_number))?;
        tracing::debug!(segment_number, "rolled WAL segment");

        inner.file = BufWriter::new(file);
        inner.segment_number = segment_number;
        inner.segment_bytes = 0;
        Ok(())
    }
}

fn segment_number_of(path: &Path) -> Option<u64> {
    path.file_name()?
        .to_str()?
        .strip_prefix("wal.")?
        .parse()
        .ok()
}
