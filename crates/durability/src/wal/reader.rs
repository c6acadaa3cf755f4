//! WAL reader
//!
//! Scans segment files in name order and yields records until end of log or
//! the first record that fails validation. A torn or corrupt tail record
//! stops the scan cleanly so recovery proceeds with the durable prefix; it
//! never aborts recovery.

use crate::wal::list_segments;
use crate::wal::record::WalRecord;
use std::path::Path;
use tessera_core::Result;

/// Sequential reader over every WAL segment in a directory
pub struct WalReader {
    records: std::vec::IntoIter<WalRecord>,
}

impl WalReader {
    /// Open the WAL directory and scan all segments up front
    pub fn open(dir: &Path) -> Result<Self> {
        let mut records = Vec::new();
        'segments: for path in list_segments(dir)? {
            let bytes = std::fs::read(&path)?;
            let mut pos = 0;
            while pos < bytes.len() {
                match WalRecord::decode(&bytes[pos..]) {
                    Ok(Some((record, consumed))) => {
                        records.push(record);
                        pos += consumed;
                    }
                    Ok(None) => {
                        // Torn tail write; everything before it is good.
                        tracing::warn!(
                            segment = %path.display(),
                            offset = pos,
                            "incomplete record at WAL tail, stopping scan"
                        );
                        break 'segments;
                    }
                    Err(e) => {
                        tracing::warn!(
                            segment = %path.display(),
                            offset = pos,
                            error = %e,
                            "corrupt WAL record, stopping scan"
                        );
                        break 'segments;
                    }
                }
            }
        }
        Ok(WalReader {
            records: records.into_iter(),
        })
    }

    /// Next record, or `None` at the end of the valid prefix
    pub fn read_record(&mut self) -> Option<WalRecord> {
        self.records.next()
    }

    /// Drain every remaining record
    pub fn read_all(self) -> Vec<WalRecord> {
        self.records.collect()
    }
}

impl Iterator for WalReader {
    type Item = WalRecord;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::record::RecordType;
    use crate::wal::writer::{WalWriter, DEFAULT_SEGMENT_SIZE};
    use std::fs::OpenOptions;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_records(dir: &Path, count: u64) {
        let wal = WalWriter::open(dir, DEFAULT_SEGMENT_SIZE).unwrap();
        for i in 0..count {
            wal.append(RecordType::BeginTx, i + 1, 0, "", Vec::new())
                .unwrap();
        }
        wal.flush().unwrap();
    }

    #[test]
    fn empty_directory_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let records = WalReader::open(dir.path()).unwrap().read_all();
        assert!(records.is_empty());
        // A directory that doesn't exist yet behaves the same.
        let records = WalReader::open(&dir.path().join("missing"))
            .unwrap()
            .read_all();
        assert!(records.is_empty());
    }

    #[test]
    fn reads_back_what_was_written() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 5);
        let records = WalReader::open(dir.path()).unwrap().read_all();
        assert_eq!(records.len(), 5);
        assert_eq!(records[0].tx_id, 1);
        assert_eq!(records[4].tx_id, 5);
    }

    #[test]
    fn torn_tail_yields_the_prefix() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 3);

        // Append garbage bytes shorter than a record header.
        let segment = list_segments(dir.path()).unwrap().pop().unwrap();
        let mut file = OpenOptions::new().append(true).open(segment).unwrap();
        file.write_all(b"TWAL\x02").unwrap();

        let records = WalReader::open(dir.path()).unwrap().read_all();
        assert_eq!(records.len(), 3);
    }

    #[test]
    fn corrupt_record_stops_the_scan() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 3);

        let segment = list_segments(dir.path()).unwrap().pop().unwrap();
        let mut bytes = std::fs::read(&segment).unwrap();
        // Flip a payload byte inside the second record.
        let (_, first_len) = WalRecord::decode(&bytes).unwrap().unwrap();
        bytes[first_len + 10] ^= 0xFF;
        std::fs::write(&segment, bytes).unwrap();

        let records = WalReader::open(dir.path()).unwrap().read_all();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn read_record_iterates_in_order() {
        let dir = TempDir::new().unwrap();
        write_records(dir.path(), 2);
        let mut reader = WalReader::open(dir.path()).unwrap();
        assert_eq!(reader.read_record().unwrap().lsn, 1);
        assert_eq!(reader.read_record().unwrap().lsn, 2);
        assert!(reader.read_record().is_none());
    }
}
