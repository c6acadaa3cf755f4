//! WAL record framing
//!
//! Record layout, all integers little-endian:
//!
//! ```text
//! ┌──────────┬──────┬───────┬──────┬────────┬───────────────┬───────────┬───────┐
//! │ magic(4) │ type │ tx_id │ lsn  │ row_id │ name_len+name │ data_len+ │ crc32 │
//! │  "TWAL"  │ u8   │ u64   │ u64  │ u64    │ u32 + bytes   │ data      │ u32   │
//! └──────────┴──────┴───────┴──────┴────────┴───────────────┴───────────┴───────┘
//! ```
//!
//! The CRC covers every framed byte after the magic. Row payloads are
//! bincode-serialized rows; an UPDATE payload is
//! `u64 old_len ∥ old_row_bytes ∥ new_row_bytes`.

use tessera_core::{Error, Result, Row};

/// Magic bytes opening every WAL record: "TWAL"
pub const RECORD_MAGIC: [u8; 4] = *b"TWAL";

/// Upper bound on name/data lengths accepted while decoding, to keep a
/// corrupt length field from driving a huge allocation
const MAX_FIELD_LEN: u32 = 256 * 1024 * 1024;

/// Kind of WAL record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Transaction started
    BeginTx = 1,
    /// Row inserted (payload: new row)
    InsertRow = 2,
    /// Row updated (payload: old row ∥ new row)
    UpdateRow = 3,
    /// Row deleted (payload: pre-image)
    DeleteRow = 4,
    /// Transaction committed
    CommitTx = 5,
    /// Transaction rolled back
    RollbackTx = 6,
    /// Checkpoint completed
    Checkpoint = 7,
}

impl RecordType {
    /// Decode from the on-disk byte
    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            1 => Ok(RecordType::BeginTx),
            2 => Ok(RecordType::InsertRow),
            3 => Ok(RecordType::UpdateRow),
            4 => Ok(RecordType::DeleteRow),
            5 => Ok(RecordType::CommitTx),
            6 => Ok(RecordType::RollbackTx),
            7 => Ok(RecordType::Checkpoint),
            other => Err(Error::invalid_wal_record(format!(
                "unknown record type {}",
                other
            ))),
        }
    }
}

/// A single framed WAL record
#[derive(Debug, Clone, PartialEq)]
pub struct WalRecord {
    /// Kind of record
    pub record_type: RecordType,
    /// Transaction the record belongs to
    pub tx_id: u64,
    /// Log sequence number, assigned by the writer
    pub lsn: u64,
    /// Affected row id (0 for transaction-boundary records)
    pub row_id: u64,
    /// Affected table ("" for transaction-boundary records)
    pub table_name: String,
    /// Payload bytes
    pub data: Vec<u8>,
}

impl WalRecord {
    /// Serialize the record with magic and CRC
    pub fn encode(&self) -> Vec<u8> {
        let mut framed = Vec::with_capacity(64 + self.table_name.len() + self.data.len());
        framed.push(self.record_type as u8);
        framed.extend_from_slice(&self.tx_id.to_le_bytes());
        framed.extend_from_slice(&self.lsn.to_le_bytes());
        framed.extend_from_slice(&self.row_id.to_le_bytes());
        framed.extend_from_slice(&(self.table_name.len() as u32).to_le_bytes());
        framed.extend_from_slice(self.table_name.as_bytes());
        framed.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        framed.extend_from_slice(&self.data);

        let checksum = crc32fast::hash(&framed);

        let mut out = Vec::with_capacity(framed.len() + 8);
        out.extend_from_slice(&RECORD_MAGIC);
        out.extend_from_slice(&framed);
        out.extend_from_slice(&checksum.to_le_bytes());
        out
    }

    /// Decode one record from `buf`
    ///
    /// Returns `Ok(None)` when the buffer ends mid-record (a torn tail write,
    /// expected after a crash) and `Err` when the bytes are present but fail
    /// validation (bad magic, bad type, CRC mismatch). Both cases stop
    /// recovery at the previous record.
    pub fn decode(buf: &[u8]) -> Result<Option<(WalRecord, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        if buf[0..4] != RECORD_MAGIC {
            return Err(Error::invalid_wal_record("bad record magic"));
        }

        // Fixed prefix after magic: type(1) + tx(8) + lsn(8) + row(8) + name_len(4)
        let fixed_end = 4 + 29;
        if buf.len() < fixed_end {
            return Ok(None);
        }
        let record_type_byte = buf[4];
        let tx_id = read_u64_at(buf, 5);
        let lsn = read_u64_at(buf, 13);
        let row_id = read_u64_at(buf, 21);
        let name_len = read_u32_at(buf, 29);
        if name_len > MAX_FIELD_LEN {
            return Err(Error::invalid_wal_record("implausible table name length"));
        }

        let name_end = fixed_end + name_len as usize;
        if buf.len() < name_end + 4 {
            return Ok(None);
        }
        let table_name = String::from_utf8(buf[fixed_end..name_end].to_vec())
            .map_err(|_| Error::invalid_wal_record("table name is not UTF-8"))?;

        let data_len = read_u32_at(buf, name_end);
        if data_len > MAX_FIELD_LEN {
            return Err(Error::invalid_wal_record("implausible payload length"));
        }
        let data_end = name_end + 4 + data_len as usize;
        if buf.len() < data_end + 4 {
            return Ok(None);
        }
        let data = buf[name_end + 4..data_end].to_vec();
        let stored_crc = read_u32_at(buf, data_end);

        let computed = crc32fast::hash(&buf[4..data_end]);
        if stored_crc != computed {
            return Err(Error::invalid_wal_record(format!(
                "CRC mismatch at lsn {}: stored {:#010x}, computed {:#010x}",
                lsn, stored_crc, computed
            )));
        }

        let record = WalRecord {
            record_type: RecordType::from_byte(record_type_byte)?,
            tx_id,
            lsn,
            row_id,
            table_name,
            data,
        };
        Ok(Some((record, data_end + 4)))
    }

    /// Payload for INSERT_ROW / DELETE_ROW records
    pub fn encode_row(row: &Row) -> Result<Vec<u8>> {
        Ok(bincode::serialize(row)?)
    }

    /// Decode an INSERT_ROW / DELETE_ROW payload
    pub fn decode_row(data: &[u8]) -> Result<Row> {
        Ok(bincode::deserialize(data)?)
    }

    /// Payload for UPDATE_ROW records: `u64 old_len ∥ old ∥ new`
    pub fn encode_update(old: &Row, new: &Row) -> Result<Vec<u8>> {
        let old_bytes = bincode::serialize(old)?;
        let new_bytes = bincode::serialize(new)?;
        let mut data = Vec::with_capacity(8 + old_bytes.len() + new_bytes.len());
        data.extend_from_slice(&(old_bytes.len() as u64).to_le_bytes());
        data.extend_from_slice(&old_bytes);
        data.extend_from_slice(&new_bytes);
        Ok(data)
    }

    /// Decode an UPDATE_ROW payload into (old, new)
    pub fn decode_update(data: &[u8]) -> Result<(Row, Row)> {
        if data.len() < 8 {
            return Err(Error::invalid_wal_record("update payload too short"));
        }
        let old_len = read_u64_at(data, 0) as usize;
        if data.len() < 8 + old_len {
            return Err(Error::invalid_wal_record("update payload truncated"));
        }
        let old: Row = bincode::deserialize(&data[8..8 + old_len])?;
        let new: Row = bincode::deserialize(&data[8 + old_len..])?;
        Ok((old, new))
    }
}

/// Read a little-endian u32 at `at`; the caller has bounds-checked the window
fn read_u32_at(buf: &[u8], at: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[at..at + 4]);
    u32::from_le_bytes(bytes)
}

/// Read a little-endian u64 at `at`; the caller has bounds-checked the window
fn read_u64_at(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::ColumnValue;

    fn sample_record() -> WalRecord {
        let row = Row::new(3, vec![("n".into(), ColumnValue::Int(1))]);
        WalRecord {
            record_type: RecordType::InsertRow,
            tx_id: 9,
            lsn: 4,
            row_id: 3,
            table_name: "users".into(),
            data: WalRecord::encode_row(&row).unwrap(),
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let record = sample_record();
        let bytes = record.encode();
        let (decoded, consumed) = WalRecord::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn truncated_tail_reads_as_none() {
        let bytes = sample_record().encode();
        for cut in [2, 10, bytes.len() - 1] {
            assert!(WalRecord::decode(&bytes[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn corrupted_payload_fails_crc() {
        let mut bytes = sample_record().encode();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        let err = WalRecord::decode(&bytes).unwrap_err();
        assert!(err.to_string().contains("CRC") || err.to_string().contains("record"));
    }

    #[test]
    fn bad_magic_is_an_error() {
        let mut bytes = sample_record().encode();
        bytes[0] = b'X';
        assert!(WalRecord::decode(&bytes).is_err());
    }

    #[test]
    fn record_type_bytes_are_stable() {
        assert_eq!(RecordType::BeginTx as u8, 1);
        assert_eq!(RecordType::InsertRow as u8, 2);
        assert_eq!(RecordType::UpdateRow as u8, 3);
        assert_eq!(RecordType::DeleteRow as u8, 4);
        assert_eq!(RecordType::CommitTx as u8, 5);
        assert_eq!(RecordType::RollbackTx as u8, 6);
        assert_eq!(RecordType::Checkpoint as u8, 7);
        assert!(RecordType::from_byte(8).is_err());
    }

    #[test]
    fn update_payload_roundtrip() {
        let old = Row::new(1, vec![("v".into(), ColumnValue::Int(1))]);
        let new = Row::new(1, vec![("v".into(), ColumnValue::Int(2))]);
        let data = WalRecord::encode_update(&old, &new).unwrap();
        let (old2, new2) = WalRecord::decode_update(&data).unwrap();
        assert_eq!(old, old2);
        assert_eq!(new, new2);
    }

    #[test]
    fn two_records_decode_in_sequence() {
        let a = sample_record();
        let mut b = sample_record();
        b.lsn = 5;
        b.record_type = RecordType::CommitTx;

        let mut bytes = a.encode();
        bytes.extend_from_slice(&b.encode());

        let (first, used) = WalRecord::decode(&bytes).unwrap().unwrap();
        let (second, _) = WalRecord::decode(&bytes[used..]).unwrap().unwrap();
        assert_eq!(first.lsn, 4);
        assert_eq!(second.lsn, 5);
        assert_eq!(second.record_type, RecordType::CommitTx);
    }
}
