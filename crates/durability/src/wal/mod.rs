//! Write-ahead log: record framing, single-writer appends, prefix reads
//!
//! The WAL is an append-only sequence of fixed-framed records in numbered
//! segment files `wal.NNNNNN` inside the WAL directory. Segment names sort
//! lexicographically by segment number; a segment rolls once it exceeds the
//! configured size.

pub mod reader;
pub mod record;
pub mod writer;

use std::path::{Path, PathBuf};

/// Build the path of segment `number` inside `dir`
pub fn segment_path(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("wal.{:06}", number))
}

/// List existing segment files in `dir`, ascending by segment number
pub fn list_segments(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut segments = Vec::new();
    if !dir.exists() {
        return Ok(segments);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with("wal.") && name[4..].chars().all(|c| c.is_ascii_digit()) {
            segments.push(entry.path());
        }
    }
    segments.sort();
    Ok(segments)
}
