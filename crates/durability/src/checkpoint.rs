//! Checkpoint files
//!
//! A checkpoint dumps the full in-memory state out of band from the WAL to
//! bound recovery time:
//! - `<table>.zvdb`: schema plus every version of every chain, newest
//!   first, preserving (xmin, xmax) headers
//! - `vectors_<D>.hnsw`: one graph dump per embedding dimension
//!
//! Every file opens with a magic and a version word. Table format v3 carries
//! version chains; the older v2 carried bare rows, and the v3 loader accepts
//! it by materializing each row as a single version with xmin = 0, xmax = 0
//! (committed forever via the frozen tx id).
//!
//! Table file layout (v3, little-endian):
//!
//! ```text
//! magic(4) version(4) name_len(4)+name schema_len(4)+schema next_id(8)
//! chain_count(8) { row_id(8) version_count(8)
//!                  { xmin(8) xmax(8) row_len(4)+row }* }*
//! ```
//!
//! v2 replaces the chain section with `row_count(8) { row_len(4)+row }*`.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{Error, Result, Row, TableSchema};
use tessera_index::{HnswConfig, HnswIndex};
use tessera_storage::{RowVersion, Table};

/// Magic word opening every `.zvdb` checkpoint file: "ZVDB"
pub const CHECKPOINT_MAGIC: u32 = 0x5A564442;
/// Table format with bare rows (legacy)
pub const CHECKPOINT_VERSION_V2: u32 = 2;
/// Table format with version chains and headers (current)
pub const CHECKPOINT_VERSION_V3: u32 = 3;

/// Magic word opening every `.hnsw` vector dump: "TVEC"
pub const HNSW_MAGIC: u32 = 0x54564543;
/// Current vector dump format
pub const HNSW_VERSION: u32 = 1;

/// Path of a table's checkpoint file inside `data_dir`
pub fn table_file_path(data_dir: &Path, table: &str) -> PathBuf {
    data_dir.join(format!("{}.zvdb", table))
}

/// Path of the vector dump for dimension `d` inside `data_dir`
pub fn hnsw_file_path(data_dir: &Path, dimension: usize) -> PathBuf {
    data_dir.join(format!("vectors_{}.hnsw", dimension))
}

/// Dump a table, chains and headers included, as format v3
pub fn save_table(data_dir: &Path, table: &Table) -> Result<()> {
    let path = table_file_path(data_dir, &table.name);
    let mut w = BufWriter::new(File::create(&path)?);

    w.write_u32::<LittleEndian>(CHECKPOINT_MAGIC)?;
    w.write_u32::<LittleEndian>(CHECKPOINT_VERSION_V3)?;
    write_bytes(&mut w, table.name.as_bytes())?;
    write_bytes(&mut w, &bincode::serialize(&table.schema)?)?;
    w.write_u64::<LittleEndian>(table.next_id())?;

    let chains = table.chains();
    w.write_u64::<LittleEndian>(chains.len() as u64)?;
    for (row_id, head) in chains {
        w.write_u64::<LittleEndian>(row_id)?;

        let mut versions: Vec<&RowVersion> = Vec::new();
        let mut cursor: Option<&RowVersion> = Some(head.as_ref());
        while let Some(version) = cursor {
            versions.push(version);
            cursor = version.next.as_deref();
        }

        w.write_u64::<LittleEndian>(versions.len() as u64)?;
        for version in versions {
            w.write_u64::<LittleEndian>(version.xmin)?;
            w.write_u64::<LittleEndian>(version.xmax())?;
            write_bytes(&mut w, &bincode::serialize(&version.data)?)?;
        }
    }
    w.flush()?;
    Ok(())
}

/// Load a table checkpoint, accepting both v3 and legacy v2
pub fn load_table(path: &Path) -> Result<Table> {
    let mut r = BufReader::new(File::open(path)?);

    let magic = r.read_u32::<LittleEndian>()?;
    if magic != CHECKPOINT_MAGIC {
        return Err(Error::corruption(format!(
            "bad checkpoint magic {:#010x} in {}",
            magic,
            path.display()
        )));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version > CHECKPOINT_VERSION_V3 {
        return Err(Error::corruption(format!(
            "checkpoint version {} in {} is newer than supported {}",
            version,
            path.display(),
            CHECKPOINT_VERSION_V3
        )));
    }

    let name = String::from_utf8(read_bytes(&mut r)?)
        .map_err(|_| Error::corruption("table name is not UTF-8"))?;
    let schema: TableSchema = bincode::deserialize(&read_bytes(&mut r)?)?;
    let table = Table::new(name, schema);

    match version {
        CHECKPOINT_VERSION_V3 => {
            let next_id = r.read_u64::<LittleEndian>()?;
            let chain_count = r.read_u64::<LittleEndian>()?;
            for _ in 0..chain_count {
                let row_id = r.read_u64::<LittleEndian>()?;
                let version_count = r.read_u64::<LittleEndian>()?;

                let mut versions = Vec::with_capacity(version_count as usize);
                for _ in 0..version_count {
                    let xmin = r.read_u64::<LittleEndian>()?;
                    let xmax = r.read_u64::<LittleEndian>()?;
                    let row: Row = bincode::deserialize(&read_bytes(&mut r)?)?;
                    versions.push((xmin, xmax, row));
                }

                // Stored newest-first; rebuild the links oldest-up.
                let mut head: Option<Arc<RowVersion>> = None;
                for (xmin, xmax, row) in versions.into_iter().rev() {
                    head = Some(Arc::new(RowVersion::with_header(
                        xmin,
                        xmax,
                        head.take(),
                        row,
                    )));
                }
                if let Some(head) = head {
                    table.install_chain(row_id, head);
                }
            }
            table.advance_next_id(next_id);
        }
        CHECKPOINT_VERSION_V2 => {
            // Legacy rows become single frozen versions, committed forever.
            let row_count = r.read_u64::<LittleEndian>()?;
            for _ in 0..row_count {
                let row: Row = bincode::deserialize(&read_bytes(&mut r)?)?;
                let row_id = row.id;
                table.install_chain(row_id, Arc::new(RowVersion::with_header(0, 0, None, row)));
            }
        }
        _ => unreachable!("version bounds checked above"),
    }

    Ok(table)
}

/// Dump an HNSW graph as `vectors_<D>.hnsw`
pub fn save_hnsw(data_dir: &Path, index: &HnswIndex) -> Result<()> {
    let path = hnsw_file_path(data_dir, index.dimension());
    let mut w = BufWriter::new(File::create(&path)?);
    w.write_u32::<LittleEndian>(HNSW_MAGIC)?;
    w.write_u32::<LittleEndian>(HNSW_VERSION)?;
    w.write_u64::<LittleEndian>(index.dimension() as u64)?;
    let graph = index.to_bytes();
    w.write_u64::<LittleEndian>(graph.len() as u64)?;
    w.write_all(&graph)?;
    w.flush()?;
    Ok(())
}

/// Load an HNSW dump, enforcing the expected dimension when given
///
/// A dump whose recorded dimension contradicts `expected_dimension` (a
/// table's declared embedding width) is fatal corruption.
pub fn load_hnsw(
    path: &Path,
    expected_dimension: Option<usize>,
    config: HnswConfig,
) -> Result<HnswIndex> {
    let mut r = BufReader::new(File::open(path)?);

    let magic = r.read_u32::<LittleEndian>()?;
    if magic != HNSW_MAGIC {
        return Err(Error::corruption(format!(
            "bad vector dump magic {:#010x} in {}",
            magic,
            path.display()
        )));
    }
    let version = r.read_u32::<LittleEndian>()?;
    if version > HNSW_VERSION {
        return Err(Error::corruption(format!(
            "vector dump version {} is newer than supported {}",
            version, HNSW_VERSION
        )));
    }

    let dimension = r.read_u64::<LittleEndian>()? as usize;
    if let Some(expected) = expected_dimension {
        if dimension != expected {
            return Err(Error::corruption(format!(
                "vector dump {} has dimension {} but the schema declares {}",
                path.display(),
                dimension,
                expected
            )));
        }
    }

    let graph_len = r.read_u64::<LittleEndian>()? as usize;
    let mut graph = vec![0u8; graph_len];
    r.read_exact(&mut graph)?;
    HnswIndex::from_bytes(dimension, config, &graph)
}

fn write_bytes<W: Write>(w: &mut W, bytes: &[u8]) -> Result<()> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)?;
    Ok(())
}

fn read_bytes<R: Read>(r: &mut R) -> Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;
    use tessera_core::{Column, ColumnType, ColumnValue};
    use tessera_storage::Snapshot;

    struct AlwaysCommitted;
    impl tessera_storage::CommitStatus for AlwaysCommitted {
        fn is_committed(&self, _tx_id: u64) -> bool {
            true
        }

        fn is_aborted(&self, _tx_id: u64) -> bool {
            false
        }
    }

    fn sample_table() -> Table {
        let table = Table::new(
            "users",
            TableSchema::new(vec![
                Column::new("name", ColumnType::Text),
                Column::new("age", ColumnType::Int),
            ]),
        );
        let snap = Snapshot::unbounded();
        let clog = AlwaysCommitted;
        table
            .insert(
                vec![
                    ("name".into(), ColumnValue::Text("alice".into())),
                    ("age".into(), ColumnValue::Int(30)),
                ],
                1,
            )
            .unwrap();
        table
            .insert(
                vec![
                    ("name".into(), ColumnValue::Text("bob".into())),
                    ("age".into(), ColumnValue::Int(25)),
                ],
                1,
            )
            .unwrap();
        table
            .update(1, &[("age".into(), ColumnValue::Int(31))], 2, &snap, &clog)
            .unwrap();
        table
    }

    #[test]
    fn v3_roundtrip_preserves_chains_and_headers() {
        let dir = TempDir::new().unwrap();
        let table = sample_table();
        save_table(dir.path(), &table).unwrap();

        let loaded = load_table(&table_file_path(dir.path(), "users")).unwrap();
        assert_eq!(loaded.name, "users");
        assert_eq!(loaded.schema, table.schema);
        assert_eq!(loaded.next_id(), table.next_id());
        assert_eq!(loaded.chain_count(), 2);

        let head = loaded.head(1).unwrap();
        assert_eq!(head.chain_len(), 2);
        assert_eq!(head.xmin, 2);
        assert_eq!(head.xmax(), 0);
        let older = head.next.as_ref().unwrap();
        assert_eq!(older.xmin, 1);
        assert_eq!(older.xmax(), 2);
        assert_eq!(
            head.data.get("age"),
            Some(&ColumnValue::Int(31))
        );
    }

    #[test]
    fn v2_file_loads_as_frozen_single_versions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.zvdb");

        let schema = TableSchema::new(vec![Column::new("n", ColumnType::Int)]);
        let rows = vec![
            Row::new(1, vec![("n".into(), ColumnValue::Int(10))]),
            Row::new(2, vec![("n".into(), ColumnValue::Int(20))]),
        ];
        {
            let mut w = BufWriter::new(File::create(&path).unwrap());
            w.write_u32::<LittleEndian>(CHECKPOINT_MAGIC).unwrap();
            w.write_u32::<LittleEndian>(CHECKPOINT_VERSION_V2).unwrap();
            write_bytes(&mut w, b"legacy").unwrap();
            write_bytes(&mut w, &bincode::serialize(&schema).unwrap()).unwrap();
            w.write_u64::<LittleEndian>(rows.len() as u64).unwrap();
            for row in &rows {
                write_bytes(&mut w, &bincode::serialize(row).unwrap()).unwrap();
            }
        }

        let table = load_table(&path).unwrap();
        assert_eq!(table.chain_count(), 2);
        assert_eq!(table.next_id(), 3);
        for row_id in [1u64, 2] {
            let head = table.head(row_id).unwrap();
            assert_eq!(head.chain_len(), 1);
            assert_eq!(head.xmin, 0);
            assert_eq!(head.xmax(), 0);
        }
        // Frozen versions are visible to any fresh snapshot.
        let snap = Snapshot::new(1, 1, HashSet::new());
        assert!(table.get(1, 1, &snap, &AlwaysCommitted).is_some());
    }

    #[test]
    fn wrong_magic_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.zvdb");
        std::fs::write(&path, b"garbage file contents here").unwrap();
        let err = load_table(&path).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn future_version_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.zvdb");
        let mut w = BufWriter::new(File::create(&path).unwrap());
        w.write_u32::<LittleEndian>(CHECKPOINT_MAGIC).unwrap();
        w.write_u32::<LittleEndian>(99).unwrap();
        w.flush().unwrap();
        drop(w);

        let err = load_table(&path).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("99"));
    }

    #[test]
    fn hnsw_roundtrip() {
        let dir = TempDir::new().unwrap();
        let mut index = HnswIndex::new(3, HnswConfig::default());
        for id in 1..=10u64 {
            let f = id as f32;
            index.insert(&[f, 0.5, -f], id).unwrap();
        }
        save_hnsw(dir.path(), &index).unwrap();

        let path = hnsw_file_path(dir.path(), 3);
        let loaded = load_hnsw(&path, Some(3), HnswConfig::default()).unwrap();
        assert_eq!(loaded.len(), 10);
        assert_eq!(
            index.search(&[2.0, 0.5, -2.0], 3),
            loaded.search(&[2.0, 0.5, -2.0], 3)
        );
    }

    #[test]
    fn hnsw_dimension_contradiction_is_fatal() {
        let dir = TempDir::new().unwrap();
        let mut index = HnswIndex::new(3, HnswConfig::default());
        index.insert(&[1.0, 2.0, 3.0], 1).unwrap();
        save_hnsw(dir.path(), &index).unwrap();

        let path = hnsw_file_path(dir.path(), 3);
        let err = load_hnsw(&path, Some(4), HnswConfig::default()).unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("dimension"));
    }
}
