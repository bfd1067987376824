//! Chunked, crash-recoverable write-ahead log for a single resolver stream.
//!
//! A WAL directory holds paired files per chunk: `<k>.txdata` holds a
//! concatenation of variable-length application-encoded records, and
//! `<k>.txindex` holds one little-endian `u64` per record giving the byte
//! offset one past the end of that record within the data file. Entries are
//! msgpack-encoded (`rmp_serde`). A single mutex serializes append, read-all
//! and close; append blocks until both files are fsynced.

use diego_base::{err, fatal, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{
    collections::BTreeSet,
    fs::{self, File, OpenOptions},
    io::{BufReader, Read, Seek, SeekFrom, Write},
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::{debug, warn};

const DATA_EXTENSION: &str = "txdata";
const INDEX_EXTENSION: &str = "txindex";

// Records a single chunk may hold before a new chunk pair is opened.
pub const MAX_CHUNK_LENGTH: i64 = 1000;

// Width, in bytes, of one index-file entry.
const LONG_LENGTH: i64 = 8;

const EXPECTED_INDEX_FILE_LENGTH: i64 = MAX_CHUNK_LENGTH * LONG_LENGTH;

// Exceeding this aborts the process rather than silently truncating the
// record.
pub const MAX_DATA_ENTRY_LENGTH: usize = 1 << 20;

struct Inner {
    base_path: PathBuf,
    // min_chunk * MAX_CHUNK_LENGTH - 1: the last record id considered
    // cleared. Nothing acts on this yet; retained as an accounting value
    // computed on every load.
    cleared_index: i64,
    current_chunk_entry_count: i64,
    current_data_length: i64,
    newest_file_index: i64,
    newest_data_file: File,
    newest_index_file: File,
    closed: bool,
}

pub struct Wal<T> {
    inner: Mutex<Inner>,
    _marker: PhantomData<T>,
}

fn make_path(base: &Path, index: i64, ext: &str) -> PathBuf {
    base.join(format!("{index}.{ext}"))
}

fn parse_chunk_filename(name: &str) -> Option<(i64, &'static str)> {
    let (stem, ext) = name.rsplit_once('.')?;
    let index: i64 = stem.parse().ok()?;
    if index < 0 {
        return None;
    }
    match ext {
        DATA_EXTENSION => Some((index, DATA_EXTENSION)),
        INDEX_EXTENSION => Some((index, INDEX_EXTENSION)),
        _ => None,
    }
}

impl Inner {
    fn read_offset_at(&mut self, entry: i64) -> Result<i64> {
        if entry == 0 {
            return Ok(0);
        }
        let mut buf = [0u8; LONG_LENGTH as usize];
        self.newest_index_file
            .seek(SeekFrom::Start(((entry - 1) * LONG_LENGTH) as u64))?;
        self.newest_index_file.read_exact(&mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    fn create_next_files(&mut self) -> Result<()> {
        self.newest_file_index += 1;
        self.current_chunk_entry_count = 0;
        self.current_data_length = 0;

        self.newest_index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(make_path(&self.base_path, self.newest_file_index, INDEX_EXTENSION))?;
        self.newest_data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(make_path(&self.base_path, self.newest_file_index, DATA_EXTENSION))?;
        debug!(target: "diego", chunk = self.newest_file_index, "opened new wal chunk");
        Ok(())
    }

    fn append_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if self.current_chunk_entry_count == MAX_CHUNK_LENGTH {
            self.create_next_files()?;
        }

        self.newest_data_file.seek(SeekFrom::End(0))?;
        self.newest_data_file.write_all(bytes)?;
        self.current_data_length += bytes.len() as i64;

        self.newest_index_file.seek(SeekFrom::End(0))?;
        self.newest_index_file
            .write_all(&self.current_data_length.to_le_bytes())?;

        self.newest_data_file.sync_all()?;
        self.newest_index_file.sync_all()?;

        self.current_chunk_entry_count += 1;
        Ok(())
    }

    #[cfg(test)]
    fn assert_valid(&mut self) {
        let data_len = self.newest_data_file.metadata().expect("stat data file").len() as i64;
        diego_base::invariant!(
            self.current_data_length == data_len,
            "wal data length {} != on-disk length {}",
            self.current_data_length,
            data_len
        );

        let index_len = self.newest_index_file.metadata().expect("stat index file").len() as i64;
        let entries = index_len / LONG_LENGTH;
        diego_base::invariant!(
            self.current_chunk_entry_count == entries,
            "wal chunk entry count {} != index entries {}",
            self.current_chunk_entry_count,
            entries
        );
        diego_base::invariant!(
            self.current_chunk_entry_count <= MAX_CHUNK_LENGTH,
            "wal chunk entry count {} exceeds max chunk length",
            self.current_chunk_entry_count
        );

        let offset = self
            .read_offset_at(entries)
            .expect("read last wal index offset");
        diego_base::invariant!(
            self.current_data_length == offset,
            "wal data length {} != last index offset {}",
            self.current_data_length,
            offset
        );
    }
}

impl<T: Serialize + DeserializeOwned + Send> Wal<T> {
    // Creates the WAL directory if absent, scans for existing chunk pairs,
    // and recovers from any crash-time torn write. Does not replay records
    // — call `read_all` explicitly for that.
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;

        let mut data_chunks = BTreeSet::new();
        let mut index_chunks = BTreeSet::new();
        for entry in fs::read_dir(&base_path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_str().ok_or_else(|| err("non-utf8 wal file name"))?;
            match parse_chunk_filename(name) {
                Some((index, DATA_EXTENSION)) => {
                    data_chunks.insert(index);
                }
                Some((index, INDEX_EXTENSION)) => {
                    index_chunks.insert(index);
                }
                _ => return Err(err(format!("unexpected file {name} in wal directory"))),
            }
        }

        for k in &data_chunks {
            if !index_chunks.contains(k) {
                return Err(err(format!("wal data chunk {k} missing its index file")));
            }
        }
        for k in &index_chunks {
            if !data_chunks.contains(k) {
                return Err(err(format!("wal index chunk {k} missing its data file")));
            }
        }

        if data_chunks.is_empty() {
            let newest_index_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(make_path(&base_path, 0, INDEX_EXTENSION))?;
            let newest_data_file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(make_path(&base_path, 0, DATA_EXTENSION))?;
            let inner = Inner {
                base_path,
                cleared_index: -1,
                current_chunk_entry_count: 0,
                current_data_length: 0,
                newest_file_index: 0,
                newest_data_file,
                newest_index_file,
                closed: false,
            };
            return Ok(Self {
                inner: Mutex::new(inner),
                _marker: PhantomData,
            });
        }

        let min_index = *data_chunks.iter().next().unwrap();
        let max_index = *data_chunks.iter().next_back().unwrap();
        let cleared_index = min_index * MAX_CHUNK_LENGTH - 1;

        let mut newest_index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(make_path(&base_path, max_index, INDEX_EXTENSION))?;
        let mut newest_data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(make_path(&base_path, max_index, DATA_EXTENSION))?;

        let index_len = newest_index_file.metadata()?.len() as i64;

        if index_len == EXPECTED_INDEX_FILE_LENGTH {
            let mut inner = Inner {
                base_path,
                cleared_index,
                current_chunk_entry_count: MAX_CHUNK_LENGTH,
                current_data_length: newest_data_file.metadata()?.len() as i64,
                newest_file_index: max_index,
                newest_data_file,
                newest_index_file,
                closed: false,
            };
            inner.create_next_files()?;
            return Ok(Self {
                inner: Mutex::new(inner),
                _marker: PhantomData,
            });
        }

        // Recover from a torn write: round the index down to a whole
        // number of entries, then truncate the data file to the offset
        // that last complete entry records.
        let whole_entries = index_len / LONG_LENGTH;
        let recovered_index_len = whole_entries * LONG_LENGTH;
        if recovered_index_len != index_len {
            warn!(
                target: "diego",
                chunk = max_index,
                index_len,
                recovered_index_len,
                "truncating torn wal index tail on recovery"
            );
            newest_index_file.set_len(recovered_index_len as u64)?;
        }

        let expected_data_length = if whole_entries == 0 {
            0
        } else {
            let mut buf = [0u8; LONG_LENGTH as usize];
            newest_index_file.seek(SeekFrom::Start(((whole_entries - 1) * LONG_LENGTH) as u64))?;
            newest_index_file.read_exact(&mut buf)?;
            i64::from_le_bytes(buf)
        };

        let actual_data_length = newest_data_file.metadata()?.len() as i64;
        if actual_data_length > expected_data_length {
            warn!(
                target: "diego",
                chunk = max_index,
                actual_data_length,
                expected_data_length,
                "truncating torn wal data tail on recovery"
            );
            newest_data_file.set_len(expected_data_length as u64)?;
        } else if actual_data_length < expected_data_length {
            return Err(err(format!(
                "wal data file {max_index} is shorter ({actual_data_length}) than its index demands ({expected_data_length})"
            )));
        }

        let inner = Inner {
            base_path,
            cleared_index,
            current_chunk_entry_count: whole_entries,
            current_data_length: expected_data_length,
            newest_file_index: max_index,
            newest_data_file,
            newest_index_file,
            closed: false,
        };

        Ok(Self {
            inner: Mutex::new(inner),
            _marker: PhantomData,
        })
    }

    // Always -1 today: the WAL never garbage-collects. Exposed for
    // forward compatibility.
    pub fn cleared_index(&self) -> i64 {
        self.inner.lock().unwrap().cleared_index
    }

    pub fn append(&self, t: &T) -> Result<()> {
        let bytes = rmp_serde::to_vec(t)?;
        self.append_encoded(&bytes)
    }

    fn append_encoded(&self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_DATA_ENTRY_LENGTH {
            fatal(format!(
                "wal record of {} bytes exceeds max entry length {}",
                bytes.len(),
                MAX_DATA_ENTRY_LENGTH
            ));
        }

        let mut inner = self.inner.lock().unwrap();
        diego_base::invariant!(!inner.closed, "append called on closed wal");
        inner.append_bytes(bytes)
    }

    // Expensive; intended for crash recovery only.
    pub fn read_all(&self, mut callback: impl FnMut(T)) -> Result<()> {
        let inner = self.inner.lock().unwrap();
        diego_base::invariant!(!inner.closed, "read_all called on closed wal");

        for k in 0..=inner.newest_file_index {
            let index_path = make_path(&inner.base_path, k, INDEX_EXTENSION);
            let data_path = make_path(&inner.base_path, k, DATA_EXTENSION);
            if !index_path.exists() {
                continue;
            }

            let index_file = File::open(&index_path)?;
            let index_len = index_file.metadata()?.len();
            diego_base::invariant!(
                index_len % LONG_LENGTH as u64 == 0,
                "wal index file {k} has non-integer entry count ({index_len} bytes)"
            );
            let entry_count = index_len / LONG_LENGTH as u64;

            let mut index_reader = BufReader::new(index_file);
            let mut offsets = Vec::with_capacity(entry_count as usize);
            let mut buf = [0u8; LONG_LENGTH as usize];
            for _ in 0..entry_count {
                index_reader.read_exact(&mut buf)?;
                offsets.push(i64::from_le_bytes(buf));
            }

            let mut data_file = File::open(&data_path)?;
            let mut prev_offset = 0i64;
            for offset in offsets {
                let len = (offset - prev_offset) as usize;
                let mut record = vec![0u8; len];
                data_file.read_exact(&mut record)?;
                let t: T = rmp_serde::from_slice(&record)
                    .map_err(|e| err(format!("corrupt wal record in chunk {k}: {e}")))?;
                callback(t);
                prev_offset = offset;
            }
        }
        Ok(())
    }

    // Idempotent; any other call on a closed WAL is a fatal invariant
    // violation.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.closed {
            return;
        }
        inner.closed = true;
    }
}
