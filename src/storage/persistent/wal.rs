//! Write-ahead log.
//!
//! Every mutation is appended as one record before it is applied in memory,
//! and the log is replayed on open. A completion writes its whole change set
//! as a single record, so after a crash either all of it replays or none of
//! it does.
//!
//! Compaction replaces the whole file with a single `Snapshot` record of the
//! current state. The new file is written beside the log and renamed over
//! it, so a crash leaves either the old log or the compacted one.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [RECORD 1: codec-framed WalEntry]
//! [RECORD 2: codec-framed WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Result as IoResult, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::entity::Entity;
use crate::operation::DeferredOperation;
use crate::storage::memory::StoreSnapshot;
use crate::storage::traits::ChangeSet;

use super::codec;

/// A single record in the write-ahead log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalEntry {
    /// Monotonically increasing sequence number.
    pub sequence: u64,
    /// When this record was written.
    pub timestamp: DateTime<Utc>,
    pub kind: WalEntryKind,
}

/// The mutation a record carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum WalEntryKind {
    Insert(Entity),
    Claim(DeferredOperation),
    Commit(ChangeSet),
    /// Complete state; everything before it is discarded.
    Snapshot(StoreSnapshot),
}

struct WalWriter {
    out: BufWriter<File>,
    sequence: u64,
}

/// Append-only log. Thread-safe via internal mutex.
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

impl WriteAheadLog {
    /// Open or create a log file.
    ///
    /// A record torn by a crash at the end of the file is cut off so new
    /// records never follow garbage. Damage anywhere else is an error.
    pub fn open(path: &Path, sync_on_write: bool) -> IoResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        let sequence = if len >= codec::HEADER_LEN {
            let (last_sequence, valid_len) = Self::scan(path)?;
            if valid_len < len {
                warn!(
                    path = %path.display(),
                    dropped_bytes = len - valid_len,
                    "WAL: dropping torn record at end of log"
                );
                file.set_len(valid_len)?;
                file.sync_all()?;
            }
            last_sequence
        } else {
            file.set_len(0)?;
            let mut file = &file;
            codec::write_header(&mut file)?;
            file.sync_all()?;
            0
        };

        let file = OpenOptions::new().append(true).open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                out: BufWriter::new(file),
                sequence,
            }),
            sync_on_write,
        })
    }

    /// Append a record, returning its sequence number.
    pub fn append(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "WAL lock poisoned"))?;

        let sequence = writer.sequence + 1;
        let entry = WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        writer.out.write_all(&encoded)?;
        writer.out.flush()?;
        if self.sync_on_write {
            writer.out.get_ref().sync_data()?;
        }

        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Replace the log with a single record, returning its sequence number.
    ///
    /// Sequence numbers keep increasing across rewrites.
    pub fn rewrite(&self, kind: WalEntryKind) -> IoResult<u64> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| std::io::Error::new(ErrorKind::Other, "WAL lock poisoned"))?;
        writer.out.flush()?;

        let sequence = writer.sequence + 1;
        let entry = WalEntry {
            sequence,
            timestamp: Utc::now(),
            kind,
        };
        let encoded = codec::encode(&entry)?;

        let staging = self.path.with_extension("compact");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&staging)?;
            codec::write_header(&mut file)?;
            file.write_all(&encoded)?;
            file.sync_all()?;
        }
        std::fs::rename(&staging, &self.path)?;

        let file = OpenOptions::new().append(true).open(&self.path)?;
        writer.out = BufWriter::new(file);
        writer.sequence = sequence;
        Ok(sequence)
    }

    /// Iterate over all records. Used during recovery.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    /// Sequence number of the last appended record.
    pub fn current_sequence(&self) -> u64 {
        self.writer.lock().map(|w| w.sequence).unwrap_or(0)
    }

    /// Log file size in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Returns the last good sequence and the byte length covering it.
    fn scan(path: &Path) -> IoResult<(u64, u64)> {
        let mut iter = WalIterator::new(path)?;
        let mut last_sequence = 0;
        let mut valid_len = iter.position()?;
        while let Some(entry) = iter.next() {
            last_sequence = entry?.sequence;
            valid_len = iter.position()?;
        }
        Ok((last_sequence, valid_len))
    }
}

/// Iterator over log records. Stops quietly at a torn tail record.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
