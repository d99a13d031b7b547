//! Durable relation index backed by an append-only relation log.
//!
//! On-disk record format:
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized RelationRecord)]
//! ```
//!
//! Only new edges are appended, so the log holds each edge once. On open the
//! log is replayed front-to-back into memory. A record failing its CRC is
//! skipped. A bad record with less than one full frame after it is a torn
//! write from a crash and is cut off so later appends start on a clean
//! boundary; anywhere else it fails the open with [`IndexError::CorruptLog`]
//! rather than discarding the intact records behind it.
//!
//! A failed append rolls the file back to the end of the last good record
//! before the next append, so an edge reported as not linked never reappears
//! on replay.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use cairn_types::ObjectHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{IndexError, IndexResult};
use crate::memory::RelationTable;
use crate::traits::{Children, RelationIndex};

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Encoded size of a [`RelationRecord`]: two raw 32-byte digests.
const PAYLOAD_SIZE: usize = 64;

/// Size of one complete record on disk.
const FRAME_SIZE: u64 = (HEADER_SIZE + PAYLOAD_SIZE) as u64;

/// Flush/sync strategy for the relation log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every appended edge.
    EveryWrite,
    /// Flush to the OS after every edge and rely on its page cache.
    #[default]
    OsDefault,
}

#[derive(Debug, Serialize, Deserialize)]
struct RelationRecord {
    parent: [u8; 32],
    child: [u8; 32],
}

struct LogWriter {
    writer: BufWriter<File>,
    /// End of the last record known to be fully written.
    offset: u64,
    /// A write failed and the file may hold bytes past `offset`.
    dirty: bool,
}

impl LogWriter {
    fn write_frame(&mut self, frame: &[u8], sync_mode: SyncMode) -> io::Result<()> {
        self.writer.write_all(frame)?;
        self.writer.flush()?;
        if sync_mode == SyncMode::EveryWrite {
            self.writer.get_ref().sync_data()?;
        }
        self.offset += frame.len() as u64;
        Ok(())
    }

    /// Discard buffered bytes and cut the file back to `offset`.
    fn rollback(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        let stale = std::mem::replace(&mut self.writer, BufWriter::new(file));
        // `into_parts` hands back the buffer without flushing it.
        let (_, _unwritten) = stale.into_parts();
        let file = self.writer.get_mut();
        file.set_len(self.offset)?;
        file.seek(SeekFrom::Start(self.offset))?;
        self.dirty = false;
        Ok(())
    }
}

/// A [`RelationIndex`] that survives restarts.
pub struct LogRelationIndex {
    path: PathBuf,
    table: RelationTable,
    writer: Mutex<LogWriter>,
    sync_mode: SyncMode,
}

impl LogRelationIndex {
    /// Open (or create) the relation log at `path` and replay it.
    pub fn open(path: &Path, sync_mode: SyncMode) -> IndexResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let table = RelationTable::default();
        let valid_len = if path.exists() {
            replay(path, &table)?
        } else {
            0
        };

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if file.metadata()?.len() > valid_len {
            warn!(path = %path.display(), valid_len, "cutting torn tail off relation log");
            file.set_len(valid_len)?;
        }
        let mut writer = BufWriter::new(file);
        writer.seek(SeekFrom::Start(valid_len))?;

        Ok(Self {
            path: path.to_path_buf(),
            table,
            writer: Mutex::new(LogWriter {
                writer,
                offset: valid_len,
                dirty: false,
            }),
            sync_mode,
        })
    }

    /// Path to the relation log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes of valid log data written so far.
    pub fn offset(&self) -> IndexResult<u64> {
        let w = self.writer.lock().map_err(|e| IndexError::Poisoned(e.to_string()))?;
        Ok(w.offset)
    }

    fn append(&self, parent: &ObjectHash, child: &ObjectHash) -> IndexResult<()> {
        let record = RelationRecord {
            parent: *parent.as_bytes(),
            child: *child.as_bytes(),
        };
        let payload =
            bincode::serialize(&record).map_err(|e| IndexError::Serialization(e.to_string()))?;
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        frame.extend_from_slice(&payload);

        let mut w = self.writer.lock().map_err(|e| IndexError::Poisoned(e.to_string()))?;
        if w.dirty {
            w.rollback()?;
        }
        if let Err(e) = w.write_frame(&frame, self.sync_mode) {
            w.dirty = true;
            if let Err(reset) = w.rollback() {
                warn!(offset = w.offset, error = %reset, "relation log rollback failed");
            }
            return Err(e.into());
        }

        debug!(%parent, %child, offset = w.offset, "relation appended");
        Ok(())
    }
}

/// Replay every valid record into `table`. Returns the length of the valid
/// prefix of the log.
fn replay(path: &Path, table: &RelationTable) -> IndexResult<u64> {
    let mut file = BufReader::new(File::open(path)?);
    let file_len = file.get_ref().metadata()?.len();
    let mut offset: u64 = 0;
    let mut edges = 0usize;

    while offset + HEADER_SIZE as u64 <= file_len {
        let mut header = [0u8; HEADER_SIZE];
        file.read_exact(&mut header)?;
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if length == 0 || offset + HEADER_SIZE as u64 + length as u64 > file_len {
            if file_len - offset < FRAME_SIZE {
                warn!(offset, length, file_len, "torn relation record at end of log");
                return Ok(offset);
            }
            return Err(IndexError::CorruptLog {
                offset,
                reason: format!(
                    "invalid record length {length} with {} bytes following",
                    file_len - offset
                ),
            });
        }

        let mut payload = vec![0u8; length as usize];
        file.read_exact(&mut payload)?;
        offset += HEADER_SIZE as u64 + length as u64;

        let actual_crc = crc32fast::hash(&payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping relation");
            continue;
        }

        match bincode::deserialize::<RelationRecord>(&payload) {
            Ok(record) => {
                let parent = ObjectHash::from_digest(record.parent);
                let child = ObjectHash::from_digest(record.child);
                if table.link_with(&parent, &child, || Ok(()))? {
                    edges += 1;
                }
            }
            Err(e) => warn!(offset, error = %e, "undecodable relation record; skipping"),
        }
    }

    debug!(edges, path = %path.display(), "relation log replayed");
    Ok(offset)
}

impl RelationIndex for LogRelationIndex {
    fn link(&self, parent: &ObjectHash, child: &ObjectHash) -> IndexResult<bool> {
        self.table
            .link_with(parent, child, || self.append(parent, child))
    }

    fn children(&self, parent: &ObjectHash) -> IndexResult<Children> {
        self.table.children(parent)
    }

    fn parents(&self) -> IndexResult<Vec<ObjectHash>> {
        self.table.parents()
    }
}

impl std::fmt::Debug for LogRelationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRelationIndex")
            .field("path", &self.path)
            .field("sync_mode", &self.sync_mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn h(byte: u8) -> ObjectHash {
        ObjectHash::from_digest([byte; 32])
    }

    #[test]
    fn links_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        {
            let index = LogRelationIndex::open(&path, SyncMode::EveryWrite).unwrap();
            index.link(&h(1), &h(2)).unwrap();
            index.link(&h(1), &h(3)).unwrap();
            index.link(&h(4), &h(1)).unwrap();
        }
        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(2), h(3)]);
        assert_eq!(index.children(&h(4)).unwrap().collect::<Vec<_>>(), vec![h(1)]);
    }

    #[test]
    fn duplicate_link_is_not_appended() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();

        assert!(index.link(&h(1), &h(2)).unwrap());
        let after_first = index.offset().unwrap();
        assert!(!index.link(&h(1), &h(2)).unwrap());
        assert_eq!(index.offset().unwrap(), after_first);
    }

    #[test]
    fn torn_tail_is_cut_and_appends_continue() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        let full_len = {
            let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
            index.link(&h(1), &h(2)).unwrap();
            index.link(&h(1), &h(3)).unwrap();
            index.offset().unwrap()
        };
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            file.set_len(full_len - 4).unwrap();
        }

        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(2)]);
        index.link(&h(1), &h(5)).unwrap();
        drop(index);

        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(2), h(5)]);
    }

    #[test]
    fn crc_mismatch_skips_only_that_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        {
            let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
            index.link(&h(1), &h(2)).unwrap();
            index.link(&h(1), &h(3)).unwrap();
        }
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut buf = [0u8; 1];
            file.read_exact(&mut buf).unwrap();
            buf[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&buf).unwrap();
        }
        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(3)]);
    }

    #[test]
    fn record_payload_has_fixed_size() {
        let payload = bincode::serialize(&RelationRecord {
            parent: [1; 32],
            child: [2; 32],
        })
        .unwrap();
        assert_eq!(payload.len(), PAYLOAD_SIZE);
    }

    #[test]
    fn corrupt_length_mid_log_fails_open_and_keeps_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        let full_len = {
            let index = LogRelationIndex::open(&path, SyncMode::EveryWrite).unwrap();
            index.link(&h(1), &h(2)).unwrap();
            index.link(&h(1), &h(3)).unwrap();
            index.link(&h(1), &h(4)).unwrap();
            index.offset().unwrap()
        };
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(FRAME_SIZE)).unwrap();
            file.write_all(&0u32.to_le_bytes()).unwrap();
        }

        let err = LogRelationIndex::open(&path, SyncMode::default()).unwrap_err();
        assert!(matches!(err, IndexError::CorruptLog { offset, .. } if offset == FRAME_SIZE));
        assert_eq!(fs::metadata(&path).unwrap().len(), full_len);
    }

    #[test]
    fn oversized_length_mid_log_is_not_taken_for_torn_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        {
            let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
            index.link(&h(1), &h(2)).unwrap();
            index.link(&h(1), &h(3)).unwrap();
        }
        {
            let mut file = OpenOptions::new().write(true).open(&path).unwrap();
            file.write_all(&u32::MAX.to_le_bytes()).unwrap();
        }
        assert!(matches!(
            LogRelationIndex::open(&path, SyncMode::default()),
            Err(IndexError::CorruptLog { offset: 0, .. })
        ));
    }

    #[test]
    fn failed_append_is_rolled_back_before_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        let index = LogRelationIndex::open(&path, SyncMode::EveryWrite).unwrap();
        index.link(&h(1), &h(2)).unwrap();
        let good = index.offset().unwrap();

        // Writes through a read-only handle fail, and so does the rollback.
        index.writer.lock().unwrap().writer = BufWriter::new(File::open(&path).unwrap());
        assert!(index.link(&h(1), &h(3)).is_err());
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(2)]);
        assert_eq!(index.offset().unwrap(), good);

        // Part of the failed record reached the file; the next append must
        // cut it off and write at the last good offset.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0xAB; 40]).unwrap();
        }
        index.writer.lock().unwrap().writer =
            BufWriter::new(OpenOptions::new().write(true).open(&path).unwrap());
        assert!(index.link(&h(1), &h(4)).unwrap());
        assert_eq!(fs::metadata(&path).unwrap().len(), index.offset().unwrap());
        drop(index);

        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(2), h(4)]);
        assert_eq!(index.offset().unwrap(), 2 * FRAME_SIZE);
    }

    #[test]
    fn rollback_discards_partial_and_buffered_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relations.log");
        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        index.link(&h(1), &h(2)).unwrap();
        {
            let mut w = index.writer.lock().unwrap();
            w.writer.write_all(&[0xAB; 40]).unwrap();
            w.writer.flush().unwrap();
            w.writer.write_all(&[0xCD; 32]).unwrap();
            w.rollback().unwrap();
        }
        assert_eq!(fs::metadata(&path).unwrap().len(), FRAME_SIZE);

        index.link(&h(1), &h(3)).unwrap();
        drop(index);
        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.children(&h(1)).unwrap().collect::<Vec<_>>(), vec![h(2), h(3)]);
    }

    #[test]
    fn empty_log_opens_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relations.log");
        let index = LogRelationIndex::open(&path, SyncMode::default()).unwrap();
        assert_eq!(index.offset().unwrap(), 0);
        assert!(index.parents().unwrap().is_empty());
        assert_eq!(index.path(), path.as_path());
    }
}
