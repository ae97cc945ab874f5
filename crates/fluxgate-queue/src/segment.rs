//! Segment files.
//!
//! A segment is an append-only file of length-prefixed records. Only the
//! head segment keeps its live payloads in memory; the others are tracked
//! by count and loaded when they become the head.

use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::queue::{Durability, QueueOptions};

/// Length value that marks a removal instead of a payload.
pub(crate) const REMOVAL: u32 = u32::MAX;

const EXTENSION: &str = "seg";

pub(crate) struct Segment {
    pub seq: u64,
    path: PathBuf,
    file: File,
    /// Encoded records not yet written to the file.
    pending: Vec<u8>,
    /// File length covered by records that were written and fsynced.
    synced_len: u64,
    /// Payload records in the file.
    pub appended: usize,
    /// Removal records in the file.
    pub removed: usize,
    /// Live payloads, oldest first. Only maintained while `loaded`.
    items: VecDeque<Vec<u8>>,
    loaded: bool,
    unsynced: usize,
}

impl Segment {
    pub fn path_for(dir: &Path, seq: u64) -> PathBuf {
        dir.join(format!("{seq:013}.{EXTENSION}"))
    }

    /// Segment sequence numbers present in `dir`, ascending.
    pub fn list(dir: &Path) -> io::Result<Vec<u64>> {
        let mut seqs = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(seq) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<u64>().ok())
            {
                seqs.push(seq);
            }
        }
        seqs.sort_unstable();
        Ok(seqs)
    }

    /// Create a new, empty segment file.
    pub fn create(dir: &Path, seq: u64, loaded: bool) -> io::Result<Self> {
        let path = Self::path_for(dir, seq);
        let file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            seq,
            path,
            file,
            pending: Vec::new(),
            synced_len: 0,
            appended: 0,
            removed: 0,
            items: VecDeque::new(),
            loaded,
            unsynced: 0,
        })
    }

    /// Open an existing segment, truncating a torn tail record.
    pub fn open(dir: &Path, seq: u64, load: bool) -> io::Result<Self> {
        let path = Self::path_for(dir, seq);
        let mut file = OpenOptions::new().read(true).append(true).open(&path)?;
        let scan = scan(&mut file, load)?;
        if scan.valid_len < scan.file_len {
            warn!(
                path = %path.display(),
                kept = scan.valid_len,
                dropped = scan.file_len - scan.valid_len,
                "truncating torn segment tail"
            );
            file.set_len(scan.valid_len)?;
            file.sync_data()?;
        }
        Ok(Self {
            seq,
            path,
            file,
            pending: Vec::new(),
            synced_len: scan.valid_len,
            appended: scan.appended,
            removed: scan.removed,
            items: scan.items,
            loaded: load,
            unsynced: 0,
        })
    }

    pub fn live(&self) -> usize {
        self.appended - self.removed
    }

    /// Read the live payloads into memory so the segment can serve as head.
    pub fn load(&mut self) -> io::Result<()> {
        if self.loaded {
            return Ok(());
        }
        self.sync()?;
        let scan = scan(&mut self.file, true)?;
        if scan.valid_len < scan.file_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: torn record in a segment that was never closed", self.path.display()),
            ));
        }
        self.appended = scan.appended;
        self.removed = scan.removed;
        self.items = scan.items;
        self.loaded = true;
        Ok(())
    }

    /// Append one payload record.
    ///
    /// On error the record is not part of the segment, in memory or on
    /// disk.
    pub fn append(&mut self, payload: &[u8], options: &QueueOptions) -> io::Result<()> {
        // Callers reject payloads that would collide with the removal marker.
        let len = payload.len() as u32;
        let mark = self.pending.len();
        self.pending.extend_from_slice(&len.to_le_bytes());
        self.pending.extend_from_slice(payload);
        if let Err(e) = self.commit(options) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.appended += 1;
        if self.loaded {
            self.items.push_back(payload.to_vec());
        }
        Ok(())
    }

    pub fn front(&self) -> Option<&Vec<u8>> {
        self.items.front()
    }

    /// Remove the oldest live payload and record the removal.
    ///
    /// On error the payload stays at the front.
    pub fn remove_front(&mut self, options: &QueueOptions) -> io::Result<Option<Vec<u8>>> {
        let Some(payload) = self.items.pop_front() else {
            return Ok(None);
        };
        let mark = self.pending.len();
        self.pending.extend_from_slice(&REMOVAL.to_le_bytes());
        if let Err(e) = self.commit(options) {
            self.pending.truncate(mark);
            self.items.push_front(payload);
            return Err(e);
        }
        self.removed += 1;
        Ok(Some(payload))
    }

    fn commit(&mut self, options: &QueueOptions) -> io::Result<()> {
        let unsynced = self.unsynced + 1;
        let due = match options.durability {
            Durability::Synced => true,
            Durability::Turbo => unsynced >= options.turbo_flush_every.max(1),
        };
        if due {
            self.sync()
        } else {
            self.unsynced = unsynced;
            Ok(())
        }
    }

    /// Write pending records and fsync the file.
    ///
    /// A failed write or fsync cuts the file back to the last synced
    /// length and keeps every record pending.
    pub fn sync(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            self.unsynced = 0;
            return Ok(());
        }
        let written = self
            .file
            .write_all(&self.pending)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            if let Err(cut) = self.file.set_len(self.synced_len) {
                warn!(
                    path = %self.path.display(),
                    error = %cut,
                    "cannot cut segment back after failed write"
                );
            }
            return Err(e);
        }
        self.synced_len += self.pending.len() as u64;
        self.pending.clear();
        self.unsynced = 0;
        Ok(())
    }

    /// Close and remove the segment file.
    pub fn delete(self) -> io::Result<()> {
        let path = self.path.clone();
        drop(self);
        std::fs::remove_file(path)
    }
}

struct Scan {
    file_len: u64,
    valid_len: u64,
    appended: usize,
    removed: usize,
    items: VecDeque<Vec<u8>>,
}

/// Walk the records of a segment file.
///
/// Stops at the first incomplete record; everything before it is valid.
fn scan(file: &mut File, keep: bool) -> io::Result<Scan> {
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&*file);

    let mut offset = 0u64;
    let mut appended = 0usize;
    let mut removed = 0usize;
    let mut items = VecDeque::new();
    loop {
        if offset + 4 > file_len {
            break;
        }
        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf)?;
        let len = u32::from_le_bytes(len_buf);

        if len == REMOVAL {
            removed += 1;
            if removed > appended {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("removal record at offset {offset} without a live item"),
                ));
            }
            if keep {
                items.pop_front();
            }
            offset += 4;
            continue;
        }

        let next = offset + 4 + u64::from(len);
        if next > file_len {
            break;
        }
        if keep {
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            items.push_back(payload);
        } else {
            reader.seek_relative(i64::from(len))?;
        }
        appended += 1;
        offset = next;
    }
    drop(reader);
    file.seek(SeekFrom::End(0))?;

    Ok(Scan {
        file_len,
        valid_len: offset,
        appended,
        removed,
        items,
    })
}
