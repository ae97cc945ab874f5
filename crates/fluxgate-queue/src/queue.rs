//! The durable FIFO queue.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FatalQueueError, QueueError, QueueResult};
use crate::segment::{REMOVAL, Segment};

/// Payload records per segment file.
pub const DEFAULT_SEGMENT_CAPACITY: usize = 10_000;

/// Records between fsyncs in turbo mode.
pub const DEFAULT_TURBO_FLUSH_EVERY: usize = 256;

/// When appended records reach stable storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    /// Every enqueue and removal is fsynced before returning.
    #[default]
    Synced,
    /// Records are batched; a crash may lose the unsynced window.
    Turbo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub segment_capacity: usize,
    pub durability: Durability,
    pub turbo_flush_every: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            segment_capacity: DEFAULT_SEGMENT_CAPACITY,
            durability: Durability::Synced,
            turbo_flush_every: DEFAULT_TURBO_FLUSH_EVERY,
        }
    }
}

/// A crash-safe FIFO of opaque byte payloads backed by segment files.
///
/// Safe to share across threads. Any number of producers may enqueue
/// concurrently; dequeue is meant for a single consumer.
pub struct DurableQueue {
    name: String,
    dir: PathBuf,
    inner: Mutex<Inner>,
    len: AtomicUsize,
}

struct Inner {
    dir: PathBuf,
    options: QueueOptions,
    /// Oldest segment with live items, payloads in memory.
    head: Segment,
    /// Sealed segments between head and tail: (seq, live count).
    middle: VecDeque<(u64, usize)>,
    /// Newest segment when it is not also the head.
    tail: Option<Segment>,
}

impl DurableQueue {
    /// Open (or create) the queue stored under `base/name`.
    pub fn open(base: &Path, name: &str, options: QueueOptions) -> QueueResult<Self> {
        if !is_plain_name(name) {
            return Err(QueueError::InvalidName {
                name: name.to_string(),
            });
        }
        let dir = base.join(name);
        std::fs::create_dir_all(&dir).map_err(|e| QueueError::io(name, e))?;
        let seqs = Segment::list(&dir).map_err(|e| QueueError::io(name, e))?;

        let mut inner = match seqs.split_last() {
            None => Inner {
                head: Segment::create(&dir, 1, true).map_err(|e| QueueError::io(name, e))?,
                dir: dir.clone(),
                options,
                middle: VecDeque::new(),
                tail: None,
            },
            Some((&newest, older)) => {
                let mut sealed = VecDeque::new();
                for &seq in older {
                    let seg = Segment::open(&dir, seq, false).map_err(|e| QueueError::io(name, e))?;
                    if seg.live() == 0 {
                        debug!(queue = name, seq, "removing consumed segment");
                        seg.delete().map_err(|e| QueueError::io(name, e))?;
                    } else {
                        sealed.push_back((seq, seg.live()));
                    }
                }
                match sealed.pop_front() {
                    Some((head_seq, _)) => Inner {
                        head: Segment::open(&dir, head_seq, true)
                            .map_err(|e| QueueError::io(name, e))?,
                        tail: Some(
                            Segment::open(&dir, newest, false).map_err(|e| QueueError::io(name, e))?,
                        ),
                        dir: dir.clone(),
                        options,
                        middle: sealed,
                    },
                    None => Inner {
                        head: Segment::open(&dir, newest, true).map_err(|e| QueueError::io(name, e))?,
                        dir: dir.clone(),
                        options,
                        middle: VecDeque::new(),
                        tail: None,
                    },
                }
            }
        };
        inner.advance().map_err(|e| QueueError::io(name, e))?;

        let len = inner.len();
        info!(queue = name, dir = %dir.display(), items = len, "queue opened");
        Ok(Self {
            name: name.to_string(),
            dir,
            inner: Mutex::new(inner),
            len: AtomicUsize::new(len),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a payload at the back of the queue.
    pub fn enqueue(&self, payload: &[u8]) -> QueueResult<()> {
        if payload.len() >= REMOVAL as usize {
            return Err(QueueError::TooLarge { len: payload.len() });
        }
        let mut inner = self.lock()?;
        inner.rotate_if_full().map_err(|e| QueueError::io(&self.name, e))?;
        let options = inner.options;
        let appended = inner.newest().append(payload, &options);
        self.publish_len(&inner);
        appended.map_err(|e| QueueError::io(&self.name, e))
    }

    /// Remove and return the oldest payload. `None` when empty.
    pub fn dequeue(&self) -> Result<Option<Vec<u8>>, FatalQueueError> {
        let mut inner = self.lock().map_err(|e| FatalQueueError::new(&self.name, e))?;
        let options = inner.options;
        let fatal = |e| FatalQueueError::new(&self.name, QueueError::io(&self.name, e));

        let removed = inner.head.remove_front(&options);
        self.publish_len(&inner);
        let item = removed.map_err(fatal)?;
        if item.is_some() {
            inner.advance().map_err(fatal)?;
        }
        Ok(item)
    }

    /// Return a copy of the oldest payload without removing it.
    pub fn peek(&self) -> Result<Option<Vec<u8>>, FatalQueueError> {
        let inner = self.lock().map_err(|e| FatalQueueError::new(&self.name, e))?;
        Ok(inner.head.front().cloned())
    }

    /// Flush buffered records and fsync open segments.
    pub fn sync(&self) -> QueueResult<()> {
        let mut inner = self.lock()?;
        inner.sync().map_err(|e| QueueError::io(&self.name, e))
    }

    pub fn durability(&self) -> QueueResult<Durability> {
        Ok(self.lock()?.options.durability)
    }

    pub fn set_durability(&self, durability: Durability) -> QueueResult<()> {
        let mut inner = self.lock()?;
        if durability == Durability::Synced {
            inner.sync().map_err(|e| QueueError::io(&self.name, e))?;
        }
        debug!(queue = %self.name, ?durability, "durability changed");
        inner.options.durability = durability;
        Ok(())
    }

    /// Flush, fsync and release the segment files.
    pub fn close(self) -> QueueResult<()> {
        self.sync()?;
        debug!(queue = %self.name, items = self.len(), "queue closed");
        Ok(())
    }

    /// Mirror the segment counts into the lock-free length.
    fn publish_len(&self, inner: &Inner) {
        self.len.store(inner.len(), Ordering::Release);
    }

    fn lock(&self) -> QueueResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| QueueError::Poisoned {
            name: self.name.clone(),
        })
    }
}

impl Drop for DurableQueue {
    fn drop(&mut self) {
        let inner = match self.inner.get_mut() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = inner.sync() {
            warn!(queue = %self.name, error = %e, "failed to flush queue on drop");
        }
    }
}

impl std::fmt::Debug for DurableQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableQueue")
            .field("name", &self.name)
            .field("dir", &self.dir)
            .field("len", &self.len())
            .finish()
    }
}

impl Inner {
    fn len(&self) -> usize {
        self.head.live()
            + self.middle.iter().map(|&(_, live)| live).sum::<usize>()
            + self.tail.as_ref().map_or(0, Segment::live)
    }

    fn newest(&mut self) -> &mut Segment {
        match self.tail.as_mut() {
            Some(tail) => tail,
            None => &mut self.head,
        }
    }

    /// Start a new segment when the one being written is full.
    fn rotate_if_full(&mut self) -> std::io::Result<()> {
        let capacity = self.options.segment_capacity.max(1);
        let (seq, full, head_is_newest) = match &self.tail {
            Some(tail) => (tail.seq, tail.appended >= capacity, false),
            None => (self.head.seq, self.head.appended >= capacity, true),
        };
        if !full {
            return Ok(());
        }

        if head_is_newest && self.head.live() == 0 {
            let fresh = Segment::create(&self.dir, seq + 1, true)?;
            let old = std::mem::replace(&mut self.head, fresh);
            old.delete()?;
        } else {
            // Seal the full segment before anything points past it.
            self.newest().sync()?;
            let fresh = Segment::create(&self.dir, seq + 1, false)?;
            if let Some(sealed) = self.tail.replace(fresh) {
                self.middle.push_back((sealed.seq, sealed.live()));
            }
        }
        debug!(dir = %self.dir.display(), seq = seq + 1, "segment rotated");
        self.sync_dir()
    }

    /// Replace a drained head with the next segment that has items.
    fn advance(&mut self) -> std::io::Result<()> {
        while self.head.live() == 0 {
            let next = if let Some((seq, _)) = self.middle.pop_front() {
                Segment::open(&self.dir, seq, true)?
            } else if let Some(mut tail) = self.tail.take() {
                tail.load()?;
                tail
            } else {
                break;
            };
            let old = std::mem::replace(&mut self.head, next);
            debug!(dir = %self.dir.display(), seq = old.seq, "removing consumed segment");
            old.delete()?;
            self.sync_dir()?;
        }
        Ok(())
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.head.sync()?;
        if let Some(tail) = self.tail.as_mut() {
            tail.sync()?;
        }
        Ok(())
    }

    fn sync_dir(&self) -> std::io::Result<()> {
        #[cfg(unix)]
        if self.options.durability == Durability::Synced {
            std::fs::File::open(&self.dir)?.sync_all()?;
        }
        Ok(())
    }
}

/// A single, non-special path component.
fn is_plain_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\', '\0'])
}
