//! Journal-backed persistent LRU store for encoded image bytes.
//!
//! # On-disk layout
//!
//! A store directory contains a `journal` file plus one data file per key
//! (`<key>.0`); an in-progress edit writes to `<key>.0.tmp` and renames on
//! commit, so an uncommitted editor never leaves a visible entry. The
//! journal records one operation per line:
//!
//! ```text
//! pixfetch.DiskStore
//! 1
//! 1
//!
//! DIRTY 3f8a...
//! CLEAN 3f8a... 8412
//! READ 3f8a...
//! REMOVE 3f8a...
//! ```
//!
//! On open the journal is replayed to rebuild the entry table and LRU
//! order; a corrupt journal causes a full wipe and a fresh store rather
//! than a hard failure. The journal is rewritten once the number of
//! redundant operations grows past a threshold, bounding its own growth.
//!
//! The store is a plain synchronous structure; callers serialize access
//! through a single store-wide lock (see `CacheService`).

use crate::cache::stats::CacheStats;
use crate::cache::types::CacheError;
use crate::key::ContentKey;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const JOURNAL_FILE: &str = "journal";
const JOURNAL_TMP_FILE: &str = "journal.tmp";
const JOURNAL_BACKUP_FILE: &str = "journal.bkp";

const MAGIC: &str = "pixfetch.DiskStore";
const VERSION: &str = "1";
const VALUE_COUNT: &str = "1";

const OP_CLEAN: &str = "CLEAN";
const OP_DIRTY: &str = "DIRTY";
const OP_READ: &str = "READ";
const OP_REMOVE: &str = "REMOVE";

/// Redundant journal operations tolerated before a rewrite.
const REDUNDANT_OP_THRESHOLD: usize = 2000;

/// Tracked state for one key.
struct Entry {
    /// Size of the committed data file, in bytes.
    size_bytes: u64,
    /// Whether a committed value exists on disk.
    committed: bool,
    /// Whether an editor is currently active for this key.
    editing: bool,
    /// Monotonic recency stamp for LRU ordering.
    last_used: u64,
}

/// A committed value read from the store.
#[derive(Debug)]
pub struct Snapshot {
    bytes: Vec<u8>,
}

impl Snapshot {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// An in-progress write for one key.
///
/// The caller writes the encoded value then hands the editor back to
/// [`DiskStore::commit`] or [`DiskStore::abort`]. A dropped editor leaves
/// only a temp file and a dangling `DIRTY` record, both discarded on the
/// next open.
pub struct Editor {
    key: String,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    finished: bool,
}

impl Editor {
    /// Append bytes to the pending value.
    pub fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.write_all(buf),
            None => Err(std::io::Error::other("editor already finished")),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Editor {
    fn drop(&mut self) {
        if !self.finished {
            self.writer.take();
            let _ = fs::remove_file(&self.tmp_path);
        }
    }
}

/// Bounded persistent LRU store keyed by [`ContentKey`].
///
/// Capacity is enforced in bytes across all data files; least recently
/// used entries are evicted on overflow. State machine: a store is `Open`
/// from construction until [`close`](DiskStore::close); all mutating calls
/// on a closed store return [`CacheError::Closed`].
pub struct DiskStore {
    directory: PathBuf,
    capacity_bytes: u64,
    /// Append handle for the journal; `None` once closed.
    journal: Option<BufWriter<File>>,
    entries: HashMap<String, Entry>,
    size_bytes: u64,
    tick: u64,
    redundant_ops: usize,
    closed: bool,
    stats: CacheStats,
}

impl DiskStore {
    /// Open (or create) a store in `directory` with the given capacity.
    ///
    /// An existing journal is replayed; corruption is recovered by wiping
    /// the directory and starting fresh. Genuine IO failure of the rebuild
    /// itself is returned to the caller.
    pub fn open(directory: &Path, capacity_bytes: u64) -> Result<Self, CacheError> {
        if capacity_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "disk capacity must be positive".to_string(),
            ));
        }

        fs::create_dir_all(directory)?;

        // Prefer the backup journal if a rewrite was interrupted.
        let journal_path = directory.join(JOURNAL_FILE);
        let backup_path = directory.join(JOURNAL_BACKUP_FILE);
        if backup_path.exists() {
            if journal_path.exists() {
                let _ = fs::remove_file(&backup_path);
            } else {
                fs::rename(&backup_path, &journal_path)?;
            }
        }

        let mut store = Self {
            directory: directory.to_path_buf(),
            capacity_bytes,
            journal: None,
            entries: HashMap::new(),
            size_bytes: 0,
            tick: 0,
            redundant_ops: 0,
            closed: false,
            stats: CacheStats::new(),
        };

        if journal_path.exists() {
            match store.replay_journal(&journal_path) {
                Ok(()) => {
                    store.drop_uncommitted_entries();
                    store.rewrite_journal()?;
                }
                Err(e) => {
                    warn!(
                        directory = %directory.display(),
                        error = %e,
                        "corrupt journal, rebuilding disk store from scratch"
                    );
                    store.wipe_directory()?;
                    store.rewrite_journal()?;
                }
            }
        } else {
            store.rewrite_journal()?;
        }

        store.trim_to_size()?;
        debug!(
            directory = %directory.display(),
            entries = store.entries.len(),
            size_bytes = store.size_bytes,
            "disk store opened"
        );
        Ok(store)
    }

    /// Read the committed value for a key, bumping its recency.
    ///
    /// Returns `Ok(None)` for absent or uncommitted entries. A data file
    /// that fails to read drops its entry and reports absent.
    pub fn get(&mut self, key: &ContentKey) -> Result<Option<Snapshot>, CacheError> {
        self.check_open()?;
        let key = key.as_str();

        let committed = match self.entries.get(key) {
            Some(entry) => entry.committed,
            None => false,
        };
        if !committed {
            self.stats.record_miss();
            return Ok(None);
        }

        let bytes = match fs::read(self.data_path(key)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key, error = %e, "cache data file unreadable, dropping entry");
                self.forget(key)?;
                self.stats.record_miss();
                return Ok(None);
            }
        };

        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.last_used = tick;
        }
        self.append_journal_line(&format!("{} {}", OP_READ, key))?;
        self.redundant_ops += 1;
        self.maybe_rewrite_journal()?;

        self.stats.record_hit();
        Ok(Some(Snapshot { bytes }))
    }

    /// Begin writing a value for a key.
    ///
    /// Returns `Ok(None)` while another editor for the same key is active.
    pub fn edit(&mut self, key: &ContentKey) -> Result<Option<Editor>, CacheError> {
        self.check_open()?;
        let key = key.as_str();

        if self.entries.get(key).is_some_and(|entry| entry.editing) {
            return Ok(None);
        }

        self.append_journal_line(&format!("{} {}", OP_DIRTY, key))?;

        let tmp_path = self.tmp_path(key);
        let file = File::create(&tmp_path)?;

        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.entry(key.to_string()).or_insert(Entry {
            size_bytes: 0,
            committed: false,
            editing: false,
            last_used: tick,
        });
        entry.editing = true;

        Ok(Some(Editor {
            key: key.to_string(),
            tmp_path,
            writer: Some(BufWriter::new(file)),
            finished: false,
        }))
    }

    /// Publish an editor's value: rename the temp file into place, record
    /// `CLEAN`, and evict as needed to stay within capacity.
    pub fn commit(&mut self, mut editor: Editor) -> Result<(), CacheError> {
        self.check_open()?;
        editor.finished = true;

        if let Some(mut writer) = editor.writer.take() {
            writer.flush()?;
        }

        let size = fs::metadata(&editor.tmp_path)?.len();
        fs::rename(&editor.tmp_path, self.data_path(&editor.key))?;

        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(&editor.key) {
            if entry.committed {
                self.size_bytes -= entry.size_bytes;
            }
            entry.size_bytes = size;
            entry.committed = true;
            entry.editing = false;
            entry.last_used = tick;
            self.size_bytes += size;
        } else {
            // The record vanished during the edit; drop the orphan file.
            let _ = fs::remove_file(self.data_path(&editor.key));
        }

        self.append_journal_line(&format!("{} {} {}", OP_CLEAN, editor.key, size))?;
        self.trim_to_size()?;
        self.update_size_stats();
        Ok(())
    }

    /// Discard an editor. An entry that never had a committed value is
    /// removed; a previously committed value stays intact.
    pub fn abort(&mut self, mut editor: Editor) -> Result<(), CacheError> {
        self.check_open()?;
        editor.finished = true;
        editor.writer.take();
        let _ = fs::remove_file(&editor.tmp_path);

        let committed_size = self.entries.get_mut(&editor.key).and_then(|entry| {
            entry.editing = false;
            entry.committed.then_some(entry.size_bytes)
        });

        if let Some(size) = committed_size {
            self.append_journal_line(&format!("{} {} {}", OP_CLEAN, editor.key, size))?;
        } else {
            self.entries.remove(&editor.key);
            self.append_journal_line(&format!("{} {}", OP_REMOVE, editor.key))?;
        }
        self.redundant_ops += 1;
        self.maybe_rewrite_journal()?;
        Ok(())
    }

    /// Delete a key's committed value. Returns whether an entry existed.
    pub fn remove(&mut self, key: &ContentKey) -> Result<bool, CacheError> {
        self.check_open()?;
        let key = key.as_str();

        let exists = self
            .entries
            .get(key)
            .is_some_and(|entry| entry.committed && !entry.editing);
        if !exists {
            return Ok(false);
        }

        self.forget(key)?;
        self.update_size_stats();
        Ok(true)
    }

    /// Check whether a committed value exists, without touching recency.
    pub fn contains(&self, key: &ContentKey) -> bool {
        !self.closed
            && self
                .entries
                .get(key.as_str())
                .is_some_and(|entry| entry.committed)
    }

    /// Persist the journal to stable storage.
    pub fn flush(&mut self) -> Result<(), CacheError> {
        self.check_open()?;
        if let Some(journal) = self.journal.as_mut() {
            journal.flush()?;
            journal.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Flush and close the store. Further mutating calls are rejected
    /// with [`CacheError::Closed`]; closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), CacheError> {
        if self.closed {
            return Ok(());
        }
        if let Some(mut journal) = self.journal.take() {
            journal.flush()?;
            journal.get_ref().sync_all()?;
        }
        self.closed = true;
        debug!(directory = %self.directory.display(), "disk store closed");
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Number of committed entries.
    pub fn entry_count(&self) -> usize {
        self.entries.values().filter(|e| e.committed).count()
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.clone()
    }

    fn check_open(&self) -> Result<(), CacheError> {
        if self.closed {
            Err(CacheError::Closed)
        } else {
            Ok(())
        }
    }

    fn data_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.0", key))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.directory.join(format!("{}.0.tmp", key))
    }

    /// Drop an entry record and its data file, journaling the removal.
    fn forget(&mut self, key: &str) -> Result<(), CacheError> {
        if let Some(entry) = self.entries.remove(key) {
            if entry.committed {
                self.size_bytes -= entry.size_bytes;
            }
            let _ = fs::remove_file(self.data_path(key));
            self.append_journal_line(&format!("{} {}", OP_REMOVE, key))?;
            self.redundant_ops += 1;
            self.maybe_rewrite_journal()?;
        }
        Ok(())
    }

    /// Replay an existing journal into the entry table.
    ///
    /// Any malformed header or line is reported as corruption; the caller
    /// responds by wiping the store.
    fn replay_journal(&mut self, path: &Path) -> Result<(), std::io::Error> {
        let contents = fs::read_to_string(path)?;
        let mut lines = contents.lines();

        let magic = lines.next().unwrap_or("");
        let version = lines.next().unwrap_or("");
        let value_count = lines.next().unwrap_or("");
        let blank = lines.next().unwrap_or("x");
        if magic != MAGIC || version != VERSION || value_count != VALUE_COUNT || !blank.is_empty() {
            return Err(std::io::Error::other("unexpected journal header"));
        }

        let body: Vec<&str> = lines.collect();
        for (index, line) in body.iter().enumerate() {
            if let Err(e) = self.replay_line(line) {
                // A torn final line means the process died mid-append;
                // drop it. Anything earlier is real corruption.
                if index == body.len() - 1 {
                    warn!(line = *line, error = %e, "dropping truncated final journal line");
                    break;
                }
                return Err(std::io::Error::other(format!(
                    "bad journal line {:?}: {}",
                    line, e
                )));
            }
        }
        Ok(())
    }

    fn replay_line(&mut self, line: &str) -> Result<(), String> {
        let (op, rest) = line.split_once(' ').ok_or("missing operation")?;
        self.tick += 1;
        let tick = self.tick;

        match op {
            OP_CLEAN => {
                let (key, size) = rest.split_once(' ').ok_or("missing size")?;
                let size: u64 = size.parse().map_err(|_| "unparseable size")?;
                let entry = self.entries.entry(key.to_string()).or_insert(Entry {
                    size_bytes: 0,
                    committed: false,
                    editing: false,
                    last_used: tick,
                });
                entry.size_bytes = size;
                entry.committed = true;
                entry.editing = false;
                entry.last_used = tick;
            }
            OP_DIRTY => {
                let entry = self.entries.entry(rest.to_string()).or_insert(Entry {
                    size_bytes: 0,
                    committed: false,
                    editing: false,
                    last_used: tick,
                });
                entry.editing = true;
            }
            OP_READ => {
                if let Some(entry) = self.entries.get_mut(rest) {
                    entry.last_used = tick;
                }
            }
            OP_REMOVE => {
                self.entries.remove(rest);
            }
            _ => return Err(format!("unknown operation {:?}", op)),
        }
        Ok(())
    }

    /// After replay: invalidate entries whose last record was `DIRTY`
    /// (an interrupted edit), delete their files, and recompute the size
    /// from the surviving committed entries.
    fn drop_uncommitted_entries(&mut self) {
        let dangling: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.editing || !entry.committed)
            .map(|(key, _)| key.clone())
            .collect();

        for key in dangling {
            let _ = fs::remove_file(self.data_path(&key));
            let _ = fs::remove_file(self.tmp_path(&key));
            self.entries.remove(&key);
        }

        // Journal sizes can disagree with reality after a crash; trust the
        // filesystem and drop entries whose data file is gone.
        let missing: Vec<String> = self
            .entries
            .keys()
            .filter(|key| !self.data_path(key).exists())
            .cloned()
            .collect();
        for key in missing {
            self.entries.remove(&key);
        }

        self.size_bytes = self.entries.values().map(|entry| entry.size_bytes).sum();
        self.update_size_stats();
    }

    /// Remove every file in the store directory and reset the table.
    fn wipe_directory(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.size_bytes = 0;
        self.tick = 0;
        self.redundant_ops = 0;
        for dir_entry in fs::read_dir(&self.directory)? {
            let path = dir_entry?.path();
            if path.is_file() {
                let _ = fs::remove_file(path);
            }
        }
        self.update_size_stats();
        Ok(())
    }

    /// Write a compact journal reflecting the current entry table, using
    /// tmp + backup renames so an interrupted rewrite stays recoverable.
    fn rewrite_journal(&mut self) -> Result<(), CacheError> {
        self.journal.take();

        let journal_path = self.directory.join(JOURNAL_FILE);
        let tmp_path = self.directory.join(JOURNAL_TMP_FILE);
        let backup_path = self.directory.join(JOURNAL_BACKUP_FILE);

        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writeln!(writer, "{}", MAGIC)?;
            writeln!(writer, "{}", VERSION)?;
            writeln!(writer, "{}", VALUE_COUNT)?;
            writeln!(writer)?;

            let mut ordered: Vec<(&String, &Entry)> = self.entries.iter().collect();
            ordered.sort_by_key(|(_, entry)| entry.last_used);
            for (key, entry) in ordered {
                if entry.committed {
                    writeln!(writer, "{} {} {}", OP_CLEAN, key, entry.size_bytes)?;
                } else {
                    writeln!(writer, "{} {}", OP_DIRTY, key)?;
                }
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        if journal_path.exists() {
            fs::rename(&journal_path, &backup_path)?;
        }
        fs::rename(&tmp_path, &journal_path)?;
        let _ = fs::remove_file(&backup_path);

        let file = OpenOptions::new().append(true).open(&journal_path)?;
        self.journal = Some(BufWriter::new(file));
        self.redundant_ops = 0;
        Ok(())
    }

    fn append_journal_line(&mut self, line: &str) -> Result<(), CacheError> {
        if let Some(journal) = self.journal.as_mut() {
            writeln!(journal, "{}", line)?;
            journal.flush()?;
        }
        Ok(())
    }

    fn maybe_rewrite_journal(&mut self) -> Result<(), CacheError> {
        if self.redundant_ops >= REDUNDANT_OP_THRESHOLD && self.redundant_ops >= self.entries.len()
        {
            self.rewrite_journal()?;
        }
        Ok(())
    }

    /// Evict least recently used committed entries until under capacity.
    fn trim_to_size(&mut self) -> Result<(), CacheError> {
        let mut evicted = 0u64;
        while self.size_bytes > self.capacity_bytes {
            let oldest = self
                .entries
                .iter()
                .filter(|(_, entry)| entry.committed && !entry.editing)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());

            match oldest {
                Some(key) => {
                    self.forget(&key)?;
                    evicted += 1;
                }
                None => break,
            }
        }
        if evicted > 0 {
            self.stats.record_evictions(evicted);
            debug!(
                evicted,
                size_bytes = self.size_bytes,
                "disk store evicted entries"
            );
        }
        self.update_size_stats();
        Ok(())
    }

    fn update_size_stats(&mut self) {
        let count = self.entries.values().filter(|e| e.committed).count() as u64;
        self.stats.update_size(self.size_bytes, count);
    }
}
