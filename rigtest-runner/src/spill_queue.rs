// Copyright (c) The rigtest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! An append-only queue of text records that spills to disk past a size
//! threshold.
//!
//! Up to `max_length` records live in memory. The first append that pushes
//! the queue past the threshold flushes everything to a backing file (one
//! record per line) and resets memory, so unbounded producers cannot grow
//! the process. [`SpillQueue::records`] always reconstructs the full logical
//! sequence in insertion order, wherever each record currently lives.
//!
//! Records are plain text and must not contain newlines; callers serialize
//! structured data before insertion.

use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use std::{
    collections::VecDeque,
    io::{self, BufRead, BufReader, Write},
};

/// A bounded in-memory queue with file-backed overflow.
#[derive(Debug)]
pub struct SpillQueue {
    pending: VecDeque<String>,
    path: Utf8PathBuf,
    max_length: usize,
    spilled: bool,
}

impl SpillQueue {
    /// Creates a new queue backed by `path`.
    ///
    /// The backing file is not touched until the first flush.
    pub fn new(path: impl Into<Utf8PathBuf>, max_length: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            path: path.into(),
            max_length,
            spilled: false,
        }
    }

    /// The backing file path.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// True if the queue has flushed to its backing file since the last
    /// [`clear`](Self::clear).
    pub fn has_spilled(&self) -> bool {
        self.spilled
    }

    /// True if no record has ever been queued since the last
    /// [`clear`](Self::clear).
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && !self.spilled
    }

    /// Appends one record to the tail of the queue, flushing to disk if the
    /// in-memory size now exceeds the threshold.
    pub fn append(&mut self, record: impl Into<String>) -> io::Result<()> {
        self.pending.push_back(record.into());
        self.flush_if_over_threshold()
    }

    /// Appends every record from `records`, flushing to disk if the
    /// in-memory size now exceeds the threshold.
    pub fn extend<I, S>(&mut self, records: I) -> io::Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pending.extend(records.into_iter().map(Into::into));
        self.flush_if_over_threshold()
    }

    /// Writes all in-memory records to the backing file and clears memory.
    ///
    /// The first flush truncates any stale file contents; later flushes
    /// append.
    pub fn flush(&mut self) -> io::Result<()> {
        let mut file = if self.spilled {
            fs::OpenOptions::new().append(true).open(&self.path)?
        } else {
            fs::File::create(&self.path)?
        };
        for record in &self.pending {
            writeln!(file, "{record}")?;
        }
        self.pending.clear();
        self.spilled = true;
        Ok(())
    }

    /// Returns the full logical sequence: spilled records from the backing
    /// file followed by in-memory records. Does not mutate on-disk state.
    pub fn records(&self) -> io::Result<Vec<String>> {
        let mut records = Vec::new();
        if self.spilled {
            let reader = BufReader::new(fs::File::open(&self.path)?);
            for line in reader.lines() {
                records.push(line?);
            }
        }
        records.extend(self.pending.iter().cloned());
        Ok(records)
    }

    /// Drops in-memory content and resets the spill flag.
    ///
    /// The backing file is deliberately left in place: records already
    /// spilled become orphaned and the next flush starts a fresh write. The
    /// file only gets removed on drop, and then only when empty.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.spilled = false;
    }

    fn flush_if_over_threshold(&mut self) -> io::Result<()> {
        if self.pending.len() > self.max_length {
            self.flush()?;
        }
        Ok(())
    }
}

impl Drop for SpillQueue {
    fn drop(&mut self) {
        // Don't litter the log directory with empty spill files.
        if let Ok(metadata) = self.path.as_std_path().metadata() {
            if metadata.len() == 0 {
                let _ = fs::remove_file(&self.path);
            }
        }
    }
}
