//! Count store adapters.
//!
//! Implement [`CountSink`], the durable end of the pipeline.
//!
//! - [`MemoryCountStore`] keeps records in a `Vec`; used when no journal
//!   path is configured, and by tests.  It can be told to fail so the
//!   lost-count path is reachable without a broken disk.
//! - [`JournalCountStore`] appends one JSON object per line to a file and
//!   flushes after every record.  A torn last line (crash, short write) is
//!   closed off before the next record so that record stays readable.
//!
//! Both stores assign the sequence number and the wall-clock timestamp.
//! The detector's monotonic time is kept alongside for correlation.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::app::ports::{Ack, CountSink, PersistenceError};
use crate::detector::CountEvent;

use super::time::wall_clock_ms;

/// One persisted pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRecord {
    pub seq: u64,
    pub sensor_id: String,
    /// Server wall-clock time of persistence (Unix ms).
    pub recorded_at_ms: u64,
    /// Monotonic detection time reported by the detector.
    pub detected_at_ms: u64,
}

impl CountRecord {
    fn from_event(seq: u64, event: &CountEvent) -> Self {
        Self {
            seq,
            sensor_id: event.sensor_id.as_str().to_owned(),
            recorded_at_ms: wall_clock_ms(),
            detected_at_ms: event.detected_at_ms,
        }
    }
}

// ───────────────────────────────────────────────────────────────
// In-memory store
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryCountStore {
    records: Vec<CountRecord>,
    failing: bool,
}

impl MemoryCountStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `record_count` fails with `Unavailable`.
    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }

    pub fn records(&self) -> &[CountRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl CountSink for MemoryCountStore {
    fn record_count(&mut self, event: &CountEvent) -> Result<Ack, PersistenceError> {
        if self.failing {
            return Err(PersistenceError::Unavailable);
        }
        let seq = self.records.len() as u64 + 1;
        self.records.push(CountRecord::from_event(seq, event));
        Ok(Ack::Stored { seq })
    }
}

// ───────────────────────────────────────────────────────────────
// JSON-lines journal
// ───────────────────────────────────────────────────────────────

pub struct JournalCountStore {
    path: PathBuf,
    file: File,
    next_seq: u64,
    /// The file may end mid-line; the next record starts with a newline.
    torn_tail: bool,
}

impl JournalCountStore {
    /// Open (or create) the journal at `path` and resume numbering after
    /// the last readable record.  Unparsable lines are skipped with a
    /// warning; they never block startup.
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        let (last_seq, torn_tail) = match File::open(path) {
            Ok(mut existing) => {
                let torn = Self::ends_mid_line(&mut existing).map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
                (Self::scan_last_seq(existing), torn)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (0, false),
            Err(e) => return Err(PersistenceError::WriteFailed(e.to_string())),
        };
        if torn_tail {
            warn!("JournalCountStore: {} ends with a partial line", path.display());
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;

        info!("JournalCountStore: {} (resuming at seq {})", path.display(), last_seq + 1);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_seq: last_seq + 1,
            torn_tail,
        })
    }

    /// Non-empty and not terminated by `\n`.
    fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
        if file.metadata()?.len() == 0 {
            return Ok(false);
        }
        file.seek(SeekFrom::End(-1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        file.seek(SeekFrom::Start(0))?;
        Ok(last[0] != b'\n')
    }

    fn scan_last_seq(file: File) -> u64 {
        let mut last = 0;
        for (lineno, line) in BufReader::new(file).lines().enumerate() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<CountRecord>(&line) {
                Ok(rec) => last = last.max(rec.seq),
                Err(e) => warn!("JournalCountStore: skipping line {}: {}", lineno + 1, e),
            }
        }
        last
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every readable record back (for reporting and tests).
    pub fn read_all(path: &Path) -> Result<Vec<CountRecord>, PersistenceError> {
        let file = File::open(path).map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
        Ok(BufReader::new(file)
            .lines()
            .map_while(Result::ok)
            .filter_map(|line| serde_json::from_str(&line).ok())
            .collect())
    }
}

impl CountSink for JournalCountStore {
    fn record_count(&mut self, event: &CountEvent) -> Result<Ack, PersistenceError> {
        let record = CountRecord::from_event(self.next_seq, event);
        let json = serde_json::to_string(&record).map_err(|e| PersistenceError::WriteFailed(e.to_string()))?;
        let mut line = String::with_capacity(json.len() + 2);
        if self.torn_tail {
            line.push('\n');
        }
        line.push_str(&json);
        line.push('\n');

        if let Err(e) = self.file.write_all(line.as_bytes()).and_then(|()| self.file.flush()) {
            // Part of the line may be on disk.
            self.torn_tail = true;
            return Err(PersistenceError::WriteFailed(e.to_string()));
        }

        self.torn_tail = false;
        self.next_seq += 1;
        Ok(Ack::Stored { seq: record.seq })
    }

    fn flush(&mut self) -> Result<(), PersistenceError> {
        self.file.sync_data().map_err(|e| PersistenceError::WriteFailed(e.to_string()))
    }
}
