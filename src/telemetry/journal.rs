//! Rotating JSON Lines journal of [`StatusEvent`]s.
//!
//! Each line is `{"timestamp": "<RFC 3339>", "status": {"event": ...}}`.
//! Files are named `status-<UTC time>-<sequence>.jsonl` so that name order
//! is creation order.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread;

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::uplink::StatusEvent;

const FILE_PREFIX: &str = "status-";
const FILE_SUFFIX: &str = ".jsonl";

#[derive(Serialize)]
struct JournalRecord<'a> {
    timestamp: String,
    status: &'a StatusEvent,
}

/// Append-only status journal with size-based rotation
pub struct EventJournal {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: BufWriter<File>,
    current_path: PathBuf,
    records_in_file: usize,
    sequence: u32,
}

impl EventJournal {
    /// Open a journal in `dir`, creating the directory if needed
    ///
    /// Starts a fresh file and prunes old ones down to `max_files_to_keep`.
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be created
    pub fn open<P: AsRef<Path>>(
        dir: P,
        max_records_per_file: usize,
        max_files_to_keep: usize,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let (writer, current_path) = create_file(&dir, 0)?;
        let journal = Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer,
            current_path,
            records_in_file: 0,
            sequence: 0,
        };
        journal.prune()?;

        info!("Status journal at {}", journal.current_path.display());
        Ok(journal)
    }

    /// File currently being appended to
    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    /// Append one event, rotating first if the current file is full
    ///
    /// # Errors
    ///
    /// Returns error if serialization or the write fails
    pub fn record(&mut self, event: &StatusEvent) -> Result<()> {
        if self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }

        let record = JournalRecord {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            status: event,
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records_in_file += 1;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.sequence = self.sequence.wrapping_add(1);

        let (writer, path) = create_file(&self.dir, self.sequence)?;
        debug!("Rotating status journal to {}", path.display());
        self.writer = writer;
        self.current_path = path;
        self.records_in_file = 0;

        self.prune()
    }

    /// Delete the oldest journal files beyond the retention limit
    fn prune(&self) -> Result<()> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_journal_file(path))
            .collect();

        if files.len() <= self.max_files_to_keep {
            return Ok(());
        }

        files.sort();
        let excess = files.len() - self.max_files_to_keep;
        for path in files.into_iter().take(excess) {
            debug!("Removing old status journal {}", path.display());
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}

fn create_file(dir: &Path, sequence: u32) -> Result<(BufWriter<File>, PathBuf)> {
    let name = format!(
        "{}{}-{:04}{}",
        FILE_PREFIX,
        Utc::now().format("%Y%m%dT%H%M%S"),
        sequence % 10_000,
        FILE_SUFFIX
    );
    let path = dir.join(name);
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((BufWriter::new(file), path))
}

fn is_journal_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with(FILE_PREFIX) && name.ends_with(FILE_SUFFIX))
        .unwrap_or(false)
}

/// Drain `events` into `journal` on a dedicated thread
///
/// The thread exits once every sender has been dropped.
pub fn spawn_writer(
    mut journal: EventJournal,
    mut events: mpsc::UnboundedReceiver<StatusEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        while let Some(event) = events.blocking_recv() {
            if let Err(e) = journal.record(&event) {
                warn!("Failed to write status journal: {}", e);
            }
        }
        debug!("Status journal writer finished");
    })
}
