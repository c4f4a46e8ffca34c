use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use colored::Colorize;

use crate::model::EventKind;

/// Destination for rendered lines. Every line written is newline-terminated.
pub trait Sink: Send + Sync {
    fn write_line(&self, chat_id: Option<i64>, kind: EventKind, line: &str) -> Result<()>;
}

/// Writes to stdout, optionally colouring the event tag
pub struct ConsoleSink {
    color: bool,
}

impl ConsoleSink {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn decorate(&self, kind: EventKind, line: &str) -> String {
        if !self.color {
            return line.to_string();
        }

        // Lines start with "<date> <time> <TAG> "
        let mut parts = line.splitn(4, ' ');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(date), Some(time), Some(tag)) => {
                let tag = match kind {
                    EventKind::MessageCreated => tag.blue().bold(),
                    EventKind::MessageEdited => tag.yellow().bold(),
                    EventKind::MessageDeleted => tag.red().bold(),
                };
                let stamp = format!("{} {}", date, time);
                match parts.next() {
                    Some(rest) => format!("{} {} {}", stamp.dimmed(), tag, rest),
                    None => format!("{} {}", stamp.dimmed(), tag),
                }
            }
            _ => line.to_string(),
        }
    }
}

impl Sink for ConsoleSink {
    fn write_line(&self, _chat_id: Option<i64>, kind: EventKind, line: &str) -> Result<()> {
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{}", self.decorate(kind, line)).context("Failed to write to stdout")?;
        Ok(())
    }
}

/// Appends to one file per chat per day:
/// `<root>/<chat_id|unknown>/<YYYY-MM-DD>.log`
pub struct FileSink {
    root: PathBuf,
    // Serializes appends so concurrent writers never interleave a line
    lock: Mutex<()>,
}

impl FileSink {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            lock: Mutex::new(()),
        }
    }

    pub fn path_for(&self, chat_id: Option<i64>, date: NaiveDate) -> PathBuf {
        let chat_dir = chat_id.map_or_else(|| "unknown".to_string(), |id| id.to_string());
        self.root
            .join(chat_dir)
            .join(format!("{}.log", date.format("%Y-%m-%d")))
    }
}

impl Sink for FileSink {
    fn write_line(&self, chat_id: Option<i64>, _kind: EventKind, line: &str) -> Result<()> {
        let path = self.path_for(chat_id, Utc::now().date_naive());
        let _guard = self
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("file sink lock poisoned"))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory: {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;
        writeln!(file, "{}", line)
            .with_context(|| format!("Failed to write log file: {}", path.display()))?;
        Ok(())
    }
}
