//! Announcement history as daily JSONL files.
//!
//! One line per fired announcement in `{dir}/{YYYY-MM-DD}.jsonl`. Write
//! failures are logged and otherwise ignored.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dispatcher::TargetOutcome;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnouncementRecord {
    pub timestamp: NaiveDateTime,
    pub trigger: String,
    pub instance_id: String,
    pub message: String,
    #[serde(default)]
    pub rewritten: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub outcomes: Vec<TargetOutcome>,
}

impl AnnouncementRecord {
    pub fn failures(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.ok()).count()
    }
}

#[derive(Debug, Clone)]
pub struct History {
    dir: PathBuf,
}

impl History {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn file_for(&self, date: &str) -> PathBuf {
        self.dir.join(format!("{date}.jsonl"))
    }

    pub fn save(&self, record: &AnnouncementRecord) {
        if let Err(e) = fs::create_dir_all(&self.dir) {
            warn!("Failed to create history dir {}: {e}", self.dir.display());
            return;
        }

        let date = record.timestamp.format("%Y-%m-%d").to_string();
        let path = self.file_for(&date);

        let mut file = match fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => f,
            Err(e) => {
                warn!("Failed to open history file {}: {e}", path.display());
                return;
            }
        };

        match serde_json::to_string(record) {
            Ok(line) => {
                if let Err(e) = writeln!(file, "{line}") {
                    warn!("Failed to write history record: {e}");
                } else {
                    debug!("Saved announcement to {}", path.display());
                }
            }
            Err(e) => warn!("Failed to serialize history record: {e}"),
        }
    }

    /// Records for one `YYYY-MM-DD` date; unreadable lines are skipped.
    pub fn load(&self, date: &str) -> Vec<AnnouncementRecord> {
        let Ok(contents) = fs::read_to_string(self.file_for(date)) else {
            return Vec::new();
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(e) => {
                    debug!("Skipping bad history line: {e}");
                    None
                }
            })
            .collect()
    }

    /// Dates that have a history file, oldest first.
    pub fn dates(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return Vec::new();
        };

        let mut dates: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".jsonl").map(String::from)
            })
            .collect();
        dates.sort();
        dates
    }
}
