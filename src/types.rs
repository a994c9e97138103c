use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lines kept by the live tail before the oldest are dropped.
pub const LIVE_BUFFER_CAPACITY: usize = 500;

/// A selectable server-side log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogFile {
    pub name: String,
    pub size: u64,
    pub modified: String,
}

/// Server-owned state of the log backup integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    #[serde(default)]
    pub enabled: bool,
    pub provider: Option<String>,
    pub email: Option<String>,
    pub last_backup: Option<String>,
    pub backup_frequency: Option<String>,
    pub has_folder_id: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub available_files: Vec<LogFile>,
    pub backup_status: Option<BackupStatus>,
    pub current_file: Option<String>,
    pub total_buffered: Option<usize>,
}

/// Payload of one event on the live tail stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamMessage {
    Log {
        data: String,
    },
    History {
        data: Vec<String>,
    },
    Connected {
        #[serde(rename = "clientId")]
        client_id: Option<String>,
    },
    Heartbeat {
        timestamp: Option<i64>,
    },
    Error {
        message: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
pub struct DriveAuthUrl {
    pub url: String,
}

/// Body of the server's `{message}` replies, success or failure.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiMessage {
    #[serde(default)]
    pub message: String,
    pub file_id: Option<String>,
}

/// Bounded list of log lines, newest first.
#[derive(Debug)]
pub struct LiveBuffer {
    entries: VecDeque<String>,
    max_size: usize,
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new(LIVE_BUFFER_CAPACITY)
    }
}

impl LiveBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_size,
        }
    }

    /// Prepends a line, dropping the oldest once over capacity.
    pub fn push_front(&mut self, line: String) {
        self.entries.push_front(line);
        self.entries.truncate(self.max_size);
    }

    /// Replaces the whole content, keeping at most `max_size` of the newest lines.
    pub fn replace(&mut self, lines: Vec<String>) {
        self.entries = lines.into_iter().take(self.max_size).collect();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.entries.iter()
    }
}
