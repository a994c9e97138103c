use crate::backup::BACKUP_FOLDER;
use crate::log_fetcher::{FetchOutcome, LogQuery};
use crate::log_line::{classify, format_line, FilterLevel, Severity};
use crate::types::{BackupStatus, LiveBuffer, LogFile, LogsResponse};
use chrono::{DateTime, Local};
use console::style;
use std::sync::Arc;
use tokio::sync::Mutex;

/// One displayed console row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Position counted down from the newest, zero-padded to three digits
    pub number: String,
    pub text: String,
    pub severity: Severity,
}

/// Client-local view state of the log console.
pub struct LogConsole {
    selected_file: String,
    pub search: Option<String>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
    pub filter_level: FilterLevel,
    buffer: Arc<Mutex<LiveBuffer>>,
    available_files: Vec<LogFile>,
    backup_status: BackupStatus,
}

impl LogConsole {
    pub fn new(selected_file: &str) -> Self {
        Self {
            selected_file: selected_file.to_string(),
            search: None,
            user_id: None,
            ip: None,
            filter_level: FilterLevel::All,
            buffer: Arc::new(Mutex::new(LiveBuffer::default())),
            available_files: Vec::new(),
            backup_status: BackupStatus::default(),
        }
    }

    /// The buffer shared with a live tail.
    pub fn buffer(&self) -> Arc<Mutex<LiveBuffer>> {
        Arc::clone(&self.buffer)
    }

    pub fn selected_file(&self) -> &str {
        &self.selected_file
    }

    pub fn available_files(&self) -> &[LogFile] {
        &self.available_files
    }

    pub fn backup_status(&self) -> &BackupStatus {
        &self.backup_status
    }

    pub fn query(&self, lines: usize) -> LogQuery {
        LogQuery {
            search: self.search.clone(),
            user_id: self.user_id.clone(),
            ip: self.ip.clone(),
            ..LogQuery::new(&self.selected_file)
        }
        .with_lines(lines)
    }

    /// Applies a fetch result; stale results leave the view untouched.
    pub async fn apply(&mut self, outcome: FetchOutcome) -> bool {
        match outcome {
            FetchOutcome::Fresh(body) => {
                self.apply_response(body).await;
                true
            }
            FetchOutcome::Stale(_) => false,
        }
    }

    async fn apply_response(&mut self, body: LogsResponse) {
        if let Some(current) = body.current_file {
            self.selected_file = current;
        }
        if let Some(total) = body.total_buffered {
            log::debug!("Server holds {} live lines", total);
        }
        self.buffer.lock().await.replace(body.logs);
        self.available_files = body.available_files;
        if let Some(status) = body.backup_status {
            self.backup_status = status;
        }
    }

    pub async fn rows(&self) -> Vec<Row> {
        let buffer = self.buffer.lock().await;
        let visible: Vec<(&String, Severity)> = buffer
            .iter()
            .map(|line| (line, classify(line)))
            .filter(|(_, severity)| self.filter_level.matches(*severity))
            .collect();

        let count = visible.len();
        visible
            .into_iter()
            .enumerate()
            .map(|(i, (line, severity))| Row {
                number: format!("{:03}", count - i),
                text: format_line(line),
                severity,
            })
            .collect()
    }

    pub fn header(&self, visible: usize) -> String {
        if self.filter_level == FilterLevel::All {
            format!("{} entries", visible)
        } else {
            format!("{} entries (filtered)", visible)
        }
    }

    pub fn empty_message(&self) -> &'static str {
        if self.search.as_deref().is_some_and(|s| !s.is_empty()) {
            "No logs matching your search."
        } else {
            "No logs found."
        }
    }
}

pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / KB)
    } else {
        format!("{:.1} MB", bytes as f64 / (KB * KB))
    }
}

fn paint(text: &str, severity: Severity) -> String {
    let styled = match severity {
        Severity::Error | Severity::ServerError => style(text).red().bold(),
        Severity::Warn | Severity::ClientError => style(text).yellow(),
        Severity::Info | Severity::Success => style(text).green(),
        Severity::Debug | Severity::Redirect => style(text).blue(),
        Severity::Plain => style(text),
    };
    styled.to_string()
}

pub fn styled_row(row: &Row) -> String {
    format!("{} {}", style(&row.number).dim(), paint(&row.text, row.severity))
}

/// A single formatted line without a row number, as printed by the live tail.
pub fn styled_line(line: &str) -> String {
    paint(&format_line(line), classify(line))
}

pub fn render_files(files: &[LogFile], selected: &str) -> Vec<String> {
    files
        .iter()
        .map(|file| {
            let marker = if file.name == selected { "*" } else { " " };
            format!(
                "{} {:<32} {:>10}  {}",
                marker,
                file.name,
                format_size(file.size),
                file.modified
            )
        })
        .collect()
}

fn format_timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| raw.to_string())
}

pub fn render_backup(status: &BackupStatus) -> Vec<String> {
    if !status.enabled {
        return vec![
            "Backup: disconnected".to_string(),
            "Automatically backup logs to your Google Drive".to_string(),
        ];
    }

    let mut lines = vec![
        format!(
            "Backup: connected to {}",
            status.email.as_deref().unwrap_or("unknown account")
        ),
        format!(
            "Frequency: {}",
            status.backup_frequency.as_deref().unwrap_or("Daily")
        ),
        format!(
            "Last backup: {}",
            status
                .last_backup
                .as_deref()
                .map(format_timestamp)
                .unwrap_or_else(|| "Never".to_string())
        ),
        if status.has_folder_id == Some(false) {
            format!("Folder: {} (created on first backup)", BACKUP_FOLDER)
        } else {
            format!("Folder: {}", BACKUP_FOLDER)
        },
    ];
    if let Some(ref provider) = status.provider {
        lines.push(format!("Provider: {}", provider));
    }
    lines
}
