use crate::config::DEFAULT_LOG_FILE;
use crate::error::ConsoleError;
use crate::session::{ensure_success, Session};
use crate::types::LogsResponse;
use bytes::Bytes;
use log::{debug, info};
use std::sync::atomic::{AtomicU64, Ordering};

/// Upper bound on lines requested per historical fetch.
pub const MAX_LINES: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct LogQuery {
    pub file: String,
    pub lines: usize,
    pub search: Option<String>,
    pub user_id: Option<String>,
    pub ip: Option<String>,
}

impl Default for LogQuery {
    fn default() -> Self {
        Self::new(DEFAULT_LOG_FILE)
    }
}

impl LogQuery {
    pub fn new(file: &str) -> Self {
        Self {
            file: file.to_string(),
            lines: MAX_LINES,
            search: None,
            user_id: None,
            ip: None,
        }
    }

    pub fn with_lines(mut self, lines: usize) -> Self {
        self.lines = lines.clamp(1, MAX_LINES);
        self
    }

    /// Query-string pairs: search goes out as typed, user and ip trimmed, empty ones omitted.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("file", self.file.clone()),
            ("lines", self.lines.clamp(1, MAX_LINES).to_string()),
        ];

        if let Some(search) = self.search.as_ref().filter(|s| !s.is_empty()) {
            params.push(("search", search.clone()));
        }

        let trimmed = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        if let Some(user_id) = trimmed(&self.user_id) {
            params.push(("userId", user_id));
        }
        if let Some(ip) = trimmed(&self.ip) {
            params.push(("ip", ip));
        }

        params
    }
}

#[derive(Debug)]
pub enum FetchOutcome {
    Fresh(LogsResponse),
    /// A newer fetch was issued while this one was in flight; views must not apply it
    Stale(LogsResponse),
}

pub struct LogFetcher {
    session: Session,
    generation: AtomicU64,
}

impl LogFetcher {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            generation: AtomicU64::new(0),
        }
    }

    pub async fn fetch(&self, query: &LogQuery) -> Result<FetchOutcome, ConsoleError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!("Fetching {} lines of {} (generation {})", query.lines, query.file, generation);

        let response = self
            .session
            .get("/admin/logs")
            .query(&query.params())
            .send()
            .await?;
        let response = ensure_success(response).await?;
        let body: LogsResponse = response.json().await?;

        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding stale log response (generation {})", generation);
            return Ok(FetchOutcome::Stale(body));
        }

        info!("Fetched {} log lines from {}", body.logs.len(), query.file);
        Ok(FetchOutcome::Fresh(body))
    }

    pub async fn clear(&self, file: &str) -> Result<(), ConsoleError> {
        let response = self
            .session
            .delete("/admin/logs")
            .query(&[("file", file)])
            .send()
            .await?;
        ensure_success(response).await?;

        info!("Cleared log file {}", file);
        Ok(())
    }

    pub async fn download(&self, file: &str) -> Result<Bytes, ConsoleError> {
        let response = self
            .session
            .get("/admin/logs/download")
            .query(&[("file", file)])
            .send()
            .await?;
        let response = ensure_success(response).await?;

        Ok(response.bytes().await?)
    }
}
