use reqwest::StatusCode;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConsoleError {
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Server returned {status}: {message}")]
    StatusError { status: StatusCode, message: String },

    #[error("Backup failed: {0}")]
    BackupError(String),

    #[error("Stream error: {0}")]
    StreamError(String),
}
