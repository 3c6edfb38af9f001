use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum ArchiveError {
    #[error("credentials not found; set WHOOP_EMAIL and WHOOP_PASSWORD")]
    #[diagnostic(help("values may come from the environment, a .env file or whoop-archive.json"))]
    MissingCredentials,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("invalid date key: {0}")]
    InvalidDate(String),

    #[error("WHOOP authentication failed: {0}")]
    Authentication(String),

    #[error("WHOOP request failed: {0}")]
    WhoopHttp(String),

    #[error("WHOOP returned status {status}: {message}")]
    WhoopStatus { status: u16, message: String },

    #[error("unexpected WHOOP payload: {0}")]
    WhoopPayload(String),

    #[error("notification request failed: {0}")]
    NotifyHttp(String),

    #[error("notification service returned status {status}: {message}")]
    NotifyStatus { status: u16, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("daily fetch for {date} failed: {reason}")]
    DailyTaskFailed { date: String, reason: String },
}
