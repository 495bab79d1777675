//!
//! src/errors.rs
//!
//! Defines enums and methods of error conversion
//! for errors the release tracker uses
//!
//!

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("config error: {0}")]
    Config(String),
    #[error("http error: {0}")]
    Http(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("ledger error: {0}")]
    Ledger(String),
    #[error("sink rejected message: {0}")]
    Sink(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error)
}

impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self { TrackerError::Http(e.to_string()) }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self { TrackerError::Parse(e.to_string()) }
}
