//! Error types shared across the relay crates.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid topic: {0}")]
    InvalidTopic(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),
}

pub type Result<T> = std::result::Result<T, Error>;
