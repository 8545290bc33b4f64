use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Scan root is not a readable directory: {}", .0.display())]
    InvalidRoot(PathBuf),

    #[error("Decode error: {0}")]
    Decode(#[from] image::ImageError),

    #[error("Video error: {0}")]
    Video(String),

    #[error("Scan cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    Other(String),
}
