// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Registry at {path} is corrupt: {reason}")]
    CorruptRegistry { path: PathBuf, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, Error>;
