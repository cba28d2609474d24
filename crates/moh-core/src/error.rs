// crates/moh-core/src/error.rs

use moh_parser::ParserError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::series::SeriesError;

/// Errors that end a run before any record is uploaded.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Series(#[from] SeriesError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client could not be built: {0}")]
    Client(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
