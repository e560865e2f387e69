//! Общий тип ошибок загрузки, модели и экспорта.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("schema mismatch in {path}: {message}")]
    Schema { path: PathBuf, message: String },

    #[error("unparseable date '{raw}' in training data")]
    UnparseableDate { raw: String },

    #[error("forecast model failed: {0}")]
    Model(String),

    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write CSV {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("failed to render {path}: {message}")]
    Render { path: PathBuf, message: String },
}

impl PipelineError {
    pub fn load(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        Self::Load {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn schema(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Schema {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
