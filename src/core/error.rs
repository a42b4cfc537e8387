use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("unrecognised input format for '{}': {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("malformed record {record}: {reason}")]
    Parse { record: String, reason: String },

    #[error("worker failed on batch {batch}: {source}")]
    Worker {
        batch: usize,
        #[source]
        source: Box<PipelineError>,
    },

    #[error("worker panicked on batch {batch}: {message}")]
    WorkerPanic { batch: usize, message: String },

    #[error("no reads were extracted from the input")]
    EmptyResult,

    #[error("extraction timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("decompression setup failed for '{}': {reason}", path.display())]
    Decompress { path: PathBuf, reason: String },

    #[error("invalid configuration '{parameter}': {reason}")]
    InvalidConfig { parameter: String, reason: String },
}

impl PipelineError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn parse(record: impl Into<String>, reason: impl Into<String>) -> Self {
        PipelineError::Parse {
            record: record.into(),
            reason: reason.into(),
        }
    }

    pub fn config(parameter: &str, reason: impl Into<String>) -> Self {
        PipelineError::InvalidConfig {
            parameter: parameter.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_parse(&self) -> bool {
        match self {
            PipelineError::Parse { .. } => true,
            PipelineError::Worker { source, .. } => source.is_parse(),
            _ => false,
        }
    }
}
