use crate::job::JobId;
use crate::storage::Section;
use std::io::Error as IoError;
use std::path::PathBuf;
use std::sync::PoisonError;
use thiserror::Error;

/// List of errors that can occur while working with a spool.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// A filesystem operation on the spool failed.
    ///
    /// This includes the spool root being unavailable, which is fatal for the
    /// call in progress.
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    /// A job file could not be deserialized. The file is left where it is.
    #[error("malformed job file {path}: {source}")]
    MalformedJob {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("job {id} not found in {section}")]
    JobNotFound { id: JobId, section: Section },
    /// A job needs at least the program to run.
    #[error("a job needs at least one argument")]
    EmptyArguments,
    /// A temp file could not be renamed to its final spool name.
    #[error("failed to publish {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: IoError,
    },
    #[error("unknown section {0:?}, expected todo, working or finished")]
    InvalidSection(String),
    #[error("invalid value {value:?} for {var}")]
    Config { var: String, value: String },
}

impl SpoolError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: IoError) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while running worker threads.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("The shared state in a worker thread became poisoned")]
    SharedStatePoisoned,
    #[error(transparent)]
    SpoolError(#[from] SpoolError),
    #[error("Failed to create worker thread")]
    WorkerThreadCreationFailed {
        #[from]
        source: IoError,
    },
    #[error("Worker thread {name} panicked")]
    WorkerPanicked { name: String },
}

impl<T> From<PoisonError<T>> for WorkerError {
    fn from(_: PoisonError<T>) -> Self {
        Self::SharedStatePoisoned
    }
}
