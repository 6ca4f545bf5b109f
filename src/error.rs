use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Job with run id {run_id} already started for job {job_name}")]
    Conflict { job_name: String, run_id: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Could not find code for job {0}")]
    SourceNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Misconfiguration: {0}")]
    Misconfiguration(String),

    #[error("Failed to start job process: {0}")]
    SpawnFailure(#[source] std::io::Error),

    #[error("Failed to relay job output: {0}")]
    StreamFailure(#[source] std::io::Error),

    #[error("Failed to access pidfile {path:?}: {source}")]
    PidFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Pidfile {path:?} does not contain a valid pid: {contents:?}")]
    InvalidPidFile { path: PathBuf, contents: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// True for errors caused by the request rather than the host.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            RunnerError::Conflict { .. }
                | RunnerError::JobNotFound(_)
                | RunnerError::SourceNotFound(_)
                | RunnerError::InvalidRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RunnerError>;
