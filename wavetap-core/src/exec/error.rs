use std::time::Duration;

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        source: std::io::Error,
    },
    #[error("process exited with status {status:?}: {stderr}")]
    Process {
        status: Option<i32>,
        stderr: String,
    },
    #[error("run exceeded timeout of {timeout:?}")]
    Timeout { timeout: Duration },
    #[error("invalid execution request: {0}")]
    MalformedInput(String),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ExecResult<T> = Result<T, ExecError>;
