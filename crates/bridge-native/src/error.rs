//! Native host errors.

use thiserror::Error;

/// Native host error.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("No response sink installed")]
    NoSink,
    #[error("No tokio runtime to execute commands on: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
