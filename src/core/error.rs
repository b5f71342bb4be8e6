use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not locate home directory for the default config path")]
    NoHomeDirectory,
    #[error("failed to read config {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("watcher error: {0}")]
    Notify(#[from] notify::Error),
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[error("failed to spawn observer thread: {0}")]
    Thread(#[from] io::Error),
}

#[derive(Debug, Error)]
#[error("filesystem error at {}: {source}", .path.display())]
pub struct FilesystemError {
    pub path: PathBuf,
    pub source: io::Error,
}

impl FilesystemError {
    pub fn new(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self { path: path.into(), source }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    /// Connection refused, timeout, DNS, or a non-success status.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The service answered with something that is not a JSON object.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("segment length must be greater than zero")]
    ZeroSegmentLength,
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Coarse classification used in log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transport,
    MalformedResponse,
    InvalidPayload,
    Filesystem,
    Worker,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error(transparent)]
    Chunk(#[from] ChunkError),
    #[error("chunk writer task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Dispatch(DispatchError::Transport(_)) => ErrorKind::Transport,
            PipelineError::Dispatch(DispatchError::MalformedResponse(_)) => {
                ErrorKind::MalformedResponse
            }
            PipelineError::Chunk(ChunkError::Filesystem(_)) => ErrorKind::Filesystem,
            PipelineError::Chunk(_) => ErrorKind::InvalidPayload,
            PipelineError::Worker(_) => ErrorKind::Worker,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_error_kinds() {
        let transport: PipelineError = DispatchError::Transport("refused".into()).into();
        assert_eq!(transport.kind(), ErrorKind::Transport);

        let malformed: PipelineError = DispatchError::MalformedResponse("eof".into()).into();
        assert_eq!(malformed.kind(), ErrorKind::MalformedResponse);

        let invalid: PipelineError = ChunkError::InvalidPayload("no text".into()).into();
        assert_eq!(invalid.kind(), ErrorKind::InvalidPayload);

        let fs: PipelineError = ChunkError::Filesystem(FilesystemError::new(
            "/nowhere",
            io::Error::new(io::ErrorKind::PermissionDenied, "denied"),
        ))
        .into();
        assert_eq!(fs.kind(), ErrorKind::Filesystem);
    }
}
