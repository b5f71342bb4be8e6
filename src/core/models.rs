use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::core::error::PipelineError;

/// Structured reply from the processing service: a JSON object.
pub type Payload = Map<String, Value>;

/// A filesystem change delivered by the observer, consumed once by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Created { source_path: PathBuf },
    Modified { source_path: PathBuf },
    Deleted { source_path: PathBuf },
    Moved { source_path: PathBuf, destination_path: PathBuf },
}

impl ChangeEvent {
    pub fn source_path(&self) -> &Path {
        match self {
            ChangeEvent::Created { source_path }
            | ChangeEvent::Modified { source_path }
            | ChangeEvent::Deleted { source_path }
            | ChangeEvent::Moved { source_path, .. } => source_path,
        }
    }

    /// Every path the event touches, used for pattern filtering.
    pub fn paths(&self) -> Vec<&Path> {
        match self {
            ChangeEvent::Moved { source_path, destination_path } => {
                vec![source_path.as_path(), destination_path.as_path()]
            }
            _ => vec![self.source_path()],
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            ChangeEvent::Created { .. } => "created",
            ChangeEvent::Modified { .. } => "modified",
            ChangeEvent::Deleted { .. } => "deleted",
            ChangeEvent::Moved { .. } => "moved",
        }
    }
}

/// Output of the filename resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub canonical_path: String, // forward slashes only
    pub filename: String,       // last path segment
}

/// One bounded segment of extracted text, persisted as its own file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub index: usize,
    pub content: String,
    pub source_filename: String,
}

impl TextChunk {
    /// `{filename}.{index}.txt`
    pub fn file_name(&self) -> String {
        Self::name_for(&self.source_filename, self.index)
    }

    pub fn name_for(source_filename: &str, index: usize) -> String {
        format!("{source_filename}.{index}.txt")
    }
}

/// Where a watched path currently sits in the Created state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathState {
    Idle,
    Debouncing,
    Dispatching,
    Postprocessing,
    Done,
}

/// What happened to a single Created event.
#[derive(Debug)]
pub enum CreatedOutcome {
    /// Post-processing disabled: the service reply, untouched.
    Delivered(Payload),
    /// Post-processing enabled: `count` chunk files written for `filename`.
    Chunked { filename: String, count: usize },
    Failed(PipelineError),
    /// A newer Created event for the same path restarted the debounce.
    Superseded,
    /// Shutdown arrived while debouncing.
    Cancelled,
}
