//! Error types for vidascii.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// External step that produced an [`Error::Encode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeStage {
    /// Stream-copying the original audio track into a temporary file.
    ExtractAudio,
    /// Re-encoding the intermediate video (optionally muxed with audio).
    Encode,
}

impl fmt::Display for FinalizeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FinalizeStage::ExtractAudio => f.write_str("audio extraction"),
            FinalizeStage::Encode => f.write_str("final encode"),
        }
    }
}

/// Main error type for vidascii operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("cannot open video {}: {reason}", path.display())]
    SourceOpen { path: PathBuf, reason: String },

    #[error("external tool unavailable: {0}")]
    ToolMissing(String),

    #[error("no frames could be decoded from {}", .0.display())]
    NoFrames(PathBuf),

    #[error(
        "ffmpeg {stage} failed ({status}): {stderr}\nintermediate video kept at {}",
        intermediate.display()
    )]
    Encode {
        stage: FinalizeStage,
        status: String,
        stderr: String,
        intermediate: PathBuf,
    },

    #[error("{source}\nintermediate video kept at {}", intermediate.display())]
    Unexpected {
        intermediate: PathBuf,
        #[source]
        source: Box<Error>,
    },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("font error: {0}")]
    Font(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Attach the path of the surviving intermediate file to an error raised
    /// after that file was created. Errors that already name it pass through.
    pub fn with_intermediate(self, intermediate: &std::path::Path) -> Self {
        match self {
            err @ (Error::Encode { .. } | Error::Unexpected { .. }) => err,
            other => Error::Unexpected {
                intermediate: intermediate.to_path_buf(),
                source: Box::new(other),
            },
        }
    }

    /// Path of the intermediate video left on disk, if this error kept one.
    pub fn intermediate(&self) -> Option<&std::path::Path> {
        match self {
            Error::Encode { intermediate, .. } | Error::Unexpected { intermediate, .. } => {
                Some(intermediate)
            }
            _ => None,
        }
    }
}

/// Result type alias for vidascii operations.
pub type Result<T> = std::result::Result<T, Error>;
