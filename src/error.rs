//! Per-stage failures of a detection cycle.

use std::path::PathBuf;

use crate::capture::CaptureError;
use crate::storage::StoreError;
use crate::transport::ChannelError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    FileRead,
    Upload,
    Capture,
    Publish,
    Encode,
}

impl ErrorKind {
    /// A lost image upload is a hard failure; a broker or camera hiccup is not.
    pub fn is_fatal(self) -> bool {
        matches!(self, Self::FileRead | Self::Upload)
    }
}

#[derive(Debug)]
pub enum CycleError {
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    Upload(StoreError),
    Capture(CaptureError),
    Publish(ChannelError),
    Encode(serde_json::Error),
}

impl CycleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FileRead { .. } => ErrorKind::FileRead,
            Self::Upload(_) => ErrorKind::Upload,
            Self::Capture(_) => ErrorKind::Capture,
            Self::Publish(_) => ErrorKind::Publish,
            Self::Encode(_) => ErrorKind::Encode,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

impl std::fmt::Display for CycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileRead { path, source } => {
                write!(f, "problem reading file {}: {}", path.display(), source)
            }
            Self::Upload(e) => write!(f, "problem uploading image: {}", e),
            Self::Capture(e) => write!(f, "{}", e),
            Self::Publish(e) => write!(f, "problem publishing detection: {}", e),
            Self::Encode(e) => write!(f, "problem encoding detection: {}", e),
        }
    }
}

impl std::error::Error for CycleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FileRead { source, .. } => Some(source),
            Self::Upload(e) => Some(e),
            Self::Capture(e) => Some(e),
            Self::Publish(e) => Some(e),
            Self::Encode(e) => Some(e),
        }
    }
}
