use std::io;
use std::path::PathBuf;

/// Errors raised while reading a terrain tile.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    /// No tile file: open sky, or terrain provided by a parent map.
    #[error("terrain tile {path} not found")]
    NotFound { path: PathBuf },
    #[error("terrain tile {path} has magic {magic:#010x} version {version}, which this build cannot read")]
    VersionMismatch {
        path: PathBuf,
        magic: u32,
        version: u32,
    },
    #[error("terrain tile {path} is corrupt: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("cannot encode terrain tile: {message}")]
    InvalidInput { message: String },
    #[error("failed to read terrain tile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl TileError {
    pub(crate) fn corrupt(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.to_path_buf(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Whether the failure only means "no terrain here".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
