use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced while setting up or following files.
#[derive(Debug, Error)]
pub enum Error {
    /// The change-notification facility could not be started.
    #[error("Failed to initialize change notifications: {0}")]
    Init(#[source] notify::Error),
    /// A watch could not be registered for a file.
    #[error("Failed to add watch for {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
    /// A file could not be opened for reading.
    #[error("Failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
