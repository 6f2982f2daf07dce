use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The scanned directory could not be listed. Nothing useful can be reported after this.
    #[error("failed to read directory {}: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read directory {}: not a directory", path.display())]
    NotADirectory { path: PathBuf },

    #[error("You can only specify one filter at a time.")]
    ConflictingFilters,
}
